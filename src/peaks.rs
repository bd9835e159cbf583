//! Two-pass partial detection with adaptive search windows and sub-bin
//! peak interpolation.
//!
//! Pass 1 searches the naive harmonic grid n * f_target. Once an (f0, B)
//! estimate exists, pass 2 re-searches on the inharmonic grid
//! n * f0 * sqrt(1 + B*n^2) with tighter windows. Every candidate peak must
//! clear an adaptive SNR threshold, a prominence check against its
//! neighbors, and two post-interpolation distance gates before it is
//! accepted as a partial.

use crate::dsp::amplitude_db;
use crate::noise::{adaptive_threshold, noise_floor};
use crate::physics::{
    frequency_to_cents, max_partial, partial_frequency, search_window_base_cents,
};
use crate::types::{PartialResult, BIN_HZ, FFT_OUT, SAMPLE_RATE};

/// Frequency grid the detector searches on.
#[derive(Debug, Clone, Copy)]
pub enum SearchGrid {
    /// Naive harmonic grid, n * f_target.
    Harmonic,
    /// Inharmonic grid from the current best (f0, B) estimate.
    Inharmonic { f0: f64, b: f64 },
}

/// Per-note context for a detection pass.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub midi: u8,
    pub target_hz: f64,
    pub scale_break_midi: Option<u8>,
    /// Smoothed B from recent accepted measurements; scales search windows.
    pub smoothed_b: f64,
    /// Analysis window length that produced the spectrum (for the
    /// native-resolution prominence stride).
    pub window_len: usize,
}

impl SearchParams {
    fn near_break(&self) -> bool {
        match self.scale_break_midi {
            Some(bk) => (self.midi as i32 - bk as i32).abs() <= 3,
            None => false,
        }
    }
}

/// Peaks must exceed their larger neighbor by this factor in the power
/// domain. A true peak straddling two bins keeps its neighbor within a
/// fraction of a dB, so the comparison is on energy, not magnitude.
const PROMINENCE_RATIO: f32 = 1.15;

/// Run one detection pass over an averaged magnitude spectrum.
/// Results are strictly increasing in both n and frequency.
pub fn detect_partials(mags: &[f32], params: &SearchParams, grid: SearchGrid) -> Vec<PartialResult> {
    let nyquist = SAMPLE_RATE as f64 / 2.0;
    let near_break = params.near_break();
    // Zero-padding interpolates the spectrum: adjacent FFT_OUT bins of a
    // short-window frame are not independent. The prominence stride steps
    // one native analysis bin instead.
    let stride = (FFT_OUT / params.window_len).max(1);

    let mut partials = Vec::new();
    let mut last_freq = 0.0f64;

    for n in 1..=max_partial(params.midi) {
        let f_search = match grid {
            SearchGrid::Harmonic => n as f64 * params.target_hz,
            SearchGrid::Inharmonic { f0, b } => partial_frequency(n, f0, b),
        };
        if f_search > nyquist - 1000.0 {
            break;
        }

        let window_hz = search_window_hz(params, n, f_search, matches!(grid, SearchGrid::Inharmonic { .. }), near_break);
        let half_bins = ((window_hz / BIN_HZ).round() as usize).max(3);
        let center = (f_search / BIN_HZ).round() as usize;

        let lo = center.saturating_sub(half_bins).max(stride);
        let hi = (center + half_bins).min(mags.len() - 1 - stride);
        if lo >= hi {
            continue;
        }

        // Bin of maximum magnitude within the window
        let (k, peak) = match (lo..=hi)
            .map(|k| (k, mags[k]))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            Some(km) => km,
            None => continue,
        };

        let floor = noise_floor(mags, center, half_bins);
        let threshold = adaptive_threshold(f_search, n, floor, near_break);
        if peak < threshold {
            continue;
        }

        let neighbor = mags[k - stride].max(mags[k + stride]);
        if peak * peak < PROMINENCE_RATIO * neighbor * neighbor {
            continue;
        }

        let f_precise = (k as f64 + parabolic_offset(mags, k)) * BIN_HZ;

        // Distance gates: the refined peak must still belong to this
        // partial's search neighborhood.
        if (f_precise - f_search).abs() > window_hz * 1.5 {
            continue;
        }
        let cents_limit = if n <= 4 {
            50.0
        } else if near_break {
            120.0
        } else {
            80.0
        };
        if frequency_to_cents(f_precise, f_search).abs() > cents_limit {
            continue;
        }

        if f_precise <= last_freq {
            continue;
        }
        last_freq = f_precise;

        partials.push(PartialResult {
            number: n,
            frequency: f_precise,
            amplitude_db: amplitude_db(peak as f64),
        });
    }

    partials
}

/// Search half-window in Hz for partial n.
fn search_window_hz(
    params: &SearchParams,
    n: u32,
    f_search: f64,
    refined_pass: bool,
    near_break: bool,
) -> f64 {
    let mut cents = search_window_base_cents(params.midi);
    if near_break {
        cents *= 1.4; // peaks widen around the scale break
    }
    // Inharmonicity uncertainty accumulates with partial number
    cents *= 1.0 + 0.10 * (n as f64 - 1.0);
    // Stiffer strings stretch the grid further from harmonic
    cents *= (params.smoothed_b / 2e-4).sqrt().clamp(0.7, 2.0);
    if refined_pass {
        cents *= 0.7; // B is known; less slack needed
    }
    cents = cents.min(100.0);

    let hz = f_search * (2.0_f64.powf(cents / 1200.0) - 1.0);
    // Cent windows collapse at very low frequencies; keep an absolute floor
    let min_hz = if f_search < 50.0 {
        2.0
    } else if f_search < 100.0 {
        3.0
    } else if f_search < 200.0 {
        4.0
    } else {
        0.0
    };
    hz.max(min_hz)
}

/// Log-domain parabolic interpolation around bin k. Returns the fractional
/// bin offset in [-1, 1], or 0 when the fit is untrustworthy (a neighbor
/// at the magnitude floor, a flat parabola, or an offset past the next bin).
fn parabolic_offset(mags: &[f32], k: usize) -> f64 {
    let m1 = mags[k - 1] as f64;
    let m2 = mags[k] as f64;
    let m3 = mags[k + 1] as f64;
    if m1 < 1e-6 || m3 < 1e-6 {
        return 0.0;
    }
    let y1 = m1.max(1e-6).ln();
    let y2 = m2.max(1e-6).ln();
    let y3 = m3.max(1e-6).ln();
    let denom = y1 - 2.0 * y2 + y3;
    if denom.abs() < 1e-10 {
        return 0.0;
    }
    let d = (y1 - y3) / (2.0 * denom);
    if d.abs() > 1.0 {
        return 0.0;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::{falling_amps, partial_stack, sine_wave};
    use crate::fft::SpectrumProcessor;
    use crate::physics::{frequency_to_midi, typical_inharmonicity};
    use crate::types::{SAMPLE_RATE, WINDOW_BASS};

    fn params_for(midi: u8, target_hz: f64) -> SearchParams {
        SearchParams {
            midi,
            target_hz,
            scale_break_midi: None,
            smoothed_b: typical_inharmonicity(midi),
            window_len: WINDOW_BASS,
        }
    }

    fn analyze(signal: &[f32]) -> Vec<f32> {
        let mut proc = SpectrumProcessor::new();
        proc.process(&signal[..WINDOW_BASS]).to_vec()
    }

    #[test]
    fn test_pure_tone_single_partial() {
        let signal = sine_wave(440.0, 0.9, SAMPLE_RATE, 400);
        let mags = analyze(&signal);
        let found = detect_partials(&mags, &params_for(69, 440.0), SearchGrid::Harmonic);
        assert_eq!(found.len(), 1, "pure tone should yield exactly n=1");
        assert_eq!(found[0].number, 1);
        assert!(
            (found[0].frequency - 440.0).abs() < 0.05,
            "reported {:.4} Hz",
            found[0].frequency
        );
        assert!(found[0].amplitude_db > -3.0);
    }

    /// Sub-bin accuracy across the keyboard, 32768-sample window.
    #[test]
    fn test_sine_accuracy_across_range() {
        for &freq in &[82.41, 440.0, 1318.51, 3951.07] {
            let midi = frequency_to_midi(freq).round() as u8;
            let signal = sine_wave(freq, 0.9, SAMPLE_RATE, 400);
            let mags = analyze(&signal);
            let found = detect_partials(&mags, &params_for(midi, freq), SearchGrid::Harmonic);
            assert!(!found.is_empty(), "{} Hz not detected", freq);
            assert!(
                (found[0].frequency - freq).abs() < 0.05,
                "{} Hz reported as {:.4}",
                freq,
                found[0].frequency
            );
        }
    }

    #[test]
    fn test_partial_stack_detected_in_order() {
        // C3 with mild stiffness, 10 partials falling 3 dB each
        let amps: Vec<f64> = falling_amps(10, 3.0).iter().map(|a| a * 0.2).collect();
        let signal = partial_stack(130.81, 3e-4, &amps, SAMPLE_RATE, 500);
        let mags = analyze(&signal);
        let found = detect_partials(&mags, &params_for(48, 130.81), SearchGrid::Harmonic);
        assert!(found.len() >= 6, "only {} partials found", found.len());
        for pair in found.windows(2) {
            assert!(pair[1].number > pair[0].number);
            assert!(pair[1].frequency > pair[0].frequency);
        }
        // The anchor partial for this register must be present
        assert!(found.iter().any(|p| p.number == 2));
    }

    #[test]
    fn test_second_pass_tracks_inharmonic_grid() {
        let b = 8e-4;
        let amps: Vec<f64> = falling_amps(8, 3.0).iter().map(|a| a * 0.2).collect();
        let signal = partial_stack(55.0, b, &amps, SAMPLE_RATE, 500);
        let mags = analyze(&signal);
        let found = detect_partials(
            &mags,
            &params_for(33, 55.0),
            SearchGrid::Inharmonic { f0: 55.0, b },
        );
        assert!(found.len() >= 5, "only {} partials on pass 2", found.len());
        // High partials sit where the stiff-string model predicts
        let p6 = found.iter().find(|p| p.number == 6).expect("n=6 missing");
        let expected = partial_frequency(6, 55.0, b);
        assert!((p6.frequency - expected).abs() < 0.2);
    }

    #[test]
    fn test_silence_yields_nothing() {
        let mags = vec![0.0f32; crate::types::HALF_SPECTRUM];
        let found = detect_partials(&mags, &params_for(69, 440.0), SearchGrid::Harmonic);
        assert!(found.is_empty());
    }

    #[test]
    fn test_weak_signal_below_threshold_rejected() {
        // -80 dB tone: below every base threshold
        let signal = sine_wave(440.0, 1e-4, SAMPLE_RATE, 400);
        let mags = analyze(&signal);
        let found = detect_partials(&mags, &params_for(69, 440.0), SearchGrid::Harmonic);
        assert!(found.is_empty());
    }

    #[test]
    fn test_parabolic_fallback_on_flat_data() {
        let flat = vec![0.5f32; 16];
        assert_eq!(parabolic_offset(&flat, 8), 0.0);
        let mut cliff = vec![1e-9f32; 16];
        cliff[8] = 0.5;
        // Neighbors at the floor: no usable curvature
        assert_eq!(parabolic_offset(&cliff, 8), 0.0);
    }
}
