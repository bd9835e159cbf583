//! Windowed, zero-padded forward FFT.
//!
//! All three analysis window lengths transform into the same FFT_OUT-point
//! spectrum: the windowed samples occupy the front of the buffer and the
//! rest is zero-padded, so downstream code sees one bin resolution
//! (2.93 Hz at 96 kHz) regardless of register.

use crate::dsp::blackman_harris;
use crate::types::{FFT_OUT, HALF_SPECTRUM, WINDOW_BASS, WINDOW_MID, WINDOW_TREBLE};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Analysis window length for a target note. Treble notes decay fast;
/// a shorter window keeps the analysis inside the usable sustain.
pub fn window_length_for_midi(midi: u8) -> usize {
    match midi {
        0..=71 => WINDOW_BASS,
        72..=78 => WINDOW_MID,
        _ => WINDOW_TREBLE,
    }
}

/// Reusable FFT pipeline: one forward plan of length FFT_OUT, precomputed
/// Blackman-Harris windows for the three analysis lengths, and scratch
/// buffers allocated once. `process` does no allocation.
pub struct SpectrumProcessor {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    /// (window length, coefficients, magnitude scale). The scale folds the
    /// window's coherent gain back out so a full-scale sine reads 1.0
    /// (0 dB) at its peak bin for every window length.
    windows: Vec<(usize, Vec<f32>, f32)>,
}

impl SpectrumProcessor {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_OUT);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        let windows = [WINDOW_BASS, WINDOW_MID, WINDOW_TREBLE]
            .iter()
            .map(|&len| {
                let coeffs = blackman_harris(len);
                let gain: f32 = coeffs.iter().sum();
                (len, coeffs, 2.0 / gain)
            })
            .collect();

        Self {
            fft,
            buffer: vec![Complex::default(); FFT_OUT],
            scratch,
            magnitudes: vec![0.0; HALF_SPECTRUM],
            windows,
        }
    }

    /// Window, zero-pad, and transform one frame. Returns the half-spectrum
    /// of linear magnitudes, valid until the next call.
    ///
    /// # Panics
    /// If `samples.len()` is not one of the three analysis window lengths.
    pub fn process(&mut self, samples: &[f32]) -> &[f32] {
        let idx = self
            .windows
            .iter()
            .position(|(len, _, _)| *len == samples.len())
            .expect("frame length must be one of the analysis window lengths");
        let scale = self.windows[idx].2;
        let window = &self.windows[idx].1;

        for (i, (&s, &w)) in samples.iter().zip(window.iter()).enumerate() {
            self.buffer[i] = Complex { re: s * w, im: 0.0 };
        }
        for slot in self.buffer[samples.len()..].iter_mut() {
            *slot = Complex::default();
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (mag, c) in self.magnitudes.iter_mut().zip(self.buffer.iter()) {
            *mag = c.norm() * scale;
        }
        &self.magnitudes
    }
}

impl Default for SpectrumProcessor {
    fn default() -> Self {
        Self::new()
    }
}
