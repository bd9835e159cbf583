//! Local noise-floor estimation for adaptive SNR thresholding.
//!
//! A fixed magnitude threshold either drowns weak bass partials or admits
//! noise in the treble. Instead, each partial search estimates the noise
//! floor near its own search window and the accept threshold adapts to it.

use crate::types::BIN_HZ;

/// Estimate the local noise floor around `center` with search half-range
/// `half_range` (both in bins).
///
/// Three sampling strategies run in order until at least five magnitudes
/// are collected:
/// 1. a ring around the signal, excluding 2.5x the search range so the
///    peak's own skirt is not counted,
/// 2. a sweep of everything below the signal,
/// 3. the 100-500 Hz reference band, when the signal sits well above it.
///
/// The floor is the median of the collected magnitudes, clamped to
/// [1e-6, 1e-2]. If fewer than five samples could be collected anywhere,
/// a mid-scale default of 1e-4 is returned.
pub fn noise_floor(mags: &[f32], center: usize, half_range: usize) -> f32 {
    let len = mags.len();
    if len < 2 {
        return 1e-4;
    }
    let r = half_range.max(1) as f64;
    let c = center as f64;
    let exclusion = 2.5 * r;
    let mut collected: Vec<f32> = Vec::with_capacity(48);

    // Around-signal ring
    let step = ((r / 2.0).round() as usize).max(1);
    let lo = ((c - 4.0 * r).max(1.0)) as usize;
    let hi = ((c + 4.0 * r) as usize).min(len - 1);
    let mut k = lo;
    while k <= hi {
        if (k as f64 - c).abs() >= exclusion {
            collected.push(mags[k]);
        }
        k += step;
    }

    // Below-signal sweep, finer step
    if collected.len() < 5 {
        let upper = c - exclusion;
        if upper >= 1.0 {
            let step = ((exclusion / 8.0).round() as usize).max(1);
            let mut k = 1usize;
            while (k as f64) <= upper {
                collected.push(mags[k]);
                k += step;
            }
        }
    }

    // Low-frequency reference band
    if collected.len() < 5 {
        let center_hz = c * BIN_HZ;
        if center_hz > 1000.0 {
            let band_lo = ((100.0 / BIN_HZ) as usize).max(1);
            let band_hi = ((500.0 / BIN_HZ) as usize).min(len - 1);
            let mut k = band_lo;
            while k <= band_hi {
                collected.push(mags[k]);
                k += 3;
            }
        }
    }

    if collected.len() < 5 {
        return 1e-4;
    }
    median(&mut collected).clamp(1e-6, 1e-2)
}

/// Accept threshold for a partial peak: the register/partial base floor or
/// three times the local noise, whichever is higher. Peaks near the scale
/// break are broader and noisier, so the bar is raised 20% there.
pub fn adaptive_threshold(freq_hz: f64, n: u32, noise: f32, near_break: bool) -> f32 {
    let mut t = base_threshold(freq_hz, n).max(3.0 * noise);
    if near_break {
        t *= 1.2;
    }
    t
}

/// Minimum linear magnitude for a credible partial, by frequency band and
/// partial number. Low frequencies and high partials are allowed weaker
/// peaks; treble fundamentals must stand well clear of the floor.
fn base_threshold(freq_hz: f64, n: u32) -> f32 {
    let by_n = |low_n: f32, mid_n: f32, high_n: f32| {
        if n <= 4 {
            low_n
        } else if n <= 8 {
            mid_n
        } else {
            high_n
        }
    };
    if freq_hz < 200.0 {
        by_n(8e-4, 5e-4, 3e-4)
    } else if freq_hz < 1000.0 {
        by_n(1e-3, 6e-4, 4e-4)
    } else if freq_hz < 3000.0 {
        by_n(1.5e-3, 1e-3, 6e-4)
    } else {
        by_n(2e-3, 1.5e-3, 1e-3)
    }
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values[values.len() / 2]
}
