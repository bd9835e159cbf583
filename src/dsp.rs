//! Shared DSP primitives: RMS, dB conversion, Blackman-Harris coefficients,
//! and test signal generators.

/// Root mean square of an audio buffer.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Amplitude in dB. Silence floors at -100 dB rather than -inf so
/// RMS deltas stay finite.
pub fn amplitude_db(linear: f64) -> f64 {
    20.0 * linear.max(1e-5).log10()
}

/// 4-term Blackman-Harris window coefficients for a given length.
///
/// -92 dB sidelobes; the peak finder relies on that rejection to keep
/// neighboring partials out of each other's search windows.
pub fn blackman_harris(len: usize) -> Vec<f32> {
    const A0: f64 = 0.35875;
    const A1: f64 = 0.48829;
    const A2: f64 = 0.14128;
    const A3: f64 = 0.01168;
    let denom = (len - 1) as f64;
    (0..len)
        .map(|i| {
            let x = 2.0 * std::f64::consts::PI * i as f64 / denom;
            (A0 - A1 * x.cos() + A2 * (2.0 * x).cos() - A3 * (3.0 * x).cos()) as f32
        })
        .collect()
}
