//! String physics and register tables.
//!
//! Partial frequencies of a stiff piano string follow the Fletcher & Rossing
//! model f_n = n * f0 * sqrt(1 + B*n^2), where B is the dimensionless
//! inharmonicity coefficient: O(1e-5) in the treble rising to O(1e-3) in the
//! wound deep bass. Everything register-dependent in the analyzer (search
//! windows, partial ceilings, anchor choice, B priors) lives here as plain
//! lookups on the MIDI index.

/// Convert a MIDI note number to Hz. A4 = MIDI 69 = 440 Hz.
pub fn midi_to_frequency(midi: f64) -> f64 {
    440.0 * 2.0_f64.powf((midi - 69.0) / 12.0)
}

/// Convert Hz to a (fractional) MIDI note number.
pub fn frequency_to_midi(hz: f64) -> f64 {
    69.0 + 12.0 * (hz / 440.0).log2()
}

/// Deviation of `measured` from `target` in cents. Zero when either
/// frequency is non-positive.
pub fn frequency_to_cents(measured: f64, target: f64) -> f64 {
    if measured <= 0.0 || target <= 0.0 {
        return 0.0;
    }
    1200.0 * (measured / target).log2()
}

/// Note name with octave, "C-1" (MIDI 0) through "G9" (MIDI 127).
/// MIDI 69 = "A4".
pub fn midi_to_note_name(midi: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    let octave = midi as i32 / 12 - 1;
    format!("{}{}", NAMES[midi as usize % 12], octave)
}

/// Frequency of the n-th partial of a stiff string.
pub fn partial_frequency(n: u32, f0: f64, b: f64) -> f64 {
    let n = n as f64;
    n * f0 * (1.0 + b * n * n).sqrt()
}

// ─── Register tables ────────────────────────────────────────────────────────

/// Typical inharmonicity coefficient for a note's register. Used as the
/// fallback when regression has too few points and as the smoothed-B seed
/// when a new target is set.
pub fn typical_inharmonicity(midi: u8) -> f64 {
    match midi {
        0..=35 => 8e-4,
        36..=47 => 5e-4,
        48..=60 => 3e-4,
        61..=72 => 1.5e-4,
        73..=84 => 1e-4,
        // High treble: B rises again as strings shorten. Ramp linearly
        // across the band rather than stepping at 85.
        _ => ramp(midi, 1.5e-4, 4e-4),
    }
}

/// Plausible (min, max) B for a note's register. Regression output is
/// clamped into this range before acceptance.
pub fn inharmonicity_range(midi: u8) -> (f64, f64) {
    match midi {
        0..=35 => (3e-4, 3e-3),
        36..=47 => (2e-4, 1e-3),
        48..=60 => (1e-4, 6e-4),
        61..=72 => (5e-5, 3e-4),
        73..=84 => (3e-5, 2e-4),
        _ => (5e-5, ramp(midi, 4e-4, 1e-3)),
    }
}

/// Linear interpolation across the MIDI 85-108 band.
fn ramp(midi: u8, at_85: f64, at_108: f64) -> f64 {
    let t = (midi.clamp(85, 108) - 85) as f64 / 23.0;
    at_85 + t * (at_108 - at_85)
}

/// Highest partial number searched for a note. Treble partials run out of
/// spectrum (and out of energy) quickly.
pub fn max_partial(midi: u8) -> u32 {
    match midi {
        0..=60 => 16,
        61..=72 => 14,
        73..=84 => 12,
        _ => 8,
    }
}

/// Preferred anchor partial for f0 extraction. Deep bass fundamentals are
/// weak or missing entirely; the anchor is the partial whose measured
/// frequency is back-solved to f0.
pub fn anchor_partial(midi: u8) -> u32 {
    match midi {
        0..=35 => 6,
        36..=47 => 3,
        48..=60 => 2,
        _ => 1,
    }
}

/// Base half-width of the partial search window, in cents. Widest in the
/// bass where inharmonicity stretch is largest and peaks are broad.
pub fn search_window_base_cents(midi: u8) -> f64 {
    match midi {
        0..=35 => 30.0,
        36..=47 => 25.0,
        48..=60 => 20.0,
        61..=72 => 15.0,
        73..=84 => 12.0,
        _ => 10.0,
    }
}
