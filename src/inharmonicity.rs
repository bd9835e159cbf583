//! Inharmonicity coefficient estimation.
//!
//! With a fundamental estimate f0 in hand, each partial contributes a
//! deviation point x = n^2, y = (f_n / (n*f0))^2 - 1; for a stiff string
//! y = B*x. B comes from a weighted least-squares fit over those points,
//! weighted 1/n^2 because low partials are measured far more reliably.
//! Near the bass/treble string transition the fit is restricted and a
//! conservative fallback takes over when the data cannot support it.

use crate::physics::{inharmonicity_range, typical_inharmonicity};
use crate::types::{PartialResult, B_HISTORY_LEN};
use std::collections::VecDeque;

// ─── Scale-break classification ─────────────────────────────────────────────

/// Where a note sits relative to the wound/plain string transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakRegion {
    /// Within the break neighborhood, on the wound-bass side.
    WoundStrings,
    /// At the break itself (±1 semitone). B is unreliable here.
    Transition,
    /// Within the break neighborhood, on the plain-steel side.
    PlainStrings,
}

/// Classify a note against the scale break. `None` when no metadata is set
/// or the note is more than 3 semitones away.
pub fn classify_break_region(midi: u8, scale_break: Option<u8>) -> Option<BreakRegion> {
    let bk = scale_break? as i32;
    let d = midi as i32 - bk;
    if d.abs() > 3 {
        return None;
    }
    Some(if d < -1 {
        BreakRegion::WoundStrings
    } else if d > 1 {
        BreakRegion::PlainStrings
    } else {
        BreakRegion::Transition
    })
}

// ─── Estimation ─────────────────────────────────────────────────────────────

/// Estimate B from measured partials and a fundamental estimate.
///
/// Falls back to the register prior whenever the data cannot support a
/// fit; the result is always inside the register's plausible range.
pub fn estimate_b(partials: &[PartialResult], f0: f64, midi: u8, scale_break: Option<u8>) -> f64 {
    let (b_min, b_max) = inharmonicity_range(midi);
    if f0 <= 0.0 {
        return typical_inharmonicity(midi);
    }

    let b = match classify_break_region(midi, scale_break) {
        Some(BreakRegion::Transition) => transition_fit(partials, f0, midi, scale_break),
        _ => standard_fit(partials, f0, midi),
    };
    b.clamp(b_min, b_max)
}

/// Deviation points (n, y) for partials inside the given n range and
/// above the amplitude floor.
fn deviation_points(
    partials: &[PartialResult],
    f0: f64,
    n_min: u32,
    n_max: u32,
    min_amp_db: f64,
) -> Vec<(u32, f64)> {
    partials
        .iter()
        .filter(|p| p.number >= n_min && p.number <= n_max && p.amplitude_db > min_amp_db)
        .filter(|p| p.frequency > 0.0)
        .map(|p| {
            let ratio = p.frequency / (p.number as f64 * f0);
            (p.number, ratio * ratio - 1.0)
        })
        .collect()
}

fn standard_fit(partials: &[PartialResult], f0: f64, midi: u8) -> f64 {
    let pts = deviation_points(partials, f0, 2, 12, -50.0);
    if pts.len() < 3 {
        return typical_inharmonicity(midi);
    }

    let y_max = if midi >= 72 { 0.3 } else { 0.5 };
    let kept: Vec<(u32, f64)> = pts
        .into_iter()
        .filter(|&(_, y)| (-0.05..=y_max).contains(&y))
        .collect();
    if kept.len() < 2 {
        return typical_inharmonicity(midi);
    }

    match weighted_slope(&kept) {
        Some(b) if b >= 0.0 => b,
        Some(_) => slope_analysis(&kept, midi),
        None => typical_inharmonicity(midi),
    }
}

/// In the transition zone only the low partials behave; higher ones mix
/// wound and plain character and wreck the fit.
fn transition_fit(partials: &[PartialResult], f0: f64, midi: u8, scale_break: Option<u8>) -> f64 {
    let kept: Vec<(u32, f64)> = deviation_points(partials, f0, 2, 5, -50.0)
        .into_iter()
        .filter(|&(_, y)| (-0.1..=0.8).contains(&y))
        .collect();
    if kept.len() < 3 {
        return conservative_transition_b(midi, scale_break);
    }
    match weighted_slope(&kept) {
        Some(b) if b >= 0.0 => b,
        Some(_) => slope_analysis(&kept, midi),
        None => conservative_transition_b(midi, scale_break),
    }
}

/// Conservative B when a transition-zone fit is impossible.
fn conservative_transition_b(midi: u8, scale_break: Option<u8>) -> f64 {
    match scale_break {
        Some(bk) if midi < bk => 6e-4, // wound side
        Some(_) => 2e-4,               // plain side
        None => 3e-4,
    }
}

/// Weighted least-squares slope of y over x = n^2, weights 1/n^2.
/// `None` when the system is degenerate.
fn weighted_slope(pts: &[(u32, f64)]) -> Option<f64> {
    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swy = 0.0;
    let mut swxy = 0.0;
    let mut swxx = 0.0;
    for &(n, y) in pts {
        let x = (n as f64) * (n as f64);
        let w = 1.0 / x;
        sw += w;
        swx += w * x;
        swy += w * y;
        swxy += w * x * y;
        swxx += w * x * x;
    }
    let denom = sw * swxx - swx * swx;
    if denom.abs() < 1e-12 {
        return None;
    }
    Some((sw * swxy - swx * swy) / denom)
}

/// Salvage pass when regression goes negative. Mostly-nonpositive
/// deviations mean the points are noise: return the register prior.
/// Otherwise the median positive deviation gives a single-point estimate.
fn slope_analysis(pts: &[(u32, f64)], midi: u8) -> f64 {
    let nonpositive = pts.iter().filter(|&&(_, y)| y <= 0.0).count();
    if nonpositive * 2 >= pts.len() {
        return typical_inharmonicity(midi);
    }
    let mut positives: Vec<(u32, f64)> = pts.iter().copied().filter(|&(_, y)| y > 0.0).collect();
    positives.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let (n_med, y_med) = positives[positives.len() / 2];
    y_med / ((n_med as f64) * (n_med as f64))
}

// ─── Smoothing history ──────────────────────────────────────────────────────

/// Rolling history of accepted B values. The mean feeds back into the next
/// frame's search-window scaling.
pub struct BHistory {
    values: VecDeque<f64>,
}

impl BHistory {
    pub fn new(seed: f64) -> Self {
        let mut values = VecDeque::with_capacity(B_HISTORY_LEN);
        values.push_back(seed);
        Self { values }
    }

    /// Drop the history and restart from a register prior.
    pub fn reset(&mut self, seed: f64) {
        self.values.clear();
        self.values.push_back(seed);
    }

    pub fn push(&mut self, b: f64) {
        if self.values.len() == B_HISTORY_LEN {
            self.values.pop_front();
        }
        self.values.push_back(b);
    }

    pub fn smoothed(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }
}
