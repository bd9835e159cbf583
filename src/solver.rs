//! Iterative (f0, B) refinement.
//!
//! f0 and B are mutually dependent: the deviation points that produce B are
//! computed against f0, and f0 is back-solved from an anchor partial using
//! B. A few rounds of fixed-point iteration settle both; in practice the
//! loop converges in 2-3 rounds on clean data.

use crate::inharmonicity::estimate_b;
use crate::physics::anchor_partial;
use crate::types::PartialResult;

#[derive(Debug, Clone, Copy)]
pub struct SolveParams {
    pub midi: u8,
    pub target_hz: f64,
    pub scale_break_midi: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct Solution {
    pub f0: f64,
    pub b: f64,
    /// Partial number actually used to extract f0.
    pub anchor: u32,
}

const MAX_ITERATIONS: usize = 5;
const CONVERGENCE_HZ: f64 = 0.01;
/// Anchor candidates must be at least this loud.
const ANCHOR_FLOOR_DB: f64 = -60.0;

/// Solve for (f0, B) from one frame's detected partials.
pub fn solve(partials: &[PartialResult], params: &SolveParams) -> Solution {
    let preferred = anchor_partial(params.midi);
    let mut f0 = seed_f0(partials, params.target_hz);
    let mut b = 0.0;
    let mut anchor_used = preferred;

    for _ in 0..MAX_ITERATIONS {
        b = estimate_b(partials, f0, params.midi, params.scale_break_midi);

        let anchor = match select_anchor(partials, preferred) {
            Some(p) => p,
            None => break, // nothing to update from; keep the seed
        };
        anchor_used = anchor.number;

        let n = anchor.number as f64;
        let next = anchor.frequency / (n * (1.0 + b * n * n).sqrt());
        let delta = (next - f0).abs();
        f0 = next;
        if delta < CONVERGENCE_HZ {
            break;
        }
    }

    // Degenerate frames (no partials at all) never enter the B estimate
    // above; make sure b still carries the register prior.
    if partials.is_empty() {
        b = estimate_b(partials, f0, params.midi, params.scale_break_midi);
    }

    Solution {
        f0,
        b,
        anchor: anchor_used,
    }
}

/// First f0 guess from the loudest low partials; the target frequency when
/// nothing usable was detected.
fn seed_f0(partials: &[PartialResult], target_hz: f64) -> f64 {
    let candidates: Vec<&PartialResult> = partials
        .iter()
        .filter(|p| p.number >= 1 && p.number <= 8 && p.amplitude_db > -40.0)
        .collect();
    match candidates.len() {
        0 => target_hz,
        1 => candidates[0].frequency / candidates[0].number as f64,
        _ => {
            // Weighted mean of f_n / n; low partials deviate least
            let mut num = 0.0;
            let mut den = 0.0;
            for p in &candidates {
                let n = p.number as f64;
                let w = 1.0 / n;
                num += w * p.frequency / n;
                den += w;
            }
            num / den
        }
    }
}

/// The register's preferred anchor if it was detected and is loud enough;
/// otherwise the strongest acceptable partial.
fn select_anchor<'a>(partials: &'a [PartialResult], preferred: u32) -> Option<&'a PartialResult> {
    if let Some(p) = partials
        .iter()
        .find(|p| p.number == preferred && p.amplitude_db >= ANCHOR_FLOOR_DB)
    {
        return Some(p);
    }
    partials
        .iter()
        .filter(|p| p.amplitude_db >= ANCHOR_FLOOR_DB)
        .max_by(|a, b| {
            a.amplitude_db
                .partial_cmp(&b.amplitude_db)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
