//! The measurement engine: attack-triggered capture state machine.
//!
//! # States
//!
//! - **Idle** — no target; incoming audio is ignored.
//! - **Armed** — a target note is set. Spectra are produced for observers
//!   but no measurements are taken until an attack is heard.
//! - **Measuring** — an attack arrived. Every completed FFT yields at most
//!   one candidate measurement; the best of the last ten is what observers
//!   see.
//! - **Locked** — three consecutive green frames committed a best
//!   measurement. Audio is still accepted but not analyzed until the
//!   target changes or the analyzer is reset.
//!
//! The analyzer owns all of its buffers and is single-threaded: blocks
//! must arrive sequentially, and the control operations must be called
//! from the delivery thread (or under external mutual exclusion).
//! Observers get values by copy over channels and cannot reach back in.

use crate::dsp::{amplitude_db, compute_rms};
use crate::fft::{window_length_for_midi, SpectrumProcessor};
use crate::inharmonicity::{classify_break_region, BHistory, BreakRegion};
use crate::peaks::{detect_partials, SearchGrid, SearchParams};
use crate::physics::{midi_to_frequency, midi_to_note_name, typical_inharmonicity};
use crate::solver::{solve, SolveParams};
use crate::spectrum::{CaptureBuffer, FrameAverager};
use crate::types::{
    AnalyzerEvent, ConfigError, NoteMeasurement, NoteTarget, PianoMetadata, Quality, SessionClock,
    SpectrumSnapshot, BIN_HZ, HALF_SPECTRUM, MIDI_MAX, MIDI_MIN, WINDOW_BASS,
};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Armed,
    Measuring,
    Locked,
}

/// Attack: block RMS jumps by this much over the previous block...
const ATTACK_DELTA_DB: f64 = 15.0;
/// ...and lands above this absolute level.
const ATTACK_FLOOR_DB: f64 = -45.0;
/// Supplied target frequencies must agree with equal temperament to 1e-4.
const TARGET_FREQ_TOLERANCE: f64 = 1e-4;
/// Rolling candidate-measurement buffer depth.
const MEASUREMENT_BUFFER: usize = 10;
/// Consecutive green frames required to lock.
const GREENS_TO_LOCK: u32 = 3;

pub struct NoteAnalyzer {
    state: State,
    target: Option<NoteTarget>,
    metadata: Option<PianoMetadata>,
    processor: SpectrumProcessor,
    capture: CaptureBuffer,
    averager: FrameAverager,
    /// Averaged magnitudes of the frame currently being analyzed.
    frame_mags: Vec<f32>,
    b_history: BHistory,
    measurements: Vec<NoteMeasurement>,
    consecutive_green: u32,
    prev_block_db: f64,
    clock: SessionClock,
    event_txs: Vec<Sender<AnalyzerEvent>>,
}

impl NoteAnalyzer {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            target: None,
            metadata: None,
            processor: SpectrumProcessor::new(),
            capture: CaptureBuffer::new(WINDOW_BASS),
            averager: FrameAverager::new(),
            frame_mags: vec![0.0; HALF_SPECTRUM],
            b_history: BHistory::new(typical_inharmonicity(60)),
            measurements: Vec::with_capacity(MEASUREMENT_BUFFER),
            consecutive_green: 0,
            prev_block_db: -100.0,
            clock: SessionClock::new(),
            event_txs: Vec::new(),
        }
    }

    /// Register an observer. Events arrive in production order, always
    /// from the thread driving `process_audio_buffer`.
    pub fn subscribe(&mut self) -> Receiver<AnalyzerEvent> {
        let (tx, rx) = unbounded();
        self.event_txs.push(tx);
        rx
    }

    // ─── Control surface ────────────────────────────────────────────────

    /// Describe the instrument. Validated; survives target changes and
    /// drives scale-break handling for every subsequent measurement.
    pub fn set_piano_metadata(&mut self, metadata: PianoMetadata) -> Result<(), ConfigError> {
        metadata.validate()?;
        info!(
            "Piano: {} {:.0} cm, scale break at MIDI {}",
            metadata.piano_type, metadata.length_cm, metadata.scale_break_midi
        );
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Set the note to measure and arm the analyzer. Clears all capture
    /// state; a locked analyzer unlocks.
    pub fn set_target_note(&mut self, midi: u8, frequency_hz: f64) -> Result<(), ConfigError> {
        if !(MIDI_MIN..=MIDI_MAX).contains(&midi) {
            return Err(ConfigError::MidiOutOfRange(midi));
        }
        let expected = midi_to_frequency(midi as f64);
        if ((frequency_hz - expected) / expected).abs() > TARGET_FREQ_TOLERANCE {
            return Err(ConfigError::FrequencyMismatch {
                midi,
                expected,
                got: frequency_hz,
            });
        }

        self.target = Some(NoteTarget::new(midi, frequency_hz));
        self.capture.set_window_len(window_length_for_midi(midi));
        self.averager.clear();
        self.b_history.reset(typical_inharmonicity(midi));
        self.measurements.clear();
        self.consecutive_green = 0;
        self.prev_block_db = -100.0;
        self.state = State::Armed;
        debug!(
            "Target {} (MIDI {}) at {:.2} Hz, window {}",
            midi_to_note_name(midi),
            midi,
            frequency_hz,
            self.capture.window_len()
        );
        Ok(())
    }

    /// Universal cancellation: clear everything and return to idle.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.target = None;
        self.capture.clear();
        self.averager.clear();
        self.measurements.clear();
        self.consecutive_green = 0;
        self.prev_block_db = -100.0;
        info!("Analyzer reset");
    }

    pub fn is_measurement_locked(&self) -> bool {
        self.state == State::Locked
    }

    /// The committed measurement, once locked.
    pub fn locked_measurement(&self) -> Option<&NoteMeasurement> {
        if self.state == State::Locked {
            self.best_measurement()
        } else {
            None
        }
    }

    // ─── Audio path ─────────────────────────────────────────────────────

    /// Feed a block of mono samples. Block size is arbitrary; framing and
    /// overlap are handled internally.
    pub fn process_audio_buffer(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        match self.state {
            State::Idle | State::Locked => return, // accepted, not analyzed
            State::Armed | State::Measuring => {}
        }

        let block_db = amplitude_db(compute_rms(samples) as f64);
        if self.state == State::Armed
            && block_db - self.prev_block_db > ATTACK_DELTA_DB
            && block_db > ATTACK_FLOOR_DB
        {
            debug!(
                "Attack: {:.1} dB (was {:.1} dB)",
                block_db, self.prev_block_db
            );
            self.state = State::Measuring;
            self.measurements.clear();
            self.consecutive_green = 0;
        }
        self.prev_block_db = block_db;

        self.capture.push(samples);
        while self.capture.ready() {
            let mags = self.processor.process(self.capture.frame());
            self.averager.push(mags);
            self.capture.advance();

            // Everything downstream sees the multi-frame average
            let averaged = self.averager.averaged();
            self.frame_mags.copy_from_slice(averaged);

            self.emit_spectrum();

            if self.state == State::Measuring && self.averager.ready() {
                self.analyze_frame();
                if self.state == State::Locked {
                    break;
                }
            }
        }
    }

    // ─── Frame analysis ─────────────────────────────────────────────────

    fn analyze_frame(&mut self) {
        let target = match self.target {
            Some(t) => t,
            None => return,
        };
        let scale_break = self.metadata.map(|m| m.scale_break_midi);

        let search = SearchParams {
            midi: target.midi,
            target_hz: target.frequency,
            scale_break_midi: scale_break,
            smoothed_b: self.b_history.smoothed(),
            window_len: self.capture.window_len(),
        };
        let solve_params = SolveParams {
            midi: target.midi,
            target_hz: target.frequency,
            scale_break_midi: scale_break,
        };

        // Pass 1: harmonic grid, generous windows
        let coarse = detect_partials(&self.frame_mags, &search, SearchGrid::Harmonic);
        let first = solve(&coarse, &solve_params);

        // Pass 2: re-search on the inharmonic grid with the estimate in hand
        let refined = detect_partials(
            &self.frame_mags,
            &search,
            SearchGrid::Inharmonic {
                f0: first.f0,
                b: first.b,
            },
        );
        let (partials, solution) = if refined.is_empty() {
            (coarse, first)
        } else {
            let s = solve(&refined, &solve_params);
            (refined, s)
        };

        let transition = matches!(
            classify_break_region(target.midi, scale_break),
            Some(BreakRegion::Transition)
        );
        let quality = classify_quality(partials.len(), transition);

        trace!(
            "frame: {} partials, f0={:.3} Hz, B={:.2e}, {}",
            partials.len(),
            solution.f0,
            solution.b,
            quality
        );

        // Accept filter: a fundamental outside ±50 cents of the target is
        // somebody else's note. Discard silently; counters hold.
        if !target.accepts(solution.f0) {
            trace!("discarded: f0 {:.2} outside accept window", solution.f0);
            return;
        }

        self.b_history.push(solution.b);

        let measurement = NoteMeasurement {
            midi_index: target.midi,
            note_name: midi_to_note_name(target.midi),
            target_frequency: target.frequency,
            calculated_fundamental: solution.f0,
            inharmonicity_coefficient: solution.b,
            measured_partial_number: solution.anchor,
            quality,
            detected_partials: partials,
            measured_at: Utc::now(),
        };

        if self.measurements.len() == MEASUREMENT_BUFFER {
            self.measurements.remove(0);
        }
        self.measurements.push(measurement);

        if quality == Quality::Green {
            self.consecutive_green += 1;
        } else {
            self.consecutive_green = 0;
        }

        let best = match self.best_measurement() {
            Some(m) => m.clone(),
            None => return,
        };
        self.emit(AnalyzerEvent::MeasurementUpdated(best.clone()));

        if self.consecutive_green >= GREENS_TO_LOCK {
            info!(
                "Auto-stop: {} locked at f0={:.3} Hz, B={:.2e} ({})",
                best.note_name, best.calculated_fundamental, best.inharmonicity_coefficient, best.quality
            );
            self.state = State::Locked;
            self.emit(AnalyzerEvent::MeasurementAutoStopped(best));
        }
    }

    /// Best of the rolling buffer: quality first, then partial count,
    /// then first-partial amplitude.
    fn best_measurement(&self) -> Option<&NoteMeasurement> {
        self.measurements.iter().max_by(|a, b| {
            a.quality
                .rank()
                .cmp(&b.quality.rank())
                .then(a.detected_partials.len().cmp(&b.detected_partials.len()))
                .then(
                    first_partial_amp(a)
                        .partial_cmp(&first_partial_amp(b))
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        })
    }

    fn emit_spectrum(&self) {
        let target = match self.target {
            Some(t) => t,
            None => return,
        };
        if self.event_txs.is_empty() {
            return;
        }
        let snapshot = SpectrumSnapshot {
            magnitudes: self.frame_mags.clone(),
            bin_hz: BIN_HZ,
            target_frequency: target.frequency,
            target_midi: target.midi,
            note_name: midi_to_note_name(target.midi),
            timestamp_us: self.clock.now_us(),
        };
        self.emit(AnalyzerEvent::RawSpectrumUpdated(snapshot));
    }

    fn emit(&self, event: AnalyzerEvent) {
        for tx in &self.event_txs {
            let _ = tx.send(event.clone());
        }
    }
}

impl Default for NoteAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn first_partial_amp(m: &NoteMeasurement) -> f64 {
    m.detected_partials
        .first()
        .map(|p| p.amplitude_db)
        .unwrap_or(f64::NEG_INFINITY)
}

fn classify_quality(partial_count: usize, transition: bool) -> Quality {
    if transition {
        // Peaks smear near the break; demand more evidence
        if partial_count > 7 {
            Quality::Green
        } else if partial_count > 4 {
            Quality::Orange
        } else {
            Quality::Red
        }
    } else if partial_count > 5 {
        Quality::Green
    } else if partial_count > 2 {
        Quality::Orange
    } else {
        Quality::Red
    }
}
