use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Piano metadata ─────────────────────────────────────────────────────────

/// Piano body type. Drives nothing in the analysis directly; kept with the
/// session document so stored measurements can be compared across pianos
/// of the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PianoType {
    Spinet,
    Console,
    ProfessionalUpright,
    BabyGrand,
    ParlorGrand,
    SemiConcertGrand,
    ConcertGrand,
    Unknown,
}

impl PianoType {
    /// Map a UI dropdown index to a canonical type.
    ///
    /// Index 2 is labeled "Studio" in the selection UI but maps to `Console`:
    /// studio uprights share the console string scale closely enough that
    /// the stored measurement tables never distinguish them. Documents
    /// written with either label read back as `Console`.
    pub fn from_dropdown_index(index: usize) -> Self {
        match index {
            0 => PianoType::Spinet,
            1 => PianoType::Console,
            2 => PianoType::Console, // "Studio"
            3 => PianoType::ProfessionalUpright,
            4 => PianoType::BabyGrand,
            5 => PianoType::ParlorGrand,
            6 => PianoType::SemiConcertGrand,
            7 => PianoType::ConcertGrand,
            _ => PianoType::Unknown,
        }
    }
}

impl fmt::Display for PianoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PianoType::Spinet => "Spinet",
            PianoType::Console => "Console",
            PianoType::ProfessionalUpright => "Professional Upright",
            PianoType::BabyGrand => "Baby Grand",
            PianoType::ParlorGrand => "Parlor Grand",
            PianoType::SemiConcertGrand => "Semi-Concert Grand",
            PianoType::ConcertGrand => "Concert Grand",
            PianoType::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Instrument description, set once per session.
///
/// `scale_break_midi` is the note where wound bass strings yield to plain
/// steel strings. Inharmonicity jumps by a factor of 2-4 across the break,
/// so the estimator widens its search and switches regression strategy for
/// notes within ±3 semitones of it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PianoMetadata {
    pub piano_type: PianoType,
    /// Overall length (grands) or height (uprights), centimeters.
    pub length_cm: f32,
    /// MIDI index of the first plain-steel note. Typically 36-54.
    pub scale_break_midi: u8,
}

impl PianoMetadata {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(80.0..=300.0).contains(&self.length_cm) {
            return Err(ConfigError::LengthOutOfRange(self.length_cm));
        }
        if !(36..=54).contains(&self.scale_break_midi) {
            return Err(ConfigError::ScaleBreakOutOfRange(self.scale_break_midi));
        }
        Ok(())
    }
}

// ─── Note target ────────────────────────────────────────────────────────────

/// The note currently being measured. Exactly one target is active while
/// the analyzer is not idle.
#[derive(Debug, Clone, Copy)]
pub struct NoteTarget {
    pub midi: u8,
    /// Equal-temperament frequency for the target, Hz.
    pub frequency: f64,
    /// Accept window: f0 must land within ±50 cents of the target.
    pub window_min_hz: f64,
    pub window_max_hz: f64,
}

impl NoteTarget {
    pub fn new(midi: u8, frequency: f64) -> Self {
        let half = 2.0_f64.powf(50.0 / 1200.0);
        Self {
            midi,
            frequency,
            window_min_hz: frequency / half,
            window_max_hz: frequency * half,
        }
    }

    pub fn accepts(&self, f0: f64) -> bool {
        f0 >= self.window_min_hz && f0 <= self.window_max_hz
    }
}

// ─── Measurement results ────────────────────────────────────────────────────

/// One detected partial of a struck note.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PartialResult {
    /// Partial number, n >= 1. The fundamental is n = 1.
    #[serde(rename = "n")]
    pub number: u32,
    /// Measured frequency, Hz.
    pub frequency: f64,
    /// Peak amplitude, dB (20*log10 of linear magnitude).
    #[serde(rename = "amplitude")]
    pub amplitude_db: f64,
}

/// Per-frame measurement quality, from the number of partials detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Green,
    Orange,
    Red,
}

impl Quality {
    /// Rank for best-measurement selection. Higher is better.
    pub fn rank(&self) -> u8 {
        match self {
            Quality::Green => 3,
            Quality::Orange => 2,
            Quality::Red => 1,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Quality::Green => "green",
            Quality::Orange => "orange",
            Quality::Red => "red",
        };
        write!(f, "{}", s)
    }
}

/// A complete measurement of one note.
///
/// Serialized field names follow the session document schema (camelCase),
/// so `load(save(x))` round-trips against documents written by other tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMeasurement {
    pub midi_index: u8,
    pub note_name: String,
    /// Equal-temperament target, Hz.
    pub target_frequency: f64,
    /// True string fundamental recovered under inharmonicity, Hz.
    pub calculated_fundamental: f64,
    /// Inharmonicity coefficient B, dimensionless.
    pub inharmonicity_coefficient: f64,
    /// Partial number actually used as the anchor for f0 extraction.
    pub measured_partial_number: u32,
    pub quality: Quality,
    /// Detected partials, strictly increasing in n.
    pub detected_partials: Vec<PartialResult>,
    pub measured_at: DateTime<Utc>,
}

// ─── Spectrum snapshot ──────────────────────────────────────────────────────

/// Half-spectrum magnitudes for external visualizers, emitted once per FFT.
#[derive(Debug, Clone)]
pub struct SpectrumSnapshot {
    /// Linear magnitudes, length FFT_OUT / 2.
    pub magnitudes: Vec<f32>,
    /// Frequency resolution, Hz per bin.
    pub bin_hz: f64,
    pub target_frequency: f64,
    pub target_midi: u8,
    pub note_name: String,
    pub timestamp_us: u64,
}

// ─── Analyzer events ────────────────────────────────────────────────────────

/// Events produced by the analyzer, delivered in production order.
/// Observers receive values by copy; the only way back into the analyzer
/// is through its control operations.
#[derive(Debug, Clone)]
pub enum AnalyzerEvent {
    /// Best-so-far measurement after each accepted frame while measuring.
    MeasurementUpdated(NoteMeasurement),
    /// Averaged spectrum, once per FFT while armed or measuring.
    RawSpectrumUpdated(SpectrumSnapshot),
    /// Fired once on the transition to the locked state.
    MeasurementAutoStopped(NoteMeasurement),
}

// ─── Audio data ─────────────────────────────────────────────────────────────

/// A block of mono audio samples from the capture device (or a WAV file).
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Microseconds since session start (timestamp of first sample).
    pub timestamp_us: u64,
    /// Mono f32 samples, normalized -1.0 to 1.0.
    pub samples: Vec<f32>,
    /// Sample rate in Hz. The analyzer requires 96000.
    pub sample_rate: u32,
}

// ─── Configuration errors ───────────────────────────────────────────────────

/// Errors from the analyzer's control operations. Surfaced synchronously;
/// analyzer state is left untouched when one is returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// MIDI index outside the piano range 21-108.
    MidiOutOfRange(u8),
    /// Supplied target frequency disagrees with equal temperament (A4=440).
    FrequencyMismatch { midi: u8, expected: f64, got: f64 },
    /// Piano length outside 80-300 cm.
    LengthOutOfRange(f32),
    /// Scale break outside MIDI 36-54.
    ScaleBreakOutOfRange(u8),
    /// Capture opened at a rate the analyzer cannot use.
    UnsupportedSampleRate(u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MidiOutOfRange(m) => {
                write!(f, "MIDI index {} outside piano range 21-108", m)
            }
            ConfigError::FrequencyMismatch { midi, expected, got } => write!(
                f,
                "frequency {:.4} Hz does not match equal temperament for MIDI {} ({:.4} Hz)",
                got, midi, expected
            ),
            ConfigError::LengthOutOfRange(l) => {
                write!(f, "piano length {:.0} cm outside 80-300 cm", l)
            }
            ConfigError::ScaleBreakOutOfRange(m) => {
                write!(f, "scale break MIDI {} outside 36-54", m)
            }
            ConfigError::UnsupportedSampleRate(r) => {
                write!(f, "sample rate {} Hz unsupported (need {})", r, SAMPLE_RATE)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the capture session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Constants ──────────────────────────────────────────────────────────────

/// Required capture rate. Other rates are rejected at the capture boundary.
pub const SAMPLE_RATE: u32 = 96_000;

/// FFT output length after zero-padding. 96000 / 32768 = 2.93 Hz/bin.
pub const FFT_OUT: usize = 32_768;

/// Usable half-spectrum length.
pub const HALF_SPECTRUM: usize = FFT_OUT / 2;

/// Frequency resolution of every spectrum, regardless of analysis window.
pub const BIN_HZ: f64 = SAMPLE_RATE as f64 / FFT_OUT as f64;

/// Analysis window lengths by register. Treble notes decay in under 100 ms,
/// so shorter windows keep the sustain inside the frame; zero-padding to
/// FFT_OUT keeps bin resolution uniform downstream.
pub const WINDOW_BASS: usize = 32_768; // MIDI <= 71
pub const WINDOW_MID: usize = 16_384; // MIDI 72-78
pub const WINDOW_TREBLE: usize = 8_192; // MIDI >= 79

/// Magnitude frames averaged per emitted spectrum.
pub const FRAME_AVG_DEPTH: usize = 3;
/// Measurements are only attempted once this many frames are buffered.
pub const FRAME_AVG_MIN: usize = 2;

/// Accepted B values smoothed over this many frames.
pub const B_HISTORY_LEN: usize = 5;

/// Piano key range, A0..C8.
pub const MIDI_MIN: u8 = 21;
pub const MIDI_MAX: u8 = 108;
