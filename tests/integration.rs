//! End-to-end scenarios for the measurement pipeline.
//!
//! Each test synthesizes a signal (silence preamble, then a struck-note
//! approximation), feeds it through `NoteAnalyzer` in capture-sized blocks,
//! and asserts on the emitted events: attack triggering, partial content,
//! f0/B recovery, quality classification, locking, and retargeting.

use piano_capture::analyzer::NoteAnalyzer;
use piano_capture::types::{
    AnalyzerEvent, NoteMeasurement, PianoMetadata, PianoType, Quality, SAMPLE_RATE,
};
use std::f64::consts::PI;

// ─── Signal helpers ─────────────────────────────────────────────────────────

const BLOCK: usize = 1024;

fn silence(ms: u32) -> Vec<f32> {
    vec![0.0f32; (SAMPLE_RATE as u64 * ms as u64 / 1000) as usize]
}

fn sine(freq: f64, amp: f64, ms: u32) -> Vec<f32> {
    let n = (SAMPLE_RATE as u64 * ms as u64 / 1000) as usize;
    (0..n)
        .map(|i| (amp * (2.0 * PI * freq * i as f64 / SAMPLE_RATE as f64).sin()) as f32)
        .collect()
}

/// Stiff-string partial stack: each voice is (partial number, B, linear amp).
fn partial_stack(f0: f64, voices: &[(u32, f64, f64)], ms: u32) -> Vec<f32> {
    let n_samples = (SAMPLE_RATE as u64 * ms as u64 / 1000) as usize;
    (0..n_samples)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            voices
                .iter()
                .map(|&(n, b, amp)| {
                    let nf = n as f64;
                    let f = nf * f0 * (1.0 + b * nf * nf).sqrt();
                    amp * (2.0 * PI * f * t).sin()
                })
                .sum::<f64>() as f32
        })
        .collect()
}

/// Uniform-B stack with amplitudes falling `db_step` per partial.
fn uniform_stack(f0: f64, b: f64, count: u32, base_amp: f64, db_step: f64, ms: u32) -> Vec<f32> {
    let voices: Vec<(u32, f64, f64)> = (1..=count)
        .map(|n| {
            (
                n,
                b,
                base_amp * 10f64.powf(-((n - 1) as f64) * db_step / 20.0),
            )
        })
        .collect();
    partial_stack(f0, &voices, ms)
}

/// Deterministic broadband noise at roughly the requested RMS (dBFS).
fn noise_db(rms_db: f64, ms: u32) -> Vec<f32> {
    let n = (SAMPLE_RATE as u64 * ms as u64 / 1000) as usize;
    let mut state: u64 = 0x243f6a8885a308d3;
    let scale = 10f64.powf(rms_db / 20.0) * 3f64.sqrt();
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let u = (state >> 11) as f64 / (1u64 << 53) as f64;
            (scale * (2.0 * u - 1.0)) as f32
        })
        .collect()
}

// ─── Pipeline helpers ───────────────────────────────────────────────────────

fn feed(analyzer: &mut NoteAnalyzer, samples: &[f32]) {
    for block in samples.chunks(BLOCK) {
        analyzer.process_audio_buffer(block);
    }
}

fn drain(rx: &crossbeam_channel::Receiver<AnalyzerEvent>) -> Vec<AnalyzerEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

fn updates(events: &[AnalyzerEvent]) -> Vec<&NoteMeasurement> {
    events
        .iter()
        .filter_map(|e| match e {
            AnalyzerEvent::MeasurementUpdated(m) => Some(m),
            _ => None,
        })
        .collect()
}

fn auto_stops(events: &[AnalyzerEvent]) -> Vec<&NoteMeasurement> {
    events
        .iter()
        .filter_map(|e| match e {
            AnalyzerEvent::MeasurementAutoStopped(m) => Some(m),
            _ => None,
        })
        .collect()
}

fn spectra_count(events: &[AnalyzerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AnalyzerEvent::RawSpectrumUpdated(_)))
        .count()
}

fn concert_grand(scale_break_midi: u8) -> PianoMetadata {
    PianoMetadata {
        piano_type: PianoType::ConcertGrand,
        length_cm: 275.0,
        scale_break_midi,
    }
}

/// Every emitted measurement must satisfy the record invariants.
fn check_invariants(m: &NoteMeasurement) {
    for pair in m.detected_partials.windows(2) {
        assert!(
            pair[1].number > pair[0].number,
            "partials not strictly increasing: {:?}",
            m.detected_partials
        );
    }
    let half = 2.0f64.powf(50.0 / 1200.0);
    assert!(
        m.calculated_fundamental >= m.target_frequency / half
            && m.calculated_fundamental <= m.target_frequency * half,
        "f0 {:.3} outside ±50 cents of {:.3}",
        m.calculated_fundamental,
        m.target_frequency
    );
}

// ─── Scenario 1: pure tone, A4 ──────────────────────────────────────────────

#[test]
fn pure_tone_a4_measures_single_partial() {
    let mut analyzer = NoteAnalyzer::new();
    analyzer.set_target_note(69, 440.0).unwrap();
    let rx = analyzer.subscribe();

    let mut signal = silence(200);
    signal.extend(sine(440.0, 0.9, 5000));
    feed(&mut analyzer, &signal);

    let events = drain(&rx);
    assert!(spectra_count(&events) > 0, "no spectra emitted");

    let measured = updates(&events);
    assert!(!measured.is_empty(), "attack never produced a measurement");
    let best = measured.last().unwrap();
    check_invariants(best);

    assert_eq!(best.midi_index, 69);
    assert_eq!(best.note_name, "A4");
    assert!(
        (best.calculated_fundamental - 440.0).abs() <= 0.05,
        "f0 {:.4}",
        best.calculated_fundamental
    );
    assert_eq!(best.detected_partials.len(), 1);
    assert_eq!(best.detected_partials[0].number, 1);
    assert!((best.detected_partials[0].frequency - 440.0).abs() < 0.05);
    assert!(best.detected_partials[0].amplitude_db >= -3.0);
    assert_eq!(best.measured_partial_number, 1);
    // Register-prior B: nothing to regress from a lone fundamental
    assert!(best.inharmonicity_coefficient >= 5e-5 && best.inharmonicity_coefficient <= 3e-4);
    // A lone fundamental never classifies better than orange, so the
    // three-greens lock cannot engage on a pure sinusoid.
    assert_ne!(best.quality, Quality::Green);
    assert!(!analyzer.is_measurement_locked());
}

// ─── Scenario 2: synthetic piano stack, C3 ──────────────────────────────────

#[test]
fn c3_partial_stack_locks_green() {
    let b_true = 3e-4;
    let mut analyzer = NoteAnalyzer::new();
    analyzer.set_piano_metadata(concert_grand(41)).unwrap();
    analyzer.set_target_note(48, 130.81).unwrap();
    let rx = analyzer.subscribe();

    let mut signal = silence(200);
    signal.extend(uniform_stack(130.81, b_true, 10, 0.2, 3.0, 4000));
    feed(&mut analyzer, &signal);

    assert!(analyzer.is_measurement_locked(), "never auto-stopped");
    let events = drain(&rx);
    let stops = auto_stops(&events);
    assert_eq!(stops.len(), 1, "auto-stop must fire exactly once");

    let m = stops[0];
    check_invariants(m);
    assert_eq!(m.midi_index, 48);
    assert!(
        m.detected_partials.len() >= 6,
        "only {} partials",
        m.detected_partials.len()
    );
    assert!(
        (m.calculated_fundamental - 130.81).abs() <= 0.05,
        "f0 {:.4}",
        m.calculated_fundamental
    );
    assert!(
        (m.inharmonicity_coefficient - b_true).abs() / b_true <= 0.15,
        "B {:.3e} vs {:.3e}",
        m.inharmonicity_coefficient,
        b_true
    );
    assert_eq!(m.quality, Quality::Green);
    assert_eq!(m.measured_partial_number, 2);

    // Locked: no further analysis
    feed(&mut analyzer, &uniform_stack(130.81, b_true, 10, 0.2, 3.0, 500));
    assert!(drain(&rx).is_empty());
}

// ─── Scenario 3: deep bass A0, weak fundamental ─────────────────────────────

#[test]
fn a0_anchors_on_sixth_partial() {
    let b_true = 8e-4;
    let mut analyzer = NoteAnalyzer::new();
    analyzer.set_piano_metadata(concert_grand(41)).unwrap();
    analyzer.set_target_note(21, 27.5).unwrap();
    let rx = analyzer.subscribe();

    // Weak n=1,2; moderate n=3..5; dominant n=6..8 — a real A0 spectrum
    let voices: Vec<(u32, f64, f64)> = vec![
        (1, b_true, 0.005),
        (2, b_true, 0.005),
        (3, b_true, 0.05),
        (4, b_true, 0.05),
        (5, b_true, 0.05),
        (6, b_true, 0.30),
        (7, b_true, 0.25),
        (8, b_true, 0.20),
    ];
    let mut signal = silence(200);
    signal.extend(partial_stack(27.5, &voices, 4000));
    feed(&mut analyzer, &signal);

    let events = drain(&rx);
    let measured = updates(&events);
    assert!(!measured.is_empty());
    let best = measured.last().unwrap();
    check_invariants(best);

    assert_eq!(best.measured_partial_number, 6);
    assert!(
        (best.calculated_fundamental - 27.5).abs() <= 0.1,
        "f0 {:.4}",
        best.calculated_fundamental
    );
    // Register clamp for the wound deep bass
    assert!(
        best.inharmonicity_coefficient >= 3e-4 && best.inharmonicity_coefficient <= 3e-3,
        "B {:.3e}",
        best.inharmonicity_coefficient
    );
}

// ─── Scenario 4: scale-break transition ─────────────────────────────────────

#[test]
fn transition_note_fits_low_partials() {
    let b_wound = 4e-4;
    let b_plain = 1.5e-4;
    let mut analyzer = NoteAnalyzer::new();
    analyzer
        .set_piano_metadata(PianoMetadata {
            piano_type: PianoType::Console,
            length_cm: 109.0,
            scale_break_midi: 48,
        })
        .unwrap();
    analyzer.set_target_note(48, 130.81).unwrap();
    let rx = analyzer.subscribe();

    // Low partials behave like the wound side, high ones like plain steel
    let voices: Vec<(u32, f64, f64)> = (1..=10u32)
        .map(|n| {
            let b = if n <= 5 { b_wound } else { b_plain };
            let amp = 0.15 * 10f64.powf(-((n - 1) as f64) * 2.0 / 20.0);
            (n, b, amp)
        })
        .collect();
    let mut signal = silence(200);
    signal.extend(partial_stack(130.8128, &voices, 4000));
    feed(&mut analyzer, &signal);

    let events = drain(&rx);
    let measured = updates(&events);
    assert!(!measured.is_empty());
    let best = measured.last().unwrap();
    check_invariants(best);

    // Transition fit tracks the wound-side low partials, not the plain
    // high ones, and stays inside the register clamp
    assert!(
        (best.inharmonicity_coefficient - b_wound).abs() / b_wound <= 0.2,
        "B {:.3e} should track low partials ({:.1e})",
        best.inharmonicity_coefficient,
        b_wound
    );
    // Transition-zone quality bar: >7 partials for green
    assert!(best.detected_partials.len() > 7);
    assert_eq!(best.quality, Quality::Green);
    assert!(analyzer.is_measurement_locked());
}

// ─── Scenario 5: no signal ──────────────────────────────────────────────────

#[test]
fn quiet_noise_never_triggers() {
    let mut analyzer = NoteAnalyzer::new();
    analyzer.set_target_note(69, 440.0).unwrap();
    let rx = analyzer.subscribe();

    feed(&mut analyzer, &noise_db(-55.0, 1000));

    let events = drain(&rx);
    assert!(updates(&events).is_empty(), "noise produced a measurement");
    assert!(auto_stops(&events).is_empty());
    assert!(!analyzer.is_measurement_locked());

    // Still armed: a real note afterwards measures normally
    let mut signal = silence(100);
    signal.extend(uniform_stack(440.0, 1.5e-4, 6, 0.15, 3.0, 2000));
    feed(&mut analyzer, &signal);
    assert!(!updates(&drain(&rx)).is_empty(), "analyzer lost its arm state");
}

// ─── Scenario 6: target switch while locked ─────────────────────────────────

#[test]
fn retarget_unlocks_and_measures_new_note() {
    let mut analyzer = NoteAnalyzer::new();
    analyzer.set_piano_metadata(concert_grand(41)).unwrap();
    analyzer.set_target_note(48, 130.81).unwrap();
    let rx = analyzer.subscribe();

    let mut signal = silence(200);
    signal.extend(uniform_stack(130.81, 3e-4, 10, 0.2, 3.0, 4000));
    feed(&mut analyzer, &signal);
    assert!(analyzer.is_measurement_locked());
    drain(&rx);

    // Retarget to C5: unlocks immediately
    analyzer.set_target_note(72, 523.25).unwrap();
    assert!(!analyzer.is_measurement_locked());

    let mut signal = silence(200);
    signal.extend(uniform_stack(523.2511, 1.5e-4, 8, 0.15, 3.0, 3000));
    feed(&mut analyzer, &signal);

    let events = drain(&rx);
    let measured = updates(&events);
    assert!(!measured.is_empty(), "new target never measured");
    for m in &measured {
        assert_eq!(m.midi_index, 72);
        assert_eq!(m.note_name, "C5");
        check_invariants(m);
    }
    let stops = auto_stops(&events);
    assert_eq!(stops.len(), 1, "new note should lock in turn");
}

// ─── Cross-cutting: event ordering ──────────────────────────────────────────

#[test]
fn events_arrive_in_production_order() {
    let mut analyzer = NoteAnalyzer::new();
    analyzer.set_target_note(48, 130.81).unwrap();
    let rx = analyzer.subscribe();

    let mut signal = silence(200);
    signal.extend(uniform_stack(130.81, 3e-4, 10, 0.2, 3.0, 4000));
    feed(&mut analyzer, &signal);

    let events = drain(&rx);
    // The auto-stop, if any, must be the final measurement-bearing event,
    // and at least one spectrum precedes the first measurement.
    let first_update = events
        .iter()
        .position(|e| matches!(e, AnalyzerEvent::MeasurementUpdated(_)));
    let first_spectrum = events
        .iter()
        .position(|e| matches!(e, AnalyzerEvent::RawSpectrumUpdated(_)));
    let stop = events
        .iter()
        .position(|e| matches!(e, AnalyzerEvent::MeasurementAutoStopped(_)));
    assert!(first_spectrum.is_some());
    if let (Some(u), Some(s)) = (first_update, first_spectrum) {
        assert!(s < u, "a spectrum precedes the first measurement");
    }
    if let Some(stop_idx) = stop {
        assert!(
            !events[stop_idx + 1..]
                .iter()
                .any(|e| matches!(e, AnalyzerEvent::MeasurementUpdated(_))),
            "no updates after auto-stop"
        );
    }
}
