use piano_capture::analyzer::NoteAnalyzer;
use piano_capture::audio_input::{list_input_devices, AudioCapture};
use piano_capture::console_display::ConsoleMonitor;
use piano_capture::physics::{midi_to_frequency, midi_to_note_name};
use piano_capture::store::TuningSession;
use piano_capture::types::{PianoMetadata, PianoType, SessionClock, SAMPLE_RATE};
use piano_capture::wav_input::WavInput;

use clap::Parser;
use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{error, info, warn};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "piano-capture")]
#[command(about = "Piano tuning measurement: partial detection and inharmonicity capture")]
struct Cli {
    /// List available audio input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Measure from a WAV file instead of live capture (96 kHz mono)
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Stream the WAV without real-time pacing (offline sessions)
    #[arg(long)]
    fast: bool,

    /// MIDI notes to measure, in order (e.g. 21,33,45,57,69)
    #[arg(long, value_delimiter = ',', default_value = "69")]
    notes: Vec<u8>,

    /// Piano type as the standard dropdown index
    /// (0 Spinet, 1 Console, 2 Studio, 3 Upright, 4-7 Grands)
    #[arg(long, default_value_t = 7)]
    piano_type: usize,

    /// Piano length (grands) or height (uprights), cm
    #[arg(long, default_value_t = 180.0)]
    length_cm: f32,

    /// MIDI index of the wound/plain scale break (36-54).
    /// Without it, scale-break handling is disabled.
    #[arg(long)]
    scale_break: Option<u8>,

    /// Session document to load at startup and update on completion
    #[arg(long, default_value = "tuning-session.json")]
    session: PathBuf,

    /// Print per-frame measurement lines
    #[arg(long)]
    console: bool,

    /// Seconds to wait for a note to lock before moving on
    #[arg(long, default_value_t = 30)]
    note_timeout: u64,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        match list_input_devices() {
            Ok(devices) => {
                for (i, name) in devices.iter().enumerate() {
                    println!("{}: {}", i, name);
                }
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let mut analyzer = NoteAnalyzer::new();

    let metadata = cli.scale_break.map(|scale_break_midi| PianoMetadata {
        piano_type: PianoType::from_dropdown_index(cli.piano_type),
        length_cm: cli.length_cm,
        scale_break_midi,
    });
    if let Some(meta) = metadata {
        if let Err(e) = analyzer.set_piano_metadata(meta) {
            error!("Invalid piano metadata: {}", e);
            std::process::exit(1);
        }
    }

    // Resume an existing session document when present
    let mut session = TuningSession::load(&cli.session).unwrap_or_else(|| {
        TuningSession::new(metadata.unwrap_or(PianoMetadata {
            piano_type: PianoType::from_dropdown_index(cli.piano_type),
            length_cm: cli.length_cm,
            scale_break_midi: 45,
        }))
    });

    info!("═══════════════════════════════════════════════");
    info!("  PIANO CAPTURE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Piano: {}", session.piano.piano_type);
    info!(
        "  Mode: {}",
        if cli.wav.is_some() { "WAV FILE" } else { "LIVE" }
    );
    info!("  Notes: {:?}", cli.notes);
    info!("═══════════════════════════════════════════════");

    let mut handles = Vec::new();

    // ─── Console monitor ────────────────────────────────────────────
    if cli.console {
        let rx = analyzer.subscribe();
        handles.push(
            thread::Builder::new()
                .name("monitor".into())
                .spawn(move || ConsoleMonitor::new(rx).run())
                .unwrap(),
        );
    }

    // ─── Input source ───────────────────────────────────────────────
    let clock = SessionClock::new();
    let (block_tx, block_rx) = bounded(256);

    // Kept alive for the whole session in live mode
    let mut _capture = None;
    if let Some(path) = cli.wav.clone() {
        let wav_clock = clock.clone();
        let fast = cli.fast;
        handles.push(
            thread::Builder::new()
                .name("wav-input".into())
                .spawn(move || {
                    let input = WavInput::new(path, block_tx, wav_clock);
                    if fast {
                        input.run_fast();
                    } else {
                        input.run();
                    }
                })
                .unwrap(),
        );
    } else {
        match AudioCapture::start(block_tx, clock.clone(), SAMPLE_RATE) {
            Ok(c) => _capture = Some(c),
            Err(e) => {
                error!("Audio capture failed: {}", e);
                error!("Check that the input device supports {} Hz.", SAMPLE_RATE);
                std::process::exit(1);
            }
        }
    }

    // ─── Measurement session ────────────────────────────────────────
    let timeout = Duration::from_secs(cli.note_timeout);
    let mut input_open = true;

    'notes: for &midi in &cli.notes {
        let freq = midi_to_frequency(midi as f64);
        if let Err(e) = analyzer.set_target_note(midi, freq) {
            error!("Skipping note {}: {}", midi, e);
            continue;
        }
        info!("Strike {} (MIDI {}) ...", midi_to_note_name(midi), midi);

        let deadline = Instant::now() + timeout;
        while !analyzer.is_measurement_locked() {
            match block_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(block) => {
                    if block.sample_rate != SAMPLE_RATE {
                        error!(
                            "Input delivered {} Hz audio; the analyzer requires {} Hz",
                            block.sample_rate, SAMPLE_RATE
                        );
                        break 'notes;
                    }
                    analyzer.process_audio_buffer(&block.samples);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        warn!("No lock for {} within {:?}; moving on", midi, timeout);
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    input_open = false;
                    break;
                }
            }
        }

        if let Some(m) = analyzer.locked_measurement() {
            info!(
                "{}: f0={:.3} Hz  B={:.2e}  ({} partials, {})",
                m.note_name,
                m.calculated_fundamental,
                m.inharmonicity_coefficient,
                m.detected_partials.len(),
                m.quality
            );
            session.insert(m.clone());
        }

        if !input_open {
            warn!("Input ended before the note list was exhausted");
            break;
        }
    }

    match session.save(&cli.session) {
        Ok(_) => info!("Session written to {:?}", cli.session),
        Err(e) => error!("Failed to save session: {}", e),
    }

    drop(analyzer); // closes event channels so the monitor can exit
    for h in handles {
        let _ = h.join();
    }
}
