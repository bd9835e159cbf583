//! WAV file input.
//!
//! Streams a recording through the same channel interface as live capture,
//! either paced to real time (monitoring a session as it would have
//! sounded) or as fast as the analyzer can drain it (offline measurement).
//! Record each note with a clean strike and a second of silence before it
//! so the attack detector has a floor to trigger against.

use crate::types::{AudioBlock, SessionClock, SAMPLE_RATE};
use crossbeam_channel::Sender;
use hound::{SampleFormat, WavReader};
use log::{error, info, warn};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Samples per delivered block, matching live capture granularity.
const CHUNK_SIZE: usize = 2048;

pub struct WavInput {
    path: PathBuf,
    tx: Sender<AudioBlock>,
    clock: SessionClock,
}

impl WavInput {
    pub fn new(path: PathBuf, tx: Sender<AudioBlock>, clock: SessionClock) -> Self {
        Self { path, tx, clock }
    }

    /// Stream at real-time pace.
    pub fn run(&self) {
        self.stream(true);
    }

    /// Stream without pacing, for offline sessions.
    pub fn run_fast(&self) {
        self.stream(false);
    }

    fn stream(&self, paced: bool) {
        let reader = match WavReader::open(&self.path) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to open WAV file {:?}: {}", self.path, e);
                return;
            }
        };

        let spec = reader.spec();
        let sample_rate = spec.sample_rate;
        let channels = spec.channels as usize;

        info!(
            "WAV: {:?}  {} Hz  {} ch  {:?}  {} bit",
            self.path.file_name().unwrap_or_default(),
            sample_rate,
            channels,
            spec.sample_format,
            spec.bits_per_sample,
        );

        if sample_rate != SAMPLE_RATE {
            warn!(
                "WAV sample rate is {} Hz; the analyzer expects {} Hz. \
                 Measurements will be wrong — resample before use.",
                sample_rate, SAMPLE_RATE
            );
        }

        // Read all samples as f32
        let samples_f32: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .filter_map(|s| s.ok())
                .collect(),
            SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .filter_map(|s| s.ok())
                    .map(|s| s as f32 / max)
                    .collect()
            }
        };

        // Mix down to mono
        let mono: Vec<f32> = if channels == 1 {
            samples_f32
        } else {
            samples_f32
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        let duration_secs = mono.len() as f64 / sample_rate as f64;
        info!(
            "WAV: {:.2}s, {} samples → streaming{}",
            duration_secs,
            mono.len(),
            if paced { " at real-time pace" } else { "" }
        );

        let chunk_dur = Duration::from_secs_f64(CHUNK_SIZE as f64 / sample_rate as f64);
        let start = Instant::now();

        for (i, chunk) in mono.chunks(CHUNK_SIZE).enumerate() {
            if paced {
                // Wait until this chunk's expected send time
                let target = chunk_dur * i as u32;
                let elapsed = start.elapsed();
                if elapsed < target {
                    thread::sleep(target - elapsed);
                }
            }

            let block = AudioBlock {
                timestamp_us: self.clock.now_us(),
                samples: chunk.to_vec(),
                sample_rate,
            };

            if self.tx.send(block).is_err() {
                // Analyzer shut down — stop streaming
                break;
            }
        }

        info!("WAV playback complete.");
    }
}
