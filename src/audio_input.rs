//! Live audio capture via cpal.
//!
//! The analyzer's constants are calibrated for exactly 96 kHz, so capture
//! refuses to start at any other rate rather than silently degrading the
//! measurement. Samples are mixed to mono f32 and delivered as
//! `AudioBlock`s of `CHUNK_SIZE` samples on the provided channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::Sender;
use log::{error, info};
use std::thread;

use crate::types::{AudioBlock, SessionClock};

/// Samples per delivered block: ~21 ms at 96 kHz.
const CHUNK_SIZE: usize = 2048;

/// Names of the available capture devices.
pub fn list_input_devices() -> Result<Vec<String>, String> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| format!("Cannot enumerate input devices: {e}"))?;
    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "unknown".into()))
        .collect())
}

/// Holds the cpal `Stream` alive. Drop this to stop capture.
pub struct AudioCapture {
    _stream: Stream,
}

impl AudioCapture {
    /// Open the default input device at exactly `sample_rate` and start
    /// streaming. Returns immediately; audio arrives on a background
    /// thread. Fails if the device cannot run at the requested rate.
    pub fn start(
        tx: Sender<AudioBlock>,
        clock: SessionClock,
        sample_rate: u32,
    ) -> Result<Self, String> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| "No default audio input device found".to_string())?;

        info!(
            "Audio input: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let requested = cpal::SampleRate(sample_rate);
        let config = device
            .supported_input_configs()
            .map_err(|e| format!("No supported input config: {e}"))?
            .filter(|c| c.min_sample_rate() <= requested && c.max_sample_rate() >= requested)
            .max_by_key(|c| (c.sample_format() == SampleFormat::F32, c.channels()))
            .map(|c| c.with_sample_rate(requested))
            .ok_or_else(|| {
                format!(
                    "Input device does not support {} Hz; the analyzer requires it",
                    sample_rate
                )
            })?;

        let format = config.sample_format();
        let config: StreamConfig = config.into();
        let channels = config.channels as usize;

        info!(
            "Capture config: {}Hz  {} ch  {:?}",
            sample_rate, channels, format
        );

        // Inner channel: realtime callback → processing thread.
        // try_send keeps the audio callback from ever blocking.
        let (raw_tx, raw_rx) = crossbeam_channel::bounded::<Vec<f32>>(64);

        let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

        let stream = match format {
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let mono = mix_mono_f32(data, channels);
                        let _ = raw_tx.try_send(mono);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        let mono = mix_mono_i16(data, channels);
                        let _ = raw_tx.try_send(mono);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            SampleFormat::U16 => device
                .build_input_stream(
                    &config,
                    move |data: &[u16], _| {
                        let mono = mix_mono_u16(data, channels);
                        let _ = raw_tx.try_send(mono);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            fmt => {
                return Err(format!(
                    "Unsupported sample format {fmt:?}. Use an F32 or I16 device."
                ))
            }
        };

        stream.play().map_err(|e| e.to_string())?;

        // Processing thread: accumulate callback chunks → CHUNK_SIZE blocks
        thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let mut accum: Vec<f32> = Vec::with_capacity(CHUNK_SIZE * 4);
                for chunk in raw_rx {
                    accum.extend_from_slice(&chunk);
                    while accum.len() >= CHUNK_SIZE {
                        let samples: Vec<f32> = accum.drain(..CHUNK_SIZE).collect();
                        let block = AudioBlock {
                            timestamp_us: clock.now_us(),
                            samples,
                            sample_rate,
                        };
                        if tx.send(block).is_err() {
                            return; // Receiver dropped (session finished)
                        }
                    }
                }
            })
            .map_err(|e| e.to_string())?;

        Ok(Self { _stream: stream })
    }
}

// ─── Per-format mono mixdown helpers ─────────────────────────────────────────

fn mix_mono_f32(data: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn mix_mono_i16(data: &[i16], channels: usize) -> Vec<f32> {
    const SCALE: f32 = i16::MAX as f32;
    if channels == 1 {
        return data.iter().map(|&s| s as f32 / SCALE).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            sum as f32 / (channels as f32 * SCALE)
        })
        .collect()
}

fn mix_mono_u16(data: &[u16], channels: usize) -> Vec<f32> {
    // U16: 0 = -1.0, 32768 = 0.0, 65535 = +1.0
    const MID: f32 = 32768.0;
    const SCALE: f32 = 32768.0;
    if channels == 1 {
        return data.iter().map(|&s| (s as f32 - MID) / SCALE).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| (s as f32 - MID) / SCALE).sum();
            sum / channels as f32
        })
        .collect()
}
