//! Sliding capture buffer and multi-frame magnitude averaging.

use crate::types::{FRAME_AVG_DEPTH, FRAME_AVG_MIN, HALF_SPECTRUM};

// ─── Capture buffer ─────────────────────────────────────────────────────────

/// Accumulates incoming sample blocks until a full analysis window is
/// available, then slides forward by half a window (50% overlap).
/// Block sizes are arbitrary; the buffer does the framing.
pub struct CaptureBuffer {
    buf: Vec<f32>,
    window_len: usize,
}

impl CaptureBuffer {
    pub fn new(window_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(window_len * 2),
            window_len,
        }
    }

    /// Change the analysis window length. Buffered samples are discarded:
    /// they belong to the previous target's framing.
    pub fn set_window_len(&mut self, window_len: usize) {
        self.window_len = window_len;
        self.buf.clear();
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.buf.extend_from_slice(samples);
    }

    /// True when a full window of samples is buffered.
    pub fn ready(&self) -> bool {
        self.buf.len() >= self.window_len
    }

    /// The oldest full window of samples. Call only when `ready()`.
    pub fn frame(&self) -> &[f32] {
        &self.buf[..self.window_len]
    }

    /// Slide forward by half a window, retaining 50% overlap.
    pub fn advance(&mut self) {
        let half = self.window_len / 2;
        let drop = half.min(self.buf.len());
        self.buf.drain(..drop);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// ─── Frame averaging ────────────────────────────────────────────────────────

/// Element-wise mean of the most recent magnitude frames.
///
/// Averaging 2-3 overlapping frames suppresses transient noise without
/// materially blurring stable partials. Slots are allocated once and
/// reused; `push` and `averaged` do no allocation.
pub struct FrameAverager {
    slots: Vec<Vec<f32>>,
    write: usize,
    count: usize,
    average: Vec<f32>,
}

impl FrameAverager {
    pub fn new() -> Self {
        Self {
            slots: (0..FRAME_AVG_DEPTH).map(|_| vec![0.0; HALF_SPECTRUM]).collect(),
            write: 0,
            count: 0,
            average: vec![0.0; HALF_SPECTRUM],
        }
    }

    pub fn push(&mut self, frame: &[f32]) {
        self.slots[self.write].copy_from_slice(frame);
        self.write = (self.write + 1) % FRAME_AVG_DEPTH;
        self.count = (self.count + 1).min(FRAME_AVG_DEPTH);
    }

    /// True once enough frames are buffered for measurement.
    pub fn ready(&self) -> bool {
        self.count >= FRAME_AVG_MIN
    }

    /// Averaged magnitudes. With fewer than two frames buffered, the most
    /// recent frame is returned unchanged.
    pub fn averaged(&mut self) -> &[f32] {
        if self.count == 0 {
            self.average.fill(0.0);
            return &self.average;
        }
        if self.count < FRAME_AVG_MIN {
            let latest = (self.write + FRAME_AVG_DEPTH - 1) % FRAME_AVG_DEPTH;
            self.average.copy_from_slice(&self.slots[latest]);
            return &self.average;
        }
        let inv = 1.0 / self.count as f32;
        self.average.fill(0.0);
        for slot in self.slots.iter().take(self.count.max(1)) {
            // With count == depth every slot participates; before that,
            // slots [0, count) are exactly the pushed frames.
            for (avg, &v) in self.average.iter_mut().zip(slot.iter()) {
                *avg += v;
            }
        }
        for avg in self.average.iter_mut() {
            *avg *= inv;
        }
        &self.average
    }

    pub fn clear(&mut self) {
        self.write = 0;
        self.count = 0;
    }
}

impl Default for FrameAverager {
    fn default() -> Self {
        Self::new()
    }
}
