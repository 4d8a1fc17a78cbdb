//! Bus metering: peak-hold/RMS levels and the consumer cycle-rate window.

use std::time::Duration;

use crate::audio_engine::constants::{MAX_CHANNELS, PEAK_HOLD_SAMPLES, PPS_WINDOW};

/// Convert linear amplitude to dBFS. Exact silence maps to `-inf`.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Per-bus level meter.
///
/// The peak of a block also considers the last [`PEAK_HOLD_SAMPLES`] samples of the
/// previous block, so a transient at a block boundary is not lost.
#[derive(Debug, Clone)]
pub struct Volmeter {
    channels: usize,
    hold: [[f32; PEAK_HOLD_SAMPLES]; MAX_CHANNELS],
    peak: [f32; MAX_CHANNELS],
    rms: [f32; MAX_CHANNELS],
}

impl Volmeter {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: channels.min(MAX_CHANNELS),
            hold: [[0.0; PEAK_HOLD_SAMPLES]; MAX_CHANNELS],
            peak: [f32::NEG_INFINITY; MAX_CHANNELS],
            rms: [f32::NEG_INFINITY; MAX_CHANNELS],
        }
    }

    /// Meters the first `frames` samples of each planar channel buffer.
    pub fn process(&mut self, planes: &[Vec<f32>], frames: usize) {
        if frames == 0 {
            return;
        }

        for (ch, plane) in planes.iter().enumerate().take(self.channels) {
            let block = &plane[..frames.min(plane.len())];
            let held = &mut self.hold[ch];

            let mut peak = held.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            let mut sum_sq = 0.0f64;
            for sample in block {
                peak = peak.max(sample.abs());
                sum_sq += f64::from(*sample) * f64::from(*sample);
            }

            if block.len() >= PEAK_HOLD_SAMPLES {
                held.copy_from_slice(&block[block.len() - PEAK_HOLD_SAMPLES..]);
            } else {
                held.rotate_left(block.len());
                held[PEAK_HOLD_SAMPLES - block.len()..].copy_from_slice(block);
            }

            let rms = if block.is_empty() {
                0.0
            } else {
                (sum_sq / block.len() as f64).sqrt() as f32
            };

            self.peak[ch] = linear_to_db(peak);
            self.rms[ch] = linear_to_db(rms);
        }
    }

    /// Peak level of the last block, per channel, in dBFS.
    pub fn peak(&self) -> [f32; MAX_CHANNELS] {
        self.peak
    }

    /// RMS level of the last block, per channel, in dBFS.
    pub fn rms(&self) -> [f32; MAX_CHANNELS] {
        self.rms
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.channels);
    }
}

/// Fixed window of per-cycle rates with a running sum.
#[derive(Debug, Clone)]
pub struct PpsHistory {
    window: [f64; PPS_WINDOW],
    index: usize,
    filled: usize,
    sum: f64,
}

impl Default for PpsHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl PpsHistory {
    pub fn new() -> Self {
        Self {
            window: [0.0; PPS_WINDOW],
            index: 0,
            filled: 0,
            sum: 0.0,
        }
    }

    /// Records one cycle that took `delta` and returns the mean rate in cycles per second.
    ///
    /// The mean is taken over the filled part of the window only. A zero delta is
    /// not recorded.
    pub fn push(&mut self, delta: Duration) -> f64 {
        let nanos = delta.as_nanos();
        if nanos == 0 {
            return self.mean();
        }

        let rate = 1e9 / nanos as f64;
        if self.filled == PPS_WINDOW {
            self.sum -= self.window[self.index];
        } else {
            self.filled += 1;
        }
        self.window[self.index] = rate;
        self.sum += rate;
        self.index = (self.index + 1) % PPS_WINDOW;

        self.mean()
    }

    pub fn mean(&self) -> f64 {
        if self.filled == 0 {
            0.0
        } else {
            self.sum / self.filled as f64
        }
    }
}
