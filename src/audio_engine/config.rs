//! Engine configuration.

use std::time::Duration;

use crate::audio_engine::constants::{
    DEFAULT_BLOCK_FRAMES, DEFAULT_BUFFER_FRAMES, DEFAULT_COMMAND_QUEUE_CAPACITY,
    DEFAULT_DECODE_CHUNK_FRAMES, DEFAULT_PRODUCER_FRAMES, DEFAULT_PRODUCER_INTERVAL_MS,
    DEFAULT_SAMPLE_RATE, DEFAULT_TELEMETRY_INTERVAL_MS, MAX_BUSES, MAX_CHANNELS,
};
use crate::audio_engine::errors::{EngineError, FormatError};
use crate::audio_engine::format::AudioFormat;

/// Settings fixed for the lifetime of a [`PlaybackEngine`](crate::audio_engine::PlaybackEngine).
///
/// Start from [`EngineConfig::default`] and override fields as needed.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Wire format handed to the output device.
    pub output_format: AudioFormat,

    /// Rate of the internal float stream. Decoders must produce this rate.
    pub sample_rate: u32,

    /// Channels of the internal float stream. Decoders must produce this many.
    pub channels: usize,

    /// Ring buffer capacity in frames.
    pub buffer_frames: usize,

    /// Mix/meter block size in frames; also the consumer pacing quantum.
    pub block_frames: usize,

    /// Frames the producer tries to buffer per wake-up.
    pub producer_frames: usize,

    /// Frames requested from the decoder per `read` call.
    pub decode_chunk_frames: usize,

    /// Producer sleep between write cycles.
    pub producer_interval: Duration,

    /// Pending commands before `submit` blocks.
    pub command_queue_capacity: usize,

    /// Bus the consumer sends to the device.
    pub output_bus: usize,

    /// Polling interval of the [`TelemetryReporter`](crate::audio_engine::telemetry::TelemetryReporter).
    pub telemetry_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_format: AudioFormat::CD,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            block_frames: DEFAULT_BLOCK_FRAMES,
            producer_frames: DEFAULT_PRODUCER_FRAMES,
            decode_chunk_frames: DEFAULT_DECODE_CHUNK_FRAMES,
            producer_interval: Duration::from_millis(DEFAULT_PRODUCER_INTERVAL_MS),
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
            output_bus: 0,
            telemetry_interval: Duration::from_millis(DEFAULT_TELEMETRY_INTERVAL_MS),
        }
    }
}

impl EngineConfig {
    /// Format of the internal float stream (ring buffer and mix graph).
    pub fn internal_format(&self) -> Result<AudioFormat, FormatError> {
        let channels = u8::try_from(self.channels).map_err(|_| FormatError::NoChannels)?;
        AudioFormat::float(self.sample_rate, channels)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(EngineError::Config(format!(
                "internal channel count {} is outside 1..={MAX_CHANNELS}",
                self.channels
            )));
        }
        if self.output_format.channels() != self.channels {
            return Err(EngineError::Config(format!(
                "output format has {} channels, internal stream has {}",
                self.output_format.channels(),
                self.channels
            )));
        }
        if self.output_format.rate() != self.sample_rate {
            return Err(EngineError::Config(format!(
                "output rate {} Hz differs from internal rate {} Hz",
                self.output_format.rate(),
                self.sample_rate
            )));
        }
        self.internal_format()?;

        for (name, value) in [
            ("buffer_frames", self.buffer_frames),
            ("block_frames", self.block_frames),
            ("producer_frames", self.producer_frames),
            ("decode_chunk_frames", self.decode_chunk_frames),
            ("command_queue_capacity", self.command_queue_capacity),
        ] {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.block_frames > self.buffer_frames {
            return Err(EngineError::Config(format!(
                "block_frames {} exceeds buffer_frames {}",
                self.block_frames, self.buffer_frames
            )));
        }
        if self.output_bus >= MAX_BUSES {
            return Err(EngineError::Config(format!(
                "output_bus {} is outside 0..{MAX_BUSES}",
                self.output_bus
            )));
        }

        Ok(())
    }

    /// Wall-clock length of one processing block.
    pub fn block_duration(&self) -> Duration {
        Duration::from_nanos(self.block_frames as u64 * 1_000_000_000 / u64::from(self.sample_rate))
    }
}
