//! Threaded, command-driven audio playback.
//!
//! A [`PlaybackEngine`] decodes a stream on a producer thread, mixes and meters it on a
//! consumer thread and applies control commands on a third thread, so that commands never
//! stall the audio path.

pub mod audio_engine;
pub mod messages;

pub use audio_engine::PlaybackEngine;
pub use audio_engine::audio_stream::{CpalOutput, setup_logger};
pub use audio_engine::config::EngineConfig;
pub use audio_engine::decoder::{Decoder, MemoryDecoder};
pub use audio_engine::errors::{
    DecoderError, DeviceError, EngineError, FormatError, SampleLoadError,
};
pub use audio_engine::format::{AudioFormat, Endian, SampleEncoding};
pub use audio_engine::mixer::{MixGraph, MixSource};
pub use audio_engine::output::{FileOutput, MemoryOutput, NullOutput, OutputDevice};
pub use audio_engine::pcm_conv::{fixed_to_float, float_to_fixed};
pub use audio_engine::sample_loader::SymphoniaDecoder;
pub use audio_engine::telemetry::{LogSink, TelemetryReporter, TelemetrySink};
pub use messages::{Command, CommandKind, PlaybackEvent, PlaybackState, RealtimeData};
