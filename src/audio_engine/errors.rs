//! Audio-specific error types.

use thiserror::Error;

use crate::messages::CommandKind;

/// Errors raised while building or validating an [`AudioFormat`](crate::audio_engine::format::AudioFormat).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Sample rate does not fit in 18 bits (or is zero).
    #[error("sample rate {0} Hz is out of range (1..=262143)")]
    InvalidRate(u32),

    /// Channel count is zero.
    #[error("channel count must be at least 1")]
    NoChannels,

    /// Packed format code does not name a known encoding.
    #[error("unknown sample encoding in packed format 0x{0:08x}")]
    UnknownEncoding(u32),
}

/// Errors reported by an [`OutputDevice`](crate::audio_engine::output::OutputDevice).
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Failed to open the device with the requested format.
    #[error("failed to open output device: {0}")]
    Open(String),

    /// The device does not accept the requested format.
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// The device was used before `open`.
    #[error("output device is not open")]
    NotOpen,

    /// Writing to the device failed.
    #[error("failed to write to output device: {0}")]
    Write(String),

    /// Pausing or resuming the device failed.
    #[error("failed to change output device run state: {0}")]
    Control(String),

    /// Underlying I/O failure.
    #[error("output device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a [`Decoder`](crate::audio_engine::decoder::Decoder).
#[derive(Debug, Error)]
pub enum DecoderError {
    /// The decoder was used before `open`.
    #[error("decoder is not open")]
    NotOpen,

    /// The decoder could not be opened.
    #[error("failed to open decoder: {0}")]
    Open(String),

    /// Seeking failed.
    #[error("failed to seek to {offset_ms} ms: {reason}")]
    Seek {
        /// Requested position in milliseconds.
        offset_ms: u64,
        /// Human-readable cause.
        reason: String,
    },

    /// Decoding failed mid-stream.
    #[error("failed to decode audio: {0}")]
    Read(String),

    /// The file-backed decoder failed to load.
    #[error(transparent)]
    Load(#[from] SampleLoadError),
}

/// Errors that can occur while loading audio files.
#[derive(Debug, Error)]
pub enum SampleLoadError {
    /// Failed to open the audio file.
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode the audio file.
    #[error("failed to decode audio file: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    /// Audio file has no default track.
    #[error("audio file has no default track")]
    NoDefaultTrack,

    /// Audio file is missing sample rate information.
    #[error("audio file is missing a sample rate")]
    MissingSampleRate,

    /// Audio file is missing channel information.
    #[error("audio file is missing channel information")]
    MissingChannels,

    /// The decoded stream cannot be described as an engine format.
    #[error("audio file format is not usable: {0}")]
    Format(#[from] FormatError),

    /// Unsupported channel mapping configuration.
    #[error(
        "unsupported channel mapping: file has {file_channels} channels, output has {output_channels} channels (only mono↔stereo supported)"
    )]
    UnsupportedChannels {
        /// Number of channels in the source file.
        file_channels: usize,
        /// Number of channels expected for output.
        output_channels: usize,
    },
}

/// Errors surfaced by the [`PlaybackEngine`](crate::audio_engine::PlaybackEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected before any resource was created.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    /// Format descriptor problem.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Output device failure.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Decoder failure.
    #[error(transparent)]
    Decoder(#[from] DecoderError),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// OS error.
        source: std::io::Error,
    },

    /// The engine has processed `Shutdown`; no more commands are accepted.
    #[error("playback engine is terminated, {0:?} rejected")]
    Terminated(CommandKind),
}
