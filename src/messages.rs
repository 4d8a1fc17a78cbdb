//! Message definitions for communication between the caller and the playback threads.
//!
//! This module defines the commands that travel through the
//! [`CommandQueue`](crate::audio_engine::command_queue::CommandQueue) to the control thread,
//! the events the engine reports back over its event channel, and the telemetry snapshot
//! published by the consumer thread.

use std::fmt;

use crate::audio_engine::constants::{MAX_BUSES, MAX_CHANNELS};
use crate::audio_engine::decoder::Decoder;

/// Message that is sent to the control thread.
pub enum Command {
    /// Bind a decoder and open the output device.
    ///
    /// Ignored unless the engine is `Closed`.
    Open(Box<dyn Decoder>),

    /// Release the decoder and the device.
    Close,

    /// Start (or resume) playback.
    Start,

    /// Pause playback, keeping the buffered audio.
    Stop,

    /// Jump to a position in the stream.
    ///
    /// # Parameters
    /// * `offset_ms` - Position from the start of the stream, in milliseconds
    Seek { offset_ms: u64 },

    /// Stop all worker threads. Only honoured when `Closed`.
    Shutdown,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Open(_) => CommandKind::Open,
            Command::Close => CommandKind::Close,
            Command::Start => CommandKind::Start,
            Command::Stop => CommandKind::Stop,
            Command::Seek { .. } => CommandKind::Seek,
            Command::Shutdown => CommandKind::Shutdown,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Open(decoder) => f
                .debug_tuple("Open")
                .field(&decoder.format())
                .finish(),
            Command::Seek { offset_ms } => f
                .debug_struct("Seek")
                .field("offset_ms", offset_ms)
                .finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// Payload-free tag of a [`Command`], used in events and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Open,
    Close,
    Start,
    Stop,
    Seek,
    Shutdown,
}

/// Lifecycle state of the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    /// No decoder bound, device closed.
    Closed,
    /// Decoder bound, device open and paused.
    Ready,
    /// Workers are moving audio.
    Playing,
    /// Shutdown processed; threads are exiting.
    Terminated,
}

impl PlaybackState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Closed => 0,
            PlaybackState::Ready => 1,
            PlaybackState::Playing => 2,
            PlaybackState::Terminated => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Closed,
            1 => PlaybackState::Ready,
            2 => PlaybackState::Playing,
            _ => PlaybackState::Terminated,
        }
    }
}

/// Events emitted from the playback threads.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The controller moved to a new state.
    StateChanged {
        from: PlaybackState,
        to: PlaybackState,
    },

    /// A seek completed; `frame` is the new stream position.
    Seeked { offset_ms: u64, frame: u64 },

    /// A command arrived in a state where it has no effect.
    CommandIgnored {
        command: CommandKind,
        state: PlaybackState,
    },

    /// A command failed; the state did not change.
    CommandFailed { command: CommandKind, reason: String },

    /// The output device reported a write error.
    DeviceError { reason: String },

    /// The decoder has no more audio.
    EndOfStream,

    /// All worker threads have been told to exit.
    Terminated,
}

/// Snapshot of realtime playback metrics, published by the consumer thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealtimeData {
    /// Stream position in seconds.
    pub time: f64,
    /// Stream position in frames.
    pub frames: u64,
    /// Smoothed consumer cycle rate (cycles per second).
    pub pps: f64,
    /// Peak level per bus and channel, in dBFS.
    pub peak: [[f32; MAX_CHANNELS]; MAX_BUSES],
    /// RMS level per bus and channel, in dBFS.
    pub rms: [[f32; MAX_CHANNELS]; MAX_BUSES],
}

impl Default for RealtimeData {
    fn default() -> Self {
        Self {
            time: 0.0,
            frames: 0,
            pps: 0.0,
            peak: [[f32::NEG_INFINITY; MAX_CHANNELS]; MAX_BUSES],
            rms: [[f32::NEG_INFINITY; MAX_CHANNELS]; MAX_BUSES],
        }
    }
}
