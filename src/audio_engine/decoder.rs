//! Decoder collaborator: the source of PCM the producer thread pulls from.

use std::time::Duration;

use crate::audio_engine::errors::DecoderError;
use crate::audio_engine::format::AudioFormat;

/// A seekable source of interleaved PCM frames.
///
/// The controller calls `open` on `Open`, `seek` on `Seek` and `close` on `Close`; the
/// producer thread calls `read` between them. A decoder is moved between threads but is
/// only ever used by one at a time.
pub trait Decoder: Send {
    /// Layout of the frames `read` produces.
    fn format(&self) -> AudioFormat;

    fn open(&mut self) -> Result<(), DecoderError>;

    fn close(&mut self);

    /// Decodes up to `frames` frames into `dst` (`frames * frame_size` bytes at most).
    ///
    /// Returns the number of frames produced; 0 means end of stream.
    fn read(&mut self, dst: &mut [u8], frames: usize) -> Result<usize, DecoderError>;

    /// Positions the stream `offset_ms` milliseconds from the start.
    fn seek(&mut self, offset_ms: u64) -> Result<(), DecoderError>;

    /// Total stream length, if known.
    fn duration(&self) -> Option<Duration>;

    /// Average bitrate in bits per second, if known.
    fn bitrate(&self) -> Option<u32>;
}

/// Decoder over PCM bytes held in memory.
#[derive(Debug, Clone)]
pub struct MemoryDecoder {
    format: AudioFormat,
    data: Vec<u8>,
    /// Byte offset of the next frame.
    position: usize,
    is_open: bool,
}

impl MemoryDecoder {
    /// Wraps `data`, interpreted as interleaved frames in `format`. A trailing partial
    /// frame is dropped.
    pub fn new(format: AudioFormat, mut data: Vec<u8>) -> Self {
        let whole = data.len() - data.len() % format.frame_size();
        data.truncate(whole);
        Self {
            format,
            data,
            position: 0,
            is_open: false,
        }
    }

    /// Wraps interleaved native-endian float samples.
    pub fn from_f32(format: AudioFormat, samples: &[f32]) -> Self {
        let data = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::new(format, data)
    }

    pub fn total_frames(&self) -> usize {
        self.data.len() / self.format.frame_size()
    }

    /// Index of the next frame `read` returns.
    pub fn position(&self) -> usize {
        self.position / self.format.frame_size()
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }
}

impl Decoder for MemoryDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&mut self) -> Result<(), DecoderError> {
        self.is_open = true;
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.is_open = false;
        self.position = 0;
    }

    fn read(&mut self, dst: &mut [u8], frames: usize) -> Result<usize, DecoderError> {
        if !self.is_open {
            return Err(DecoderError::NotOpen);
        }

        let frame_size = self.format.frame_size();
        let remaining = (self.data.len() - self.position) / frame_size;
        let frames = frames.min(remaining).min(dst.len() / frame_size);
        let bytes = frames * frame_size;

        dst[..bytes].copy_from_slice(&self.data[self.position..self.position + bytes]);
        self.position += bytes;
        Ok(frames)
    }

    fn seek(&mut self, offset_ms: u64) -> Result<(), DecoderError> {
        if !self.is_open {
            return Err(DecoderError::NotOpen);
        }

        let frame = self.format.ms_to_frames(offset_ms);
        if frame > self.total_frames() as u64 {
            return Err(DecoderError::Seek {
                offset_ms,
                reason: format!("past end of stream ({} frames)", self.total_frames()),
            });
        }
        self.position = frame as usize * self.format.frame_size();
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.format.frames_to_duration(self.total_frames() as u64))
    }

    fn bitrate(&self) -> Option<u32> {
        u32::try_from(self.format.second_size() * 8).ok()
    }
}
