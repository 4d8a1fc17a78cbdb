//! Output device collaborator: the sink the consumer thread writes to.
//!
//! [`OutputDevice`] is implemented by [`NullOutput`], [`MemoryOutput`], [`FileOutput`] and
//! [`CpalOutput`](crate::audio_engine::audio_stream::CpalOutput).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio_engine::errors::DeviceError;
use crate::audio_engine::format::AudioFormat;

/// Space reported by sinks that never fill up, in bytes.
const UNBOUNDED_SPACE_BYTES: usize = 1024 * 1024;

/// A PCM sink.
///
/// `init`/`destroy` bracket the engine's lifetime; `open`/`close` bracket one stream.
pub trait OutputDevice: Send {
    fn init(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn destroy(&mut self) {}

    /// Prepares the device for frames in `format`. The device starts running;
    /// the controller pauses it until playback starts.
    fn open(&mut self, format: AudioFormat) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;

    /// Discards audio queued in the device but not yet played.
    fn drop_buffered(&mut self) -> Result<(), DeviceError>;

    /// Writes up to `frames` frames from `buf`; returns how many were accepted.
    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, DeviceError>;

    /// Frames the device can accept without blocking.
    fn buffer_space(&self) -> usize;

    fn pause(&mut self) -> Result<(), DeviceError>;

    fn unpause(&mut self) -> Result<(), DeviceError>;
}

fn unbounded_space(format: Option<AudioFormat>) -> usize {
    format.map_or(0, |af| UNBOUNDED_SPACE_BYTES / af.frame_size())
}

/// Discards everything it is given.
#[derive(Debug, Default)]
pub struct NullOutput {
    format: Option<AudioFormat>,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputDevice for NullOutput {
    fn open(&mut self, format: AudioFormat) -> Result<(), DeviceError> {
        self.format = Some(format);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.format = None;
        Ok(())
    }

    fn drop_buffered(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn write(&mut self, _buf: &[u8], frames: usize) -> Result<usize, DeviceError> {
        match self.format {
            Some(_) => Ok(frames),
            None => Err(DeviceError::NotOpen),
        }
    }

    fn buffer_space(&self) -> usize {
        unbounded_space(self.format)
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn unpause(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Call counters and captured audio of a [`MemoryOutput`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub inits: usize,
    pub destroys: usize,
    pub opens: usize,
    pub closes: usize,
    pub drops: usize,
    pub pauses: usize,
    pub unpauses: usize,
    pub frames_written: u64,
    pub format: Option<AudioFormat>,
    pub paused: bool,
    /// Bytes received since the last `drop_buffered`.
    pub data: Vec<u8>,
}

impl DeviceStats {
    /// Total number of calls that change device state.
    pub fn control_calls(&self) -> usize {
        self.opens + self.closes + self.drops + self.pauses + self.unpauses
    }
}

/// Records every call and every byte written. Cloning yields a handle onto the same
/// recording, so a test can keep one clone while the engine owns the other.
#[derive(Debug, Clone)]
pub struct MemoryOutput {
    stats: Arc<Mutex<DeviceStats>>,
    space_frames: usize,
    max_write_frames: usize,
    fail_open: bool,
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl MemoryOutput {
    /// Creates a recorder that reports `space_frames` of free space while open.
    pub fn new(space_frames: usize) -> Self {
        Self {
            stats: Arc::new(Mutex::new(DeviceStats::default())),
            space_frames,
            max_write_frames: usize::MAX,
            fail_open: false,
        }
    }

    /// Accepts at most `frames` frames per `write`, like a device that drains slowly.
    pub fn with_write_limit(mut self, frames: usize) -> Self {
        self.max_write_frames = frames;
        self
    }

    /// A recorder whose `open` always fails.
    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Snapshot of the recording so far.
    pub fn stats(&self) -> DeviceStats {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputDevice for MemoryOutput {
    fn init(&mut self) -> Result<(), DeviceError> {
        self.lock().inits += 1;
        Ok(())
    }

    fn destroy(&mut self) {
        self.lock().destroys += 1;
    }

    fn open(&mut self, format: AudioFormat) -> Result<(), DeviceError> {
        if self.fail_open {
            return Err(DeviceError::Open("memory output configured to fail".into()));
        }

        let mut stats = self.lock();
        stats.opens += 1;
        stats.format = Some(format);
        stats.paused = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let mut stats = self.lock();
        stats.closes += 1;
        stats.format = None;
        Ok(())
    }

    fn drop_buffered(&mut self) -> Result<(), DeviceError> {
        let mut stats = self.lock();
        stats.drops += 1;
        stats.data.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, DeviceError> {
        let mut stats = self.lock();
        let Some(format) = stats.format else {
            return Err(DeviceError::NotOpen);
        };

        let frames = frames
            .min(buf.len() / format.frame_size())
            .min(self.max_write_frames);
        stats
            .data
            .extend_from_slice(&buf[..frames * format.frame_size()]);
        stats.frames_written += frames as u64;
        Ok(frames)
    }

    fn buffer_space(&self) -> usize {
        let stats = self.lock();
        if stats.format.is_some() && !stats.paused {
            self.space_frames
        } else {
            0
        }
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        let mut stats = self.lock();
        stats.pauses += 1;
        stats.paused = true;
        Ok(())
    }

    fn unpause(&mut self) -> Result<(), DeviceError> {
        let mut stats = self.lock();
        stats.unpauses += 1;
        stats.paused = false;
        Ok(())
    }
}

/// Writes raw PCM in the open format to a file.
///
/// The file is created by `init` and flushed by `close` and `destroy`, so successive
/// streams are appended to the same file.
#[derive(Debug)]
pub struct FileOutput {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    format: Option<AudioFormat>,
}

impl FileOutput {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            format: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl OutputDevice for FileOutput {
    fn init(&mut self) -> Result<(), DeviceError> {
        let file = File::create(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        log::debug!("File output created at {}", self.path.display());
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("Failed to flush {}: {e}", self.path.display());
        }
        self.writer = None;
    }

    fn open(&mut self, format: AudioFormat) -> Result<(), DeviceError> {
        if self.writer.is_none() {
            return Err(DeviceError::Open(format!(
                "{} was not initialised",
                self.path.display()
            )));
        }
        self.format = Some(format);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.format = None;
        self.flush()
    }

    fn drop_buffered(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, DeviceError> {
        let (Some(format), Some(writer)) = (self.format, self.writer.as_mut()) else {
            return Err(DeviceError::NotOpen);
        };

        let frames = frames.min(buf.len() / format.frame_size());
        writer
            .write_all(&buf[..frames * format.frame_size()])
            .map_err(|e| DeviceError::Write(e.to_string()))?;
        Ok(frames)
    }

    fn buffer_space(&self) -> usize {
        unbounded_space(self.format)
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn unpause(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_null_output_requires_open() {
        let mut out = NullOutput::new();
        assert!(matches!(out.write(&[0; 4], 1), Err(DeviceError::NotOpen)));
        assert_eq!(out.buffer_space(), 0);

        out.open(AudioFormat::CD).unwrap();
        assert_eq!(out.write(&[0; 4], 1).unwrap(), 1);
        assert_eq!(out.buffer_space(), UNBOUNDED_SPACE_BYTES / 4);
    }

    #[test]
    fn test_memory_output_records_calls() {
        let handle = MemoryOutput::new(128);
        let mut out = handle.clone();

        out.init().unwrap();
        out.open(AudioFormat::CD).unwrap();
        out.pause().unwrap();
        assert_eq!(out.buffer_space(), 0);
        out.unpause().unwrap();
        assert_eq!(out.buffer_space(), 128);

        assert_eq!(out.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9], 3).unwrap(), 2);
        out.close().unwrap();

        let stats = handle.stats();
        assert_eq!(stats.inits, 1);
        assert_eq!(stats.opens, 1);
        assert_eq!(stats.pauses, 1);
        assert_eq!(stats.unpauses, 1);
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.frames_written, 2);
        assert_eq!(stats.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(stats.control_calls(), 4);
    }

    #[test]
    fn test_memory_output_drop_discards_data() {
        let mut out = MemoryOutput::default();
        out.open(AudioFormat::CD).unwrap();
        out.write(&[0; 16], 4).unwrap();
        out.drop_buffered().unwrap();

        let stats = out.stats();
        assert!(stats.data.is_empty());
        assert_eq!(stats.frames_written, 4);
        assert_eq!(stats.drops, 1);
    }

    #[test]
    fn test_failing_open() {
        let mut out = MemoryOutput::failing_open();
        assert!(matches!(out.open(AudioFormat::CD), Err(DeviceError::Open(_))));
        assert_eq!(out.stats().opens, 0);
    }

    #[test]
    fn test_file_output_writes_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pcm");
        let mut out = FileOutput::new(&path);

        assert!(matches!(out.open(AudioFormat::CD), Err(DeviceError::Open(_))));

        out.init().unwrap();
        out.open(AudioFormat::CD).unwrap();
        assert_eq!(out.write(&[1, 2, 3, 4, 5, 6, 7, 8], 2).unwrap(), 2);
        assert_eq!(out.write(&[9, 10, 11, 12, 13], 2).unwrap(), 1);
        out.close().unwrap();
        assert!(matches!(out.write(&[0; 4], 1), Err(DeviceError::NotOpen)));
        out.destroy();

        assert_eq!(fs::read(&path).unwrap(), (1..=12).collect::<Vec<u8>>());
    }
}
