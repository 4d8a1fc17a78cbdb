//! Audio Stream Module
//!
//! This module handles CPAL audio stream management including:
//! - Logger setup for the engine
//! - Stream initialization on a dedicated host thread
//! - Handing wire samples to the real-time callback through a lock-free ring buffer

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Sample, StreamConfig};
use env_logger::{Builder, Env};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::audio_engine::constants::CPAL_RING_FRAMES;
use crate::audio_engine::errors::DeviceError;
use crate::audio_engine::format::AudioFormat;
use crate::audio_engine::output::OutputDevice;
use crate::audio_engine::pcm_conv::fixed_to_float;

/// Setup and configure the logger for audio operations
pub fn setup_logger() {
    // Default to `info` so per-block tracing stays off unless asked for.
    // Users can override via `RUST_LOG`, e.g. `RUST_LOG=debug` when troubleshooting.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init()
        .unwrap_or(()); // Ignore initialization errors
}

enum HostCommand {
    Play,
    Pause,
    Stop,
}

/// Handle to a running stream owned by the host thread.
struct StreamHandle {
    format: AudioFormat,
    producer: Producer<f32>,
    /// Ring capacity in samples.
    capacity: usize,
    /// Samples the callback must discard before playing, set by `drop_buffered`.
    stale: Arc<AtomicUsize>,
    commands: Sender<HostCommand>,
    acks: Receiver<Result<(), DeviceError>>,
    thread: Option<JoinHandle<()>>,
    scratch: Vec<f32>,
}

impl StreamHandle {
    fn request(&mut self, command: HostCommand) -> Result<(), DeviceError> {
        self.commands
            .send(command)
            .map_err(|_| DeviceError::Control("audio host thread has exited".into()))?;
        self.acks
            .recv()
            .map_err(|_| DeviceError::Control("audio host thread has exited".into()))?
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(HostCommand::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio host thread panicked");
            }
        }
    }
}

/// System audio output through CPAL.
///
/// `cpal::Stream` must stay on the thread that built it, so `open` spawns a host thread that
/// owns the stream and obeys play/pause/stop requests. Wire frames written by the consumer
/// are converted to `f32` and pushed into an `rtrb` ring that the stream callback drains.
pub struct CpalOutput {
    ring_frames: usize,
    stream: Option<StreamHandle>,
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::with_ring_frames(CPAL_RING_FRAMES)
    }

    /// Output whose callback ring holds `ring_frames` frames.
    pub fn with_ring_frames(ring_frames: usize) -> Self {
        Self {
            ring_frames: ring_frames.max(1),
            stream: None,
        }
    }

    fn handle(&mut self) -> Result<&mut StreamHandle, DeviceError> {
        self.stream.as_mut().ok_or(DeviceError::NotOpen)
    }
}

/// Stream callback body: skips samples dropped by `drop_buffered`, then plays what is queued
/// and pads the rest of `data` with silence.
fn fill_from_ring(consumer: &mut Consumer<f32>, stale: &AtomicUsize, data: &mut [f32]) {
    let skip = stale.swap(0, Ordering::AcqRel).min(consumer.slots());
    if skip > 0 {
        if let Ok(chunk) = consumer.read_chunk(skip) {
            chunk.commit_all();
        }
    }

    let n = data.len().min(consumer.slots());
    if let Ok(chunk) = consumer.read_chunk(n) {
        let (first, second) = chunk.as_slices();
        data[..first.len()].copy_from_slice(first);
        data[first.len()..n].copy_from_slice(second);
        chunk.commit_all();
    }
    data[n..].fill(f32::EQUILIBRIUM);
}

/// Builds the stream on the current thread and serves host commands until `Stop`.
fn run_host(
    format: AudioFormat,
    mut consumer: Consumer<f32>,
    stale: Arc<AtomicUsize>,
    commands: Receiver<HostCommand>,
    acks: Sender<Result<(), DeviceError>>,
) {
    let build = || -> Result<cpal::Stream, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DeviceError::Open("no audio device found".into()))?;

        let channels = u16::try_from(format.channels())
            .map_err(|_| DeviceError::UnsupportedFormat(format!("{format:?}")))?;
        let stream_config = StreamConfig {
            channels,
            sample_rate: format.rate(),
            buffer_size: BufferSize::Default,
        };

        log::info!(
            "Starting audio stream... ({} ch@{} Hz)",
            channels,
            format.rate()
        );

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_from_ring(&mut consumer, &stale, data);
                },
                |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| DeviceError::Open(e.to_string()))?;
        stream
            .play()
            .map_err(|e| DeviceError::Control(e.to_string()))?;
        Ok(stream)
    };

    let stream = match build() {
        Ok(stream) => {
            let _ = acks.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = acks.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        let result = match command {
            HostCommand::Play => stream
                .play()
                .map_err(|e| DeviceError::Control(e.to_string())),
            HostCommand::Pause => stream
                .pause()
                .map_err(|e| DeviceError::Control(e.to_string())),
            HostCommand::Stop => break,
        };
        if acks.send(result).is_err() {
            break;
        }
    }

    log::debug!("Audio stream stopped");
}

impl OutputDevice for CpalOutput {
    fn destroy(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
        }
    }

    fn open(&mut self, format: AudioFormat) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            self.close()?;
        }

        let capacity = self.ring_frames * format.channels();
        let (producer, consumer) = RingBuffer::new(capacity);
        let stale = Arc::new(AtomicUsize::new(0));
        let (command_tx, command_rx) = mpsc::channel();
        let (ack_tx, ack_rx) = mpsc::channel();

        let thread = {
            let stale = Arc::clone(&stale);
            thread::Builder::new()
                .name("mizar-cpal".into())
                .spawn(move || run_host(format, consumer, stale, command_rx, ack_tx))?
        };

        let mut handle = StreamHandle {
            format,
            producer,
            capacity,
            stale,
            commands: command_tx,
            acks: ack_rx,
            thread: Some(thread),
            scratch: Vec::new(),
        };

        match handle.acks.recv() {
            Ok(Ok(())) => {
                self.stream = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                handle.shutdown();
                Err(e)
            }
            Err(_) => {
                handle.shutdown();
                Err(DeviceError::Open("audio host thread exited".into()))
            }
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
        }
        Ok(())
    }

    fn drop_buffered(&mut self) -> Result<(), DeviceError> {
        let handle = self.handle()?;
        let queued = handle.capacity - handle.producer.slots();
        handle.stale.store(queued, Ordering::Release);
        Ok(())
    }

    fn write(&mut self, buf: &[u8], frames: usize) -> Result<usize, DeviceError> {
        let handle = self.handle()?;
        let channels = handle.format.channels();
        let frames = frames
            .min(handle.producer.slots() / channels)
            .min(buf.len() / handle.format.frame_size());
        if frames == 0 {
            return Ok(0);
        }

        handle.scratch.resize(frames * channels, 0.0);
        let frames = fixed_to_float(handle.format, &mut handle.scratch, buf, frames);
        let samples = frames * channels;

        let chunk = handle
            .producer
            .write_chunk_uninit(samples)
            .map_err(|e| DeviceError::Write(e.to_string()))?;
        let written = chunk.fill_from_iter(handle.scratch[..samples].iter().copied());
        Ok(written / channels)
    }

    fn buffer_space(&self) -> usize {
        self.stream
            .as_ref()
            .map_or(0, |s| s.producer.slots() / s.format.channels())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.handle()?.request(HostCommand::Pause)
    }

    fn unpause(&mut self) -> Result<(), DeviceError> {
        self.handle()?.request(HostCommand::Play)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_setup() {
        // This test just verifies that logger setup doesn't panic
        // Multiple calls should be safe (though only the first takes effect)
        setup_logger();
        setup_logger(); // Should not panic
    }

    #[test]
    fn test_unopened_output() {
        let mut output = CpalOutput::new();
        assert_eq!(output.buffer_space(), 0);
        assert!(matches!(output.write(&[0; 4], 1), Err(DeviceError::NotOpen)));
        assert!(matches!(output.pause(), Err(DeviceError::NotOpen)));
        assert!(output.close().is_ok());
    }

    #[test]
    fn test_fill_skips_only_dropped_samples() {
        let (mut producer, mut consumer) = RingBuffer::new(16);
        let stale = AtomicUsize::new(0);
        for sample in [0.9f32; 6] {
            producer.push(sample).unwrap();
        }

        // Drop what is queued now, then queue audio from the new position.
        stale.store(16 - producer.slots(), Ordering::Release);
        for sample in [0.1f32, 0.2, 0.3] {
            producer.push(sample).unwrap();
        }

        let mut data = [1.0f32; 5];
        fill_from_ring(&mut consumer, &stale, &mut data);
        assert_eq!(data, [0.1, 0.2, 0.3, 0.0, 0.0]);
        assert_eq!(stale.load(Ordering::Acquire), 0);
        assert_eq!(consumer.slots(), 0);
    }

    #[test]
    fn test_fill_plays_queued_samples() {
        let (mut producer, mut consumer) = RingBuffer::new(8);
        let stale = AtomicUsize::new(0);
        for sample in [0.5f32, -0.5] {
            producer.push(sample).unwrap();
        }

        let mut data = [1.0f32; 4];
        fill_from_ring(&mut consumer, &stale, &mut data);
        assert_eq!(data, [0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_cpal_output_open() {
        // Actual stream creation requires audio hardware
        if cpal::default_host().default_output_device().is_none() {
            return; // Skip test if no audio device available
        }

        let mut output = CpalOutput::with_ring_frames(256);
        // Opening may still fail in test environments; only a successful open is checked.
        if output.open(AudioFormat::CD).is_ok() {
            assert_eq!(output.buffer_space(), 256);
            assert!(output.pause().is_ok());
            assert_eq!(output.write(&[0; 16], 4).unwrap(), 4);
            assert!(output.drop_buffered().is_ok());
            assert!(output.close().is_ok());
        }
    }
}
