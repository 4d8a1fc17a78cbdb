//! Audio Engine Module
//!
//! This module provides threaded, command-driven audio playback.
//! It is organized into sub-modules, each with a specific responsibility:
//!
//! - [`command_queue`]: Bounded blocking queue that serializes control requests
//! - [`audio_buffer`]: Two-phase ring buffer between the producer and consumer threads
//! - [`mixer`]: Bus-based mixing graph with clamping and metering
//! - [`controller`]: Playback state machine applied by the control thread
//! - [`workers`]: Producer and consumer thread loops
//! - [`decoder`] / [`sample_loader`]: Sources of PCM
//! - [`output`] / [`audio_stream`]: Output devices, including the CPAL stream
//! - [`telemetry`]: Real-time data collection
//!
//! The main [`PlaybackEngine`] struct owns the three engine threads and offers
//! the control interface.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio_engine::audio_buffer::AudioBuffer;
use crate::audio_engine::audio_stream::setup_logger;
use crate::audio_engine::command_queue::CommandQueue;
use crate::audio_engine::config::EngineConfig;
use crate::audio_engine::constants::STREAM_SLOT;
use crate::audio_engine::controller::run_control;
use crate::audio_engine::decoder::Decoder;
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::mailbox::RealtimeMailbox;
use crate::audio_engine::mixer::MixGraph;
use crate::audio_engine::output::OutputDevice;
use crate::audio_engine::telemetry::{LogSink, TelemetryReporter};
use crate::audio_engine::workers::{
    ConsumerState, ProducerState, Shared, run_consumer, run_producer,
};
use crate::messages::{Command, PlaybackEvent, PlaybackState, RealtimeData};

pub mod audio_buffer;
pub mod audio_stream;
pub mod channels;
pub mod command_queue;
pub mod config;
pub mod constants;
mod controller;
pub mod decoder;
pub mod errors;
pub mod format;
pub mod mailbox;
pub mod meter;
pub mod mixer;
pub mod output;
pub mod pcm_conv;
pub mod sample_loader;
pub mod telemetry;
mod workers;

/// Threaded playback engine.
///
/// Owns a control thread that applies [`Command`]s in submission order, a producer
/// thread that decodes into the ring buffer and a consumer thread that mixes the ring
/// buffer to the output device. Control methods only enqueue; observe their effect
/// through [`PlaybackEngine::state`] or the event stream.
///
/// Dropping the engine closes any open stream and joins all threads.
pub struct PlaybackEngine {
    shared: Arc<Shared>,
    queue: Arc<CommandQueue>,
    events: Mutex<Receiver<PlaybackEvent>>,
    threads: Vec<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Create an engine that plays the decoded stream on `config.output_bus`.
    ///
    /// # Parameters
    /// * `config` - Engine settings, validated before anything is spawned
    /// * `device` - Output device; initialized here, opened on [`PlaybackEngine::open`]
    pub fn new(
        config: EngineConfig,
        device: impl OutputDevice + 'static,
    ) -> Result<Self, EngineError> {
        let mut graph = MixGraph::new(config.channels, config.block_frames);
        graph.route_stream(STREAM_SLOT, config.output_bus);
        Self::with_mix_graph(config, device, graph)
    }

    /// Create an engine around a caller-built mixing graph.
    ///
    /// The decoded stream is fed into slot [`STREAM_SLOT`]; route it with
    /// [`MixGraph::route_stream`] before handing the graph over. Other slots may carry
    /// [`MixSource`](crate::audio_engine::mixer::MixSource) callbacks.
    ///
    /// # Parameters
    /// * `config` - Engine settings
    /// * `device` - Output device
    /// * `graph` - Mixing graph with `config.channels` channels and `config.block_frames` frames per block
    pub fn with_mix_graph(
        config: EngineConfig,
        mut device: impl OutputDevice + 'static,
        graph: MixGraph,
    ) -> Result<Self, EngineError> {
        setup_logger();
        config.validate()?;
        if graph.channels() != config.channels || graph.block_frames() != config.block_frames {
            return Err(EngineError::Config(format!(
                "mix graph is {} ch x {} frames, engine runs {} ch x {} frames",
                graph.channels(),
                graph.block_frames(),
                config.channels,
                config.block_frames
            )));
        }

        let internal_format = config.internal_format()?;
        device.init()?;

        let (writer, reader) = AudioBuffer::new(internal_format, config.buffer_frames);
        let (events_tx, events_rx) = mpsc::channel();
        let queue = Arc::new(CommandQueue::new(config.command_queue_capacity));

        log::info!(
            "Creating playback engine ({} ch@{} Hz, ring {} frames, block {} frames)",
            internal_format.channels(),
            internal_format.rate(),
            config.buffer_frames,
            config.block_frames
        );

        let shared = Arc::new(Shared::new(
            config,
            internal_format,
            ProducerState {
                enabled: true,
                ready: false,
                decoder: None,
                writer,
                eos: false,
            },
            ConsumerState {
                enabled: true,
                ready: false,
                device: Box::new(device),
                reader,
                pending: Vec::new(),
            },
            events_tx,
        ));

        let mut engine = Self {
            shared,
            queue,
            events: Mutex::new(events_rx),
            threads: Vec::with_capacity(3),
        };

        if let Err(e) = engine.spawn_threads(graph) {
            log::error!("Failed to start engine threads: {e}");
            engine.teardown();
            return Err(e);
        }
        Ok(engine)
    }

    fn spawn_threads(&mut self, graph: MixGraph) -> Result<(), EngineError> {
        let shared = Arc::clone(&self.shared);
        let queue = Arc::clone(&self.queue);
        self.spawn("mizar-control", move || run_control(shared, queue))?;

        let shared = Arc::clone(&self.shared);
        self.spawn("mizar-producer", move || run_producer(shared))?;

        let shared = Arc::clone(&self.shared);
        self.spawn("mizar-consumer", move || run_consumer(shared, graph))
    }

    fn spawn(
        &mut self,
        name: &'static str,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<(), EngineError> {
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(body)
            .map_err(|source| EngineError::Spawn { name, source })?;
        self.threads.push(handle);
        Ok(())
    }

    /// Queue a command for the control thread.
    ///
    /// Blocks while the command queue is full. Fails once the engine has terminated.
    pub fn submit(&self, command: Command) -> Result<(), EngineError> {
        let kind = command.kind();
        if self.shared.is_terminated() {
            return Err(EngineError::Terminated(kind));
        }
        self.queue
            .push(command)
            .map_err(|_| EngineError::Terminated(kind))
    }

    /// Bind `decoder` and open the output device. Applies only while closed.
    pub fn open(&self, decoder: impl Decoder + 'static) -> Result<(), EngineError> {
        self.submit(Command::Open(Box::new(decoder)))
    }

    /// Stop playback, release the device and unbind the decoder.
    pub fn close(&self) -> Result<(), EngineError> {
        self.submit(Command::Close)
    }

    /// Start (or resume) playback. Applies only while ready.
    pub fn start(&self) -> Result<(), EngineError> {
        self.submit(Command::Start)
    }

    /// Pause playback, keeping the stream position. Applies only while playing.
    pub fn stop(&self) -> Result<(), EngineError> {
        self.submit(Command::Stop)
    }

    /// Move the stream to `offset_ms` milliseconds, discarding buffered audio.
    pub fn seek(&self, offset_ms: u64) -> Result<(), EngineError> {
        self.submit(Command::Seek { offset_ms })
    }

    /// Terminate all engine threads. Applies only while closed.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.submit(Command::Shutdown)
    }

    /// State as last applied by the control thread.
    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Commands queued but not yet taken by the control thread.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Take the latest real-time sample, if one was published since the last call.
    pub fn realtime_data(&self) -> Option<RealtimeData> {
        self.shared.mailbox.poll()
    }

    pub fn mailbox(&self) -> Arc<RealtimeMailbox> {
        Arc::clone(&self.shared.mailbox)
    }

    /// Start a [`TelemetryReporter`] that logs this engine's real-time data.
    pub fn telemetry_reporter(&self) -> Result<TelemetryReporter, EngineError> {
        TelemetryReporter::spawn(
            self.mailbox(),
            self.shared.config.telemetry_interval,
            LogSink::new(self.shared.config.output_bus),
        )
    }

    /// Poll for a pending engine event.
    ///
    /// Returns `None` when no events are available.
    pub fn poll_event(&self) -> Option<PlaybackEvent> {
        let events = self.events.lock().ok()?;
        match events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next engine event.
    pub fn wait_event(&self, timeout: Duration) -> Option<PlaybackEvent> {
        let events = self.events.lock().ok()?;
        match events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wait for the engine threads to exit after a [`Command::Shutdown`].
    ///
    /// Blocks until a shutdown has been submitted and applied.
    pub fn join(mut self) {
        self.join_threads();
    }

    fn join_threads(&mut self) {
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("engine").to_owned();
            if handle.join().is_err() {
                log::error!("Thread {name} panicked");
            }
        }
    }

    /// Stops whatever threads exist without going through the controller.
    fn teardown(&mut self) {
        self.shared.disable_workers();
        self.queue.close();
        self.join_threads();
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        if !self.shared.is_terminated() {
            // Closed queue makes the control thread close and shut down on its own.
            let _ = self.queue.push(Command::Close);
            let _ = self.queue.push(Command::Shutdown);
        }
        self.queue.close();
        self.join_threads();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::decoder::MemoryDecoder;
    use crate::audio_engine::errors::DecoderError;
    use crate::audio_engine::format::AudioFormat;
    use crate::audio_engine::output::MemoryOutput;
    use crate::messages::CommandKind;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    /// Decoder whose `open` panics on the control thread.
    struct PanickingDecoder;

    impl Decoder for PanickingDecoder {
        fn format(&self) -> AudioFormat {
            AudioFormat::CD
        }

        fn open(&mut self) -> Result<(), DecoderError> {
            panic!("decoder open exploded");
        }

        fn close(&mut self) {}

        fn read(&mut self, _dst: &mut [u8], _frames: usize) -> Result<usize, DecoderError> {
            Ok(0)
        }

        fn seek(&mut self, _offset_ms: u64) -> Result<(), DecoderError> {
            Ok(())
        }

        fn duration(&self) -> Option<Duration> {
            None
        }

        fn bitrate(&self) -> Option<u32> {
            None
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            buffer_frames: 4096,
            block_frames: 256,
            producer_frames: 2048,
            producer_interval: Duration::from_millis(2),
            ..EngineConfig::default()
        }
    }

    fn stereo_decoder(frames: usize, value: f32) -> MemoryDecoder {
        let format = AudioFormat::float(44_100, 2).unwrap();
        MemoryDecoder::from_f32(format, &vec![value; frames * 2])
    }

    /// Drains events until `state` is entered.
    fn wait_for_state(engine: &PlaybackEngine, state: PlaybackState) -> Vec<PlaybackEvent> {
        let deadline = Instant::now() + WAIT;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            let Some(event) = engine.wait_event(Duration::from_millis(50)) else {
                continue;
            };
            let done = matches!(event, PlaybackEvent::StateChanged { to, .. } if to == state);
            seen.push(event);
            if done {
                return seen;
            }
        }
        panic!("engine never reached {state:?}; events: {seen:?}");
    }

    /// Drains events until one matches `pred`.
    fn wait_for(engine: &PlaybackEngine, pred: impl Fn(&PlaybackEvent) -> bool) -> PlaybackEvent {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if let Some(event) = engine.wait_event(Duration::from_millis(50)) {
                if pred(&event) {
                    return event;
                }
            }
        }
        panic!("expected event never arrived");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            block_frames: 0,
            ..EngineConfig::default()
        };
        let device = MemoryOutput::default();
        assert!(matches!(
            PlaybackEngine::new(config, device.clone()),
            Err(EngineError::Config(_))
        ));
        // Nothing was initialized.
        assert_eq!(device.stats().inits, 0);
    }

    #[test]
    fn test_mismatched_mix_graph_is_rejected() {
        let config = test_config();
        let graph = MixGraph::new(config.channels, config.block_frames * 2);
        assert!(matches!(
            PlaybackEngine::with_mix_graph(config, MemoryOutput::default(), graph),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_start_while_closed_touches_nothing() {
        let device = MemoryOutput::default();
        let engine = PlaybackEngine::new(test_config(), device.clone()).unwrap();

        engine.start().unwrap();
        let event = wait_for(&engine, |e| matches!(e, PlaybackEvent::CommandIgnored { .. }));
        assert_eq!(
            event,
            PlaybackEvent::CommandIgnored {
                command: CommandKind::Start,
                state: PlaybackState::Closed
            }
        );
        assert_eq!(engine.state(), PlaybackState::Closed);
        assert_eq!(device.stats().control_calls(), 0);
        assert_eq!(device.stats().inits, 1);
    }

    #[test]
    fn test_second_open_is_ignored() {
        let device = MemoryOutput::default();
        let engine = PlaybackEngine::new(test_config(), device.clone()).unwrap();

        engine.open(stereo_decoder(1024, 0.0)).unwrap();
        wait_for_state(&engine, PlaybackState::Ready);

        engine.open(stereo_decoder(1024, 0.0)).unwrap();
        wait_for(&engine, |e| {
            matches!(e, PlaybackEvent::CommandIgnored { command: CommandKind::Open, .. })
        });
        assert_eq!(engine.state(), PlaybackState::Ready);
        assert_eq!(device.stats().opens, 1);
        assert!(device.stats().paused);
    }

    #[test]
    fn test_failed_open_stays_closed() {
        let engine = PlaybackEngine::new(test_config(), MemoryOutput::failing_open()).unwrap();

        engine.open(stereo_decoder(1024, 0.0)).unwrap();
        wait_for(&engine, |e| {
            matches!(e, PlaybackEvent::CommandFailed { command: CommandKind::Open, .. })
        });
        assert_eq!(engine.state(), PlaybackState::Closed);
    }

    #[test]
    fn test_open_after_rejected_decoder() {
        let device = MemoryOutput::default();
        let engine = PlaybackEngine::new(test_config(), device.clone()).unwrap();

        let wrong_rate = MemoryDecoder::from_f32(AudioFormat::float(48_000, 2).unwrap(), &[0.0; 64]);
        engine.open(wrong_rate).unwrap();
        wait_for(&engine, |e| matches!(e, PlaybackEvent::CommandFailed { .. }));
        assert_eq!(engine.state(), PlaybackState::Closed);
        assert_eq!(device.stats().opens, 0);

        engine.open(stereo_decoder(1024, 0.0)).unwrap();
        wait_for_state(&engine, PlaybackState::Ready);
        assert_eq!(device.stats().opens, 1);
    }

    #[test]
    fn test_playback_reaches_device() {
        let device = MemoryOutput::default();
        let engine = PlaybackEngine::new(test_config(), device.clone()).unwrap();

        engine.open(stereo_decoder(2048, 0.5)).unwrap();
        engine.start().unwrap();
        wait_for_state(&engine, PlaybackState::Playing);

        let deadline = Instant::now() + WAIT;
        while device.stats().frames_written < 2048 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = device.stats();
        assert_eq!(stats.frames_written, 2048);
        // 0.5 in S16 little-endian.
        assert_eq!(&stats.data[..4], &[0x00, 0x40, 0x00, 0x40]);
    }

    #[test]
    fn test_seek_while_playing_restarts_position() {
        let device = MemoryOutput::new(0);
        let engine = PlaybackEngine::new(test_config(), device.clone()).unwrap();

        engine.open(stereo_decoder(44_100 * 2, 0.0)).unwrap();
        engine.start().unwrap();
        wait_for_state(&engine, PlaybackState::Playing);

        engine.seek(1500).unwrap();
        let event = wait_for(&engine, |e| matches!(e, PlaybackEvent::Seeked { .. }));
        assert_eq!(
            event,
            PlaybackEvent::Seeked {
                offset_ms: 1500,
                frame: 66_150
            }
        );
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(device.stats().drops, 1);
    }

    #[test]
    fn test_commands_after_shutdown_fail() {
        let engine = PlaybackEngine::new(test_config(), MemoryOutput::default()).unwrap();

        engine.shutdown().unwrap();
        wait_for(&engine, |e| matches!(e, PlaybackEvent::Terminated));
        assert_eq!(engine.state(), PlaybackState::Terminated);
        assert!(matches!(
            engine.start(),
            Err(EngineError::Terminated(CommandKind::Start))
        ));
        engine.join();
    }

    #[test]
    fn test_drop_closes_open_stream() {
        let device = MemoryOutput::default();
        {
            let engine = PlaybackEngine::new(test_config(), device.clone()).unwrap();
            engine.open(stereo_decoder(1024, 0.0)).unwrap();
            engine.start().unwrap();
            wait_for_state(&engine, PlaybackState::Playing);
        }
        let stats = device.stats();
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.destroys, 1);
        assert_eq!(stats.format, None);
    }

    #[test]
    fn test_control_panic_terminates_engine() {
        let device = MemoryOutput::default();
        let engine = PlaybackEngine::new(test_config(), device.clone()).unwrap();

        engine.open(PanickingDecoder).unwrap();
        wait_for(&engine, |e| matches!(e, PlaybackEvent::Terminated));
        assert_eq!(engine.state(), PlaybackState::Terminated);
        assert!(matches!(
            engine.start(),
            Err(EngineError::Terminated(CommandKind::Start))
        ));

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            drop(engine);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(WAIT).is_ok(), "drop did not return");
        assert_eq!(device.stats().destroys, 1);
    }

    #[test]
    fn test_short_writes_keep_callback_audio() {
        let config = test_config();
        let device = MemoryOutput::default().with_write_limit(100);

        let mut graph = MixGraph::new(config.channels, config.block_frames);
        graph.route_stream(STREAM_SLOT, config.output_bus);
        let mut next = 0u32;
        graph.set_input(
            1,
            config.output_bus,
            Box::new(move |block: &mut [Vec<f32>], frames: usize| {
                for i in 0..frames {
                    let value = next as f32 / 32768.0;
                    for plane in block.iter_mut() {
                        plane[i] = value;
                    }
                    next += 1;
                }
                frames
            }),
        );

        let engine = PlaybackEngine::with_mix_graph(config, device.clone(), graph).unwrap();
        engine.open(stereo_decoder(2000, 0.0)).unwrap();
        engine.start().unwrap();

        let deadline = Instant::now() + WAIT;
        while device.stats().frames_written < 2000 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = device.stats();
        assert_eq!(stats.frames_written, 2000);

        // Left channel of each S16 frame carries the callback's frame index.
        let left: Vec<i16> = stats
            .data
            .chunks_exact(4)
            .map(|frame| i16::from_le_bytes([frame[0], frame[1]]))
            .collect();
        let expected: Vec<i16> = (0..2000).collect();
        assert_eq!(left, expected);
    }
}
