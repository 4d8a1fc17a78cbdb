//! Producer and consumer thread loops, and the state they share with the controller.
//!
//! Each worker owns a role: a mutex-protected state block plus a condvar the controller
//! signals when `ready` or `enabled` change. A worker holds its role lock for a whole ring
//! cycle, so the controller never observes a half-open cycle when it seeks, closes or
//! resets. Lock order is always producer, then consumer.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use crate::audio_engine::audio_buffer::{AudioBufferReader, AudioBufferWriter};
use crate::audio_engine::config::EngineConfig;
use crate::audio_engine::constants::STREAM_SLOT;
use crate::audio_engine::decoder::Decoder;
use crate::audio_engine::format::AudioFormat;
use crate::audio_engine::mailbox::RealtimeMailbox;
use crate::audio_engine::meter::PpsHistory;
use crate::audio_engine::mixer::MixGraph;
use crate::audio_engine::output::OutputDevice;
use crate::audio_engine::pcm_conv::{fixed_to_float, float_to_fixed};
use crate::messages::{PlaybackEvent, PlaybackState, RealtimeData};

pub(crate) struct ProducerState {
    pub enabled: bool,
    pub ready: bool,
    pub decoder: Option<Box<dyn Decoder>>,
    pub writer: AudioBufferWriter,
    /// `EndOfStream` was already reported for the bound decoder.
    pub eos: bool,
}

pub(crate) struct ConsumerState {
    pub enabled: bool,
    pub ready: bool,
    pub device: Box<dyn OutputDevice>,
    pub reader: AudioBufferReader,
    /// Mixed wire audio the device has not accepted yet. Sent before any new block.
    pub pending: Vec<u8>,
}

impl ConsumerState {
    /// Hands pending wire audio to the device. Returns `true` once nothing is pending.
    fn flush_pending(&mut self, shared: &Shared, frame_size: usize) -> bool {
        if self.pending.is_empty() {
            return true;
        }

        let frames = self.pending.len() / frame_size;
        match self.device.write(&self.pending, frames) {
            Ok(written) => {
                self.pending.drain(..written.min(frames) * frame_size);
            }
            Err(e) => {
                log::warn!("Output device write failed: {e}");
                shared.emit(PlaybackEvent::DeviceError {
                    reason: e.to_string(),
                });
            }
        }
        self.pending.is_empty()
    }
}

/// A worker's state and the condvar that wakes it.
pub(crate) struct Role<T> {
    state: Mutex<T>,
    wake: Condvar,
}

impl<T> Role<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            wake: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn wait<'a>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.wake
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn notify(&self) {
        self.wake.notify_all();
    }
}

/// Everything the control, producer and consumer threads share.
pub(crate) struct Shared {
    pub config: EngineConfig,
    pub internal_format: AudioFormat,
    pub producer: Role<ProducerState>,
    pub consumer: Role<ConsumerState>,
    pub mailbox: Arc<RealtimeMailbox>,
    pub events: Sender<PlaybackEvent>,
    state: AtomicU8,
    terminated: AtomicBool,
}

impl Shared {
    pub fn new(
        config: EngineConfig,
        internal_format: AudioFormat,
        producer: ProducerState,
        consumer: ConsumerState,
        events: Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            config,
            internal_format,
            producer: Role::new(producer),
            consumer: Role::new(consumer),
            mailbox: Arc::new(RealtimeMailbox::new()),
            events,
            state: AtomicU8::new(PlaybackState::Closed.to_u8()),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.state.store(state.to_u8(), Ordering::Release);
        if state == PlaybackState::Terminated {
            self.terminated.store(true, Ordering::Release);
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Tells both workers to exit and wakes them.
    pub fn disable_workers(&self) {
        {
            let mut producer = self.producer.lock();
            producer.enabled = false;
            producer.ready = false;
        }
        {
            let mut consumer = self.consumer.lock();
            consumer.enabled = false;
            consumer.ready = false;
        }
        self.producer.notify();
        self.consumer.notify();
    }
}

/// Decodes into the ring buffer until disabled.
pub(crate) fn run_producer(shared: Arc<Shared>) {
    let config = &shared.config;
    let channels = shared.internal_format.channels();
    let chunk = config.decode_chunk_frames;
    let mut bytes: Vec<u8> = Vec::new();
    let mut floats = vec![0.0f32; chunk * channels];

    log::debug!("Producer thread started");
    loop {
        let mut state = shared.producer.lock();
        while state.enabled && !state.ready {
            state = shared.producer.wait(state);
        }
        if !state.enabled {
            break;
        }

        let st = &mut *state;
        if let Some(decoder) = st.decoder.as_mut() {
            let format = decoder.format();
            if st.writer.write_begin(config.producer_frames) > 0 {
                let mut exhausted = false;
                while st.writer.write_run() > 0 {
                    let frames = st.writer.write_run().min(chunk);
                    bytes.resize(frames * format.frame_size(), 0);

                    let got = match decoder.read(&mut bytes, frames) {
                        Ok(0) => {
                            exhausted = true;
                            break;
                        }
                        Ok(got) => got,
                        Err(e) => {
                            log::error!("Decoder read failed: {e}");
                            exhausted = true;
                            break;
                        }
                    };

                    let converted = fixed_to_float(format, &mut floats, &bytes, got);
                    let written = st.writer.write(&floats[..converted * channels]);
                    st.writer.write_fill(written);
                }

                let committed = st.writer.write_end();
                log::trace!("Producer buffered {committed} frames");
                if exhausted && committed == 0 && !st.eos {
                    st.eos = true;
                    log::info!("End of stream");
                    shared.emit(PlaybackEvent::EndOfStream);
                }
            }
        }
        drop(state);

        thread::sleep(config.producer_interval);
    }
    log::debug!("Producer thread stopped");
}

/// Mixes ring buffer audio to the device at block rate until disabled.
pub(crate) fn run_consumer(shared: Arc<Shared>, mut graph: MixGraph) {
    let config = &shared.config;
    let output_format = config.output_format;
    let channels = shared.internal_format.channels();
    let block = graph.block_frames();
    let block_duration = config.block_duration();
    let rate = f64::from(shared.internal_format.rate());

    let mut stream = vec![0.0f32; block * channels];
    let mut mixed = vec![0.0f32; block * channels];
    let mut wire = vec![0u8; block * output_format.frame_size()];
    let mut pps = PpsHistory::new();
    let mut last_cycle = Instant::now();

    log::debug!("Consumer thread started");
    loop {
        let started = Instant::now();
        let frames = {
            let mut state = shared.consumer.lock();
            if state.enabled && !state.ready {
                while state.enabled && !state.ready {
                    state = shared.consumer.wait(state);
                }
                last_cycle = Instant::now();
            }
            if !state.enabled {
                break;
            }

            let st = &mut *state;
            let frame_size = output_format.frame_size();
            if st.flush_pending(&shared, frame_size) {
                let space = st.device.buffer_space();
                if space > 0 && st.reader.read_begin(space) > 0 {
                    while st.reader.read_run() > 0 {
                        let n = st.reader.read(&mut stream);
                        graph.feed(STREAM_SLOT, &stream[..n * channels]);
                        graph.process_block(n);
                        let m = graph.read_bus_interleaved(config.output_bus, &mut mixed);
                        let converted =
                            float_to_fixed(output_format, &mut wire, &mixed[..m * channels], m);
                        st.reader.read_consume(n);

                        // Refused frames are already mixed; they go out first next cycle.
                        let out = &wire[..converted * frame_size];
                        match st.device.write(out, converted) {
                            Ok(written) if written >= converted => {}
                            Ok(written) => {
                                st.pending.extend_from_slice(&out[written * frame_size..]);
                                break;
                            }
                            Err(e) => {
                                log::warn!("Output device write failed: {e}");
                                shared.emit(PlaybackEvent::DeviceError {
                                    reason: e.to_string(),
                                });
                                st.pending.extend_from_slice(out);
                                break;
                            }
                        }
                    }
                    let consumed = st.reader.read_end();
                    log::trace!("Consumer mixed {consumed} of {space} frames of space");
                }
            }
            st.reader.frames()
        };

        if let Some(rest) = block_duration.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }

        let now = Instant::now();
        let cycle_rate = pps.push(now.duration_since(last_cycle));
        last_cycle = now;

        shared.mailbox.publish(RealtimeData {
            time: frames as f64 / rate,
            frames,
            pps: cycle_rate,
            peak: graph.peak_levels(),
            rms: graph.rms_levels(),
        });
    }

    shared.consumer.lock().device.destroy();
    log::debug!("Consumer thread stopped");
}
