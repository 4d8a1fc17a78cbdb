//! Command-driven playback state machine run by the control thread.
//!
//! ```text
//!            Open              Start
//!   Closed --------> Ready ----------> Playing
//!     ^  |            ^  |   <--------    |
//!     |  | Shutdown   |  |     Stop       |
//!     |  v            |  | Seek           | Seek
//!  Terminated         +--+                |
//!     ^                                   |
//!     +------- Close (Ready | Playing) ---+--> Closed
//! ```
//!
//! A command whose precondition does not hold is ignored and reported as
//! [`PlaybackEvent::CommandIgnored`]. A command whose collaborator fails leaves the state
//! unchanged and is reported as [`PlaybackEvent::CommandFailed`].

use std::sync::Arc;
use std::thread;

use crate::audio_engine::audio_buffer::AudioBuffer;
use crate::audio_engine::command_queue::CommandQueue;
use crate::audio_engine::decoder::Decoder;
use crate::audio_engine::errors::{DecoderError, DeviceError, EngineError};
use crate::audio_engine::workers::Shared;
use crate::messages::{Command, CommandKind, PlaybackEvent, PlaybackState};

pub(crate) struct PlaybackController {
    shared: Arc<Shared>,
    state: PlaybackState,
}

impl PlaybackController {
    pub fn new(shared: Arc<Shared>) -> Self {
        let state = shared.state();
        Self { shared, state }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Applies one command. Returns `false` once the controller has terminated.
    pub fn handle(&mut self, command: Command) -> bool {
        let kind = command.kind();
        log::debug!("Control: {command:?} in {:?}", self.state);

        let result = match (command, self.state) {
            (Command::Open(decoder), PlaybackState::Closed) => {
                self.open(decoder).map(|()| Some(PlaybackState::Ready))
            }
            (Command::Start, PlaybackState::Ready) => {
                self.start().map(|()| Some(PlaybackState::Playing))
            }
            (Command::Stop, PlaybackState::Playing) => {
                self.stop().map(|()| Some(PlaybackState::Ready))
            }
            (Command::Seek { offset_ms }, PlaybackState::Ready | PlaybackState::Playing) => {
                self.seek(offset_ms).map(|()| None)
            }
            (Command::Close, PlaybackState::Ready | PlaybackState::Playing) => {
                self.close();
                Ok(Some(PlaybackState::Closed))
            }
            (Command::Shutdown, PlaybackState::Closed) => {
                self.shared.disable_workers();
                Ok(Some(PlaybackState::Terminated))
            }
            (_, state) => {
                self.ignore(kind, state);
                Ok(None)
            }
        };

        match result {
            Ok(Some(next)) => self.transition(next),
            Ok(None) => {}
            Err(e) => {
                log::warn!("{kind:?} failed: {e}");
                self.shared.emit(PlaybackEvent::CommandFailed {
                    command: kind,
                    reason: e.to_string(),
                });
            }
        }

        self.state != PlaybackState::Terminated
    }

    fn ignore(&self, command: CommandKind, state: PlaybackState) {
        log::debug!("Ignoring {command:?} in {state:?}");
        self.shared
            .emit(PlaybackEvent::CommandIgnored { command, state });
    }

    fn transition(&mut self, next: PlaybackState) {
        let from = self.state;
        self.state = next;
        self.shared.set_state(next);
        log::info!("Playback state {from:?} -> {next:?}");
        self.shared
            .emit(PlaybackEvent::StateChanged { from, to: next });
        if next == PlaybackState::Terminated {
            self.shared.emit(PlaybackEvent::Terminated);
        }
    }

    fn open(&mut self, mut decoder: Box<dyn Decoder>) -> Result<(), EngineError> {
        decoder.open()?;

        let format = decoder.format();
        let internal = self.shared.internal_format;
        if format.rate() != internal.rate() || format.channels() != internal.channels() {
            decoder.close();
            return Err(EngineError::Config(format!(
                "decoder produces {} ch@{} Hz, engine runs {} ch@{} Hz",
                format.channels(),
                format.rate(),
                internal.channels(),
                internal.rate()
            )));
        }

        {
            let mut producer = self.shared.producer.lock();
            producer.decoder = Some(decoder);
            producer.eos = false;
        }

        if let Err(e) = self.open_device() {
            let mut producer = self.shared.producer.lock();
            if let Some(mut decoder) = producer.decoder.take() {
                decoder.close();
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Opens the device with the output format and leaves it paused.
    fn open_device(&self) -> Result<(), DeviceError> {
        let mut consumer = self.shared.consumer.lock();
        consumer.device.open(self.shared.config.output_format)?;
        if let Err(e) = consumer.device.pause() {
            if let Err(close_err) = consumer.device.close() {
                log::warn!("Failed to close output device: {close_err}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        {
            let mut producer = self.shared.producer.lock();
            let mut consumer = self.shared.consumer.lock();
            consumer.device.unpause()?;
            producer.ready = true;
            consumer.ready = true;
        }
        self.shared.producer.notify();
        self.shared.consumer.notify();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let mut producer = self.shared.producer.lock();
        let mut consumer = self.shared.consumer.lock();
        consumer.device.pause()?;
        producer.ready = false;
        consumer.ready = false;
        Ok(())
    }

    fn seek(&mut self, offset_ms: u64) -> Result<(), EngineError> {
        let mut producer = self.shared.producer.lock();
        let mut consumer = self.shared.consumer.lock();

        producer
            .decoder
            .as_mut()
            .ok_or(DecoderError::NotOpen)?
            .seek(offset_ms)?;
        consumer.device.drop_buffered()?;
        consumer.pending.clear();

        AudioBuffer::reset(&mut producer.writer, &mut consumer.reader);
        let frame = self.shared.internal_format.ms_to_frames(offset_ms);
        consumer.reader.set_frames(frame);
        producer.eos = false;

        log::debug!("Seeked to {offset_ms} ms (frame {frame})");
        self.shared
            .emit(PlaybackEvent::Seeked { offset_ms, frame });
        Ok(())
    }

    fn close(&mut self) {
        let mut producer = self.shared.producer.lock();
        let mut consumer = self.shared.consumer.lock();
        producer.ready = false;
        consumer.ready = false;

        if let Err(e) = consumer.device.drop_buffered() {
            log::warn!("Failed to drop buffered audio: {e}");
        }
        if let Err(e) = consumer.device.close() {
            log::warn!("Failed to close output device: {e}");
            self.shared.emit(PlaybackEvent::DeviceError {
                reason: e.to_string(),
            });
        }

        consumer.pending.clear();
        AudioBuffer::reset(&mut producer.writer, &mut consumer.reader);
        if let Some(mut decoder) = producer.decoder.take() {
            decoder.close();
        }
        producer.eos = false;
    }
}

/// Releases the workers and the queue when the control thread exits, including by panic.
struct ControlGuard {
    shared: Arc<Shared>,
    queue: Arc<CommandQueue>,
}

impl Drop for ControlGuard {
    fn drop(&mut self) {
        if thread::panicking() && !self.shared.is_terminated() {
            log::error!("Control thread panicked; stopping workers");
            self.shared.disable_workers();
            self.shared.set_state(PlaybackState::Terminated);
            self.shared.emit(PlaybackEvent::Terminated);
        }
        self.queue.close();
    }
}

/// Control thread body: applies queued commands until `Shutdown` or until the queue closes.
pub(crate) fn run_control(shared: Arc<Shared>, queue: Arc<CommandQueue>) {
    let _guard = ControlGuard {
        shared: Arc::clone(&shared),
        queue: Arc::clone(&queue),
    };
    let mut controller = PlaybackController::new(shared);
    log::debug!("Control thread started");

    loop {
        let Some(command) = queue.poll() else {
            // Owner went away without a Shutdown; release everything.
            if controller.state() != PlaybackState::Closed {
                controller.handle(Command::Close);
            }
            controller.handle(Command::Shutdown);
            break;
        };
        if !controller.handle(command) {
            break;
        }
    }

    log::debug!("Control thread stopped");
}
