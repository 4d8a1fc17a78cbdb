use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio_engine::errors::EngineError;
use crate::audio_engine::mailbox::RealtimeMailbox;
use crate::messages::RealtimeData;

/// Minimum spacing between two telemetry log lines.
const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Receives every telemetry sample collected by a [`TelemetryReporter`].
pub trait TelemetrySink: Send {
    fn report(&mut self, data: &RealtimeData);
}

impl<F> TelemetrySink for F
where
    F: FnMut(&RealtimeData) + Send,
{
    fn report(&mut self, data: &RealtimeData) {
        self(data)
    }
}

/// Logs telemetry at debug level, at most once per [`LOG_INTERVAL`].
pub struct LogSink {
    last_emit: Instant,
    min_interval: Duration,
    output_bus: usize,
}

impl LogSink {
    pub fn new(output_bus: usize) -> Self {
        Self {
            last_emit: Instant::now()
                .checked_sub(LOG_INTERVAL)
                .unwrap_or_else(Instant::now),
            min_interval: LOG_INTERVAL,
            output_bus,
        }
    }
}

impl TelemetrySink for LogSink {
    fn report(&mut self, data: &RealtimeData) {
        let now = Instant::now();
        if now.duration_since(self.last_emit) < self.min_interval {
            return;
        }
        self.last_emit = now;

        let peak = data.peak.get(self.output_bus).copied().unwrap_or_default();
        let rms = data.rms.get(self.output_bus).copied().unwrap_or_default();
        log::debug!(
            "t={:.3}s frames={} pps={:.1} peak={:?} dB rms={:?} dB",
            data.time,
            data.frames,
            data.pps,
            peak,
            rms
        );
    }
}

/// Background thread that collects samples from a [`RealtimeMailbox`] at a fixed rate.
///
/// The thread stops when the reporter is dropped.
pub struct TelemetryReporter {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TelemetryReporter {
    /// Spawns the polling thread.
    ///
    /// # Parameters
    /// * `mailbox` - Mailbox the consumer thread publishes to
    /// * `interval` - Polling interval (20 Hz by default)
    /// * `sink` - Receiver of collected samples
    pub fn spawn(
        mailbox: Arc<RealtimeMailbox>,
        interval: Duration,
        mut sink: impl TelemetrySink + 'static,
    ) -> Result<Self, EngineError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("mizar-telemetry".into())
                .spawn(move || {
                    log::debug!("Telemetry reporter started");
                    while running.load(Ordering::Acquire) {
                        if let Some(data) = mailbox.poll() {
                            sink.report(&data);
                        }
                        thread::sleep(interval);
                    }
                    log::debug!("Telemetry reporter stopped");
                })
                .map_err(|source| EngineError::Spawn {
                    name: "mizar-telemetry",
                    source,
                })?
        };

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TelemetryReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
