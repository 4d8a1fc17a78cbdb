//! Single-slot telemetry mailbox between the consumer thread and any poller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, TryLockError};

use crate::messages::RealtimeData;

/// Holds at most one pending [`RealtimeData`] sample.
///
/// The consumer only writes a new sample after the previous one was collected and
/// never blocks on the slot, so a slow poller drops samples instead of stalling
/// the audio path.
#[derive(Debug, Default)]
pub struct RealtimeMailbox {
    ready: AtomicBool,
    slot: Mutex<RealtimeData>,
}

impl RealtimeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a sample. Returns `false` if the previous one is still pending or the
    /// slot is busy.
    pub fn publish(&self, data: RealtimeData) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return false;
        }

        let mut slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        *slot = data;
        self.ready.store(true, Ordering::Release);
        true
    }

    /// Takes the pending sample, if any.
    pub fn poll(&self) -> Option<RealtimeData> {
        let slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let data = *slot;
        self.ready.store(false, Ordering::Release);
        Some(data)
    }

    /// Whether a sample is waiting to be collected.
    pub fn is_pending(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
