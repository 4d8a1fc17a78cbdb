//! Bounded blocking command queue.
//!
//! Control requests from any thread are serialized here before the control
//! thread picks them up. `push` blocks while the queue is full and `poll`
//! blocks while it is empty, so a burst of commands applies backpressure to
//! the caller instead of growing without bound.
//!
//! Closing the queue releases every blocked caller: `push` hands the command
//! back and `poll` returns `None` once the remaining commands are drained.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::messages::Command;

struct Inner {
    items: VecDeque<Command>,
    closed: bool,
}

pub struct CommandQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl CommandQueue {
    /// Creates a queue that holds at most `capacity` pending commands (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Appends `command`, blocking while the queue is full.
    ///
    /// Returns the command back if the queue is closed.
    pub fn push(&self, command: Command) -> Result<(), Command> {
        let mut inner = self.lock();
        while !inner.closed && inner.items.len() >= self.capacity {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if inner.closed {
            return Err(command);
        }
        inner.items.push_back(command);
        drop(inner);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest command, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn poll(&self) -> Option<Command> {
        let mut inner = self.lock();
        loop {
            if let Some(command) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(command);
            }
            if inner.closed {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Rejects further pushes and wakes every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CommandKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new(8);
        queue.push(Command::Start).unwrap();
        queue.push(Command::Seek { offset_ms: 250 }).unwrap();
        queue.push(Command::Stop).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.poll().unwrap().kind(), CommandKind::Start);
        match queue.poll().unwrap() {
            Command::Seek { offset_ms } => assert_eq!(offset_ms, 250),
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(queue.poll().unwrap().kind(), CommandKind::Stop);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_is_at_least_one() {
        assert_eq!(CommandQueue::new(0).capacity(), 1);
    }

    #[test]
    fn test_poll_blocks_until_push() {
        let queue = Arc::new(CommandQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.poll().unwrap().kind())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(Command::Close).unwrap();

        assert_eq!(consumer.join().unwrap(), CommandKind::Close);
    }

    #[test]
    fn test_push_blocks_while_full() {
        let queue = Arc::new(CommandQueue::new(1));
        queue.push(Command::Start).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                queue.push(Command::Stop).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.poll().unwrap().kind(), CommandKind::Start);
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.poll().unwrap().kind(), CommandKind::Stop);
    }

    #[test]
    fn test_cross_thread_order_is_preserved() {
        let queue = Arc::new(CommandQueue::new(2));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for offset_ms in 0..100 {
                    queue.push(Command::Seek { offset_ms }).unwrap();
                }
            })
        };

        for expected in 0..100 {
            match queue.poll().unwrap() {
                Command::Seek { offset_ms } => assert_eq!(offset_ms, expected),
                other => panic!("unexpected command {other:?}"),
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_close_releases_waiters() {
        let queue = Arc::new(CommandQueue::new(1));
        queue.push(Command::Start).unwrap();

        let blocked_push = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(Command::Stop).map_err(|c| c.kind()))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(blocked_push.join().unwrap(), Err(CommandKind::Stop));
        assert!(queue.is_closed());

        // Pending commands are still delivered, then the queue reports closed.
        assert_eq!(queue.poll().map(|c| c.kind()), Some(CommandKind::Start));
        assert!(queue.poll().is_none());
        assert!(queue.push(Command::Close).is_err());
    }

    #[test]
    fn test_close_wakes_poller() {
        let queue = Arc::new(CommandQueue::new(4));
        let poller = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.poll().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(poller.join().unwrap());
    }
}
