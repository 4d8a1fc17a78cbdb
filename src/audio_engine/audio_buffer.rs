//! Single-producer single-consumer ring of interleaved `f32` frames.
//!
//! The ring is split into an [`AudioBufferWriter`] and an [`AudioBufferReader`]. Each side
//! works in two-phase cycles:
//!
//! 1. `*_begin(max)` reserves up to `max` frames (bounded by what is available or free),
//! 2. `read`/`write` copy the next contiguous run and `*_consume`/`*_fill` mark progress,
//! 3. `*_end()` commits the cycle and moves the cursor.
//!
//! Runs never cross the wrap point, so a cycle that straddles the end of the storage is
//! walked in two steps. Samples are stored as `f32` bits in atomic cells; the shared
//! `available` counter is published with release ordering and observed with acquire
//! ordering, which orders the sample copies on either side.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::audio_engine::format::AudioFormat;

struct Shared {
    format: AudioFormat,
    data: Box<[AtomicU32]>,
    capacity: usize,
    channels: usize,
    /// Readable samples. The only field both halves write.
    available: AtomicUsize,
    /// Frames consumed since the last reset (stream position).
    frames: AtomicU64,
}

impl Shared {
    fn len_samples(&self) -> usize {
        self.data.len()
    }

    fn available_frames(&self) -> usize {
        self.available.load(Ordering::Acquire) / self.channels
    }

    fn space_frames(&self) -> usize {
        self.capacity - self.available_frames()
    }
}

#[derive(Debug, Clone, Copy)]
struct Cycle {
    total: usize,
    done: usize,
}

impl Cycle {
    fn remaining(&self) -> usize {
        self.total - self.done
    }
}

/// Constructor and whole-buffer operations.
pub struct AudioBuffer;

impl AudioBuffer {
    /// Allocates a ring of `frames` frames (minimum 1) laid out as `format` describes.
    pub fn new(format: AudioFormat, frames: usize) -> (AudioBufferWriter, AudioBufferReader) {
        let capacity = frames.max(1);
        let channels = format.channels();
        let data = (0..capacity * channels)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let shared = Arc::new(Shared {
            format,
            data,
            capacity,
            channels,
            available: AtomicUsize::new(0),
            frames: AtomicU64::new(0),
        });

        (
            AudioBufferWriter {
                shared: Arc::clone(&shared),
                index: 0,
                cycle: None,
            },
            AudioBufferReader {
                shared,
                index: 0,
                cycle: None,
            },
        )
    }

    /// Empties the ring, closes any open cycle on either side and zeroes the frame counter.
    ///
    /// Taking both halves mutably means the caller holds both role locks.
    pub fn reset(writer: &mut AudioBufferWriter, reader: &mut AudioBufferReader) {
        debug_assert!(Arc::ptr_eq(&writer.shared, &reader.shared));

        writer.cycle = None;
        writer.index = 0;
        reader.cycle = None;
        reader.index = 0;
        reader.shared.available.store(0, Ordering::Release);
        reader.shared.frames.store(0, Ordering::Release);
    }
}

macro_rules! common_accessors {
    ($half:ty) => {
        impl $half {
            pub fn format(&self) -> AudioFormat {
                self.shared.format
            }

            /// Capacity in frames.
            pub fn capacity(&self) -> usize {
                self.shared.capacity
            }

            /// Frames ready to be read.
            pub fn available(&self) -> usize {
                self.shared.available_frames()
            }

            /// Frames that can be written.
            pub fn space(&self) -> usize {
                self.shared.space_frames()
            }

            /// Frames consumed since the last reset.
            pub fn frames(&self) -> u64 {
                self.shared.frames.load(Ordering::Acquire)
            }

            /// Overrides the consumed-frame counter, e.g. after a seek.
            pub fn set_frames(&self, frames: u64) {
                self.shared.frames.store(frames, Ordering::Release);
            }

            /// Whether a cycle is currently open on this side.
            pub fn in_cycle(&self) -> bool {
                self.cycle.is_some()
            }

            fn run(&self) -> (usize, usize) {
                let Some(cycle) = self.cycle else {
                    return (0, 0);
                };
                let ch = self.shared.channels;
                let pos = (self.index + cycle.done * ch) % self.shared.len_samples();
                let contiguous = (self.shared.len_samples() - pos) / ch;
                (pos, cycle.remaining().min(contiguous))
            }

            fn advance(&mut self, frames: usize) -> usize {
                match self.cycle.as_mut() {
                    Some(cycle) => {
                        cycle.done += frames.min(cycle.remaining());
                        cycle.done
                    }
                    None => 0,
                }
            }

            fn close_cycle(&mut self) -> usize {
                let Some(cycle) = self.cycle.take() else {
                    return 0;
                };
                let samples = cycle.done * self.shared.channels;
                self.index = (self.index + samples) % self.shared.len_samples();
                cycle.done
            }
        }
    };
}

/// Producer half of the ring.
pub struct AudioBufferWriter {
    shared: Arc<Shared>,
    /// Sample index of the next write.
    index: usize,
    cycle: Option<Cycle>,
}

/// Consumer half of the ring.
pub struct AudioBufferReader {
    shared: Arc<Shared>,
    /// Sample index of the next read.
    index: usize,
    cycle: Option<Cycle>,
}

common_accessors!(AudioBufferWriter);
common_accessors!(AudioBufferReader);

impl AudioBufferReader {
    /// Opens a read cycle of at most `max_frames` available frames.
    ///
    /// Returns the cycle size. Does nothing (returns 0) if a cycle is already open,
    /// `max_frames` is 0 or nothing is available.
    pub fn read_begin(&mut self, max_frames: usize) -> usize {
        if self.cycle.is_some() || max_frames == 0 {
            return 0;
        }

        let total = max_frames.min(self.shared.available_frames());
        if total == 0 {
            return 0;
        }
        self.cycle = Some(Cycle { total, done: 0 });
        total
    }

    /// Length of the next contiguous run in the open cycle.
    pub fn read_run(&self) -> usize {
        self.run().1
    }

    /// Copies the next contiguous run into `dst` without consuming it.
    ///
    /// Returns the number of frames copied.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let ch = self.shared.channels;
        let (pos, run) = self.run();
        let frames = run.min(dst.len() / ch);
        let samples = frames * ch;

        for (out, cell) in dst[..samples]
            .iter_mut()
            .zip(&self.shared.data[pos..pos + samples])
        {
            *out = f32::from_bits(cell.load(Ordering::Relaxed));
        }
        frames
    }

    /// Marks `frames` of the open cycle as consumed; returns the cycle's running total.
    pub fn read_consume(&mut self, frames: usize) -> usize {
        self.advance(frames)
    }

    /// Commits the open cycle; returns the number of frames consumed in it.
    pub fn read_end(&mut self) -> usize {
        let done = self.close_cycle();
        if done > 0 {
            self.shared
                .available
                .fetch_sub(done * self.shared.channels, Ordering::Release);
            self.shared.frames.fetch_add(done as u64, Ordering::AcqRel);
        }
        done
    }
}

impl AudioBufferWriter {
    /// Opens a write cycle of at most `max_frames` free frames.
    ///
    /// Returns the cycle size. Does nothing (returns 0) if a cycle is already open,
    /// `max_frames` is 0 or the ring is full.
    pub fn write_begin(&mut self, max_frames: usize) -> usize {
        if self.cycle.is_some() || max_frames == 0 {
            return 0;
        }

        let total = max_frames.min(self.shared.space_frames());
        if total == 0 {
            return 0;
        }
        self.cycle = Some(Cycle { total, done: 0 });
        total
    }

    /// Length of the next contiguous writable run in the open cycle.
    pub fn write_run(&self) -> usize {
        self.run().1
    }

    /// Copies `src` into the next contiguous run without committing it.
    ///
    /// Returns the number of frames copied.
    pub fn write(&self, src: &[f32]) -> usize {
        let ch = self.shared.channels;
        let (pos, run) = self.run();
        let frames = run.min(src.len() / ch);
        let samples = frames * ch;

        for (cell, sample) in self.shared.data[pos..pos + samples].iter().zip(&src[..samples]) {
            cell.store(sample.to_bits(), Ordering::Relaxed);
        }
        frames
    }

    /// Marks `frames` of the open cycle as filled; returns the cycle's running total.
    pub fn write_fill(&mut self, frames: usize) -> usize {
        self.advance(frames)
    }

    /// Commits the open cycle, publishing the filled frames to the reader.
    pub fn write_end(&mut self) -> usize {
        let done = self.close_cycle();
        if done > 0 {
            self.shared
                .available
                .fetch_add(done * self.shared.channels, Ordering::Release);
        }
        done
    }
}
