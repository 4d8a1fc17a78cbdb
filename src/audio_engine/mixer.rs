//! Bus-based mixing graph.
//!
//! This module provides the [`MixGraph`] struct which sums a fixed set of input slots into a
//! fixed set of output buses, one processing block at a time. Every block the buses are
//! zeroed, each enabled input adds its samples into its target bus, bus samples are clamped
//! to `[-1.0, 1.0]` and each bus is metered by its own [`Volmeter`].
//!
//! An input is either *fed*, meaning the caller pushes interleaved samples with
//! [`MixGraph::feed`] before each block (this is how the decoded stream enters), or backed
//! by a [`MixSource`] callback that renders planar samples on demand.

use crate::audio_engine::constants::{MAX_BUSES, MAX_CHANNELS, MAX_INPUTS};
use crate::audio_engine::meter::Volmeter;

/// A callback that renders audio into a mix input.
pub trait MixSource: Send {
    /// Renders up to `frames` frames into the planar `block` (one `Vec` per channel,
    /// pre-zeroed). Returns the number of frames produced.
    fn fill(&mut self, block: &mut [Vec<f32>], frames: usize) -> usize;
}

impl<F> MixSource for F
where
    F: FnMut(&mut [Vec<f32>], usize) -> usize + Send,
{
    fn fill(&mut self, block: &mut [Vec<f32>], frames: usize) -> usize {
        self(block, frames)
    }
}

enum InputSource {
    Fed { frames: usize },
    Callback(Box<dyn MixSource>),
}

struct InputSlot {
    source: Option<InputSource>,
    bus: usize,
    enabled: bool,
    block: Vec<Vec<f32>>,
}

impl InputSlot {
    fn new(channels: usize, block_frames: usize) -> Self {
        Self {
            source: None,
            bus: 0,
            enabled: false,
            block: vec![vec![0.0; block_frames]; channels],
        }
    }
}

struct Bus {
    block: Vec<Vec<f32>>,
    meter: Volmeter,
}

/// Fixed-topology mixer: [`MAX_INPUTS`] input slots into [`MAX_BUSES`] output buses.
pub struct MixGraph {
    /// Number of channels per input and bus.
    channels: usize,

    /// Largest block `process_block` handles.
    block_frames: usize,

    /// Frames produced by the last `process_block`.
    last_frames: usize,

    inputs: [InputSlot; MAX_INPUTS],
    buses: [Bus; MAX_BUSES],
}

impl MixGraph {
    /// Creates an empty graph.
    ///
    /// # Parameters
    ///
    /// - `channels`: Channels per input and bus (clamped to 1..=MAX_CHANNELS)
    /// - `block_frames`: Largest block processed at once
    pub fn new(channels: usize, block_frames: usize) -> Self {
        let channels = channels.clamp(1, MAX_CHANNELS);
        let block_frames = block_frames.max(1);
        Self {
            channels,
            block_frames,
            last_frames: 0,
            inputs: std::array::from_fn(|_| InputSlot::new(channels, block_frames)),
            buses: std::array::from_fn(|_| Bus {
                block: vec![vec![0.0; block_frames]; channels],
                meter: Volmeter::new(channels),
            }),
        }
    }

    /// Attaches a callback source to `slot`, routed to `bus`, and enables it.
    ///
    /// Invalid slot or bus indices are silently ignored.
    pub fn set_input(&mut self, slot: usize, bus: usize, source: Box<dyn MixSource>) {
        self.attach(slot, bus, InputSource::Callback(source));
    }

    /// Marks `slot` as externally fed and routes it to `bus`, enabled.
    ///
    /// Invalid slot or bus indices are silently ignored.
    pub fn route_stream(&mut self, slot: usize, bus: usize) {
        self.attach(slot, bus, InputSource::Fed { frames: 0 });
    }

    fn attach(&mut self, slot: usize, bus: usize, source: InputSource) {
        if bus >= MAX_BUSES {
            return;
        }
        let Some(input) = self.inputs.get_mut(slot) else {
            return;
        };

        input.source = Some(source);
        input.bus = bus;
        input.enabled = true;
    }

    /// Loads interleaved samples into a fed slot for the next block.
    ///
    /// Returns the number of frames accepted (at most one block). Slots that are not
    /// fed accept nothing.
    pub fn feed(&mut self, slot: usize, interleaved: &[f32]) -> usize {
        let channels = self.channels;
        let block_frames = self.block_frames;
        let Some(input) = self.inputs.get_mut(slot) else {
            return 0;
        };
        let Some(InputSource::Fed { frames }) = input.source.as_mut() else {
            return 0;
        };

        let n = (interleaved.len() / channels).min(block_frames);
        for (i, frame) in interleaved.chunks_exact(channels).take(n).enumerate() {
            for (ch, sample) in frame.iter().enumerate() {
                input.block[ch][i] = *sample;
            }
        }
        *frames = n;
        n
    }

    pub fn set_enabled(&mut self, slot: usize, enabled: bool) {
        if let Some(input) = self.inputs.get_mut(slot) {
            input.enabled = enabled;
        }
    }

    /// Detaches whatever source `slot` holds.
    pub fn clear_input(&mut self, slot: usize) {
        if let Some(input) = self.inputs.get_mut(slot) {
            input.source = None;
            input.enabled = false;
        }
    }

    /// Mixes one block of `frames` frames (capped at the block size) and meters every bus.
    ///
    /// Returns the number of frames processed.
    pub fn process_block(&mut self, frames: usize) -> usize {
        let frames = frames.min(self.block_frames);
        let channels = self.channels;

        for bus in &mut self.buses {
            for plane in &mut bus.block {
                plane[..frames].fill(0.0);
            }
        }

        for input in &mut self.inputs {
            let n = match input.source.as_mut() {
                Some(InputSource::Fed { frames: fed }) => {
                    let n = (*fed).min(frames);
                    *fed = 0;
                    n
                }
                Some(InputSource::Callback(source)) if input.enabled => {
                    for plane in &mut input.block {
                        plane[..frames].fill(0.0);
                    }
                    source.fill(&mut input.block, frames).min(frames)
                }
                _ => 0,
            };
            if !input.enabled || n == 0 {
                continue;
            }

            let bus = &mut self.buses[input.bus];
            for ch in 0..channels {
                for (acc, sample) in bus.block[ch][..n].iter_mut().zip(&input.block[ch][..n]) {
                    *acc += *sample;
                }
            }
        }

        for bus in &mut self.buses {
            for plane in &mut bus.block {
                for sample in &mut plane[..frames] {
                    *sample = sample.clamp(-1.0, 1.0);
                }
            }
            bus.meter.process(&bus.block, frames);
        }

        self.last_frames = frames;
        frames
    }

    /// Planar samples of `bus` from the last block.
    pub fn bus(&self, bus: usize) -> Option<Vec<&[f32]>> {
        let frames = self.last_frames;
        self.buses
            .get(bus)
            .map(|b| b.block.iter().map(|plane| &plane[..frames]).collect())
    }

    /// Writes the last block of `bus` into `dst` as interleaved samples.
    ///
    /// Returns the number of frames written.
    pub fn read_bus_interleaved(&self, bus: usize, dst: &mut [f32]) -> usize {
        let Some(bus) = self.buses.get(bus) else {
            return 0;
        };
        let frames = self.last_frames.min(dst.len() / self.channels);

        for (i, frame) in dst.chunks_exact_mut(self.channels).take(frames).enumerate() {
            for (ch, out) in frame.iter_mut().enumerate() {
                *out = bus.block[ch][i];
            }
        }
        frames
    }

    pub fn meter(&self, bus: usize) -> Option<&Volmeter> {
        self.buses.get(bus).map(|b| &b.meter)
    }

    /// Peak levels of every bus in dBFS.
    pub fn peak_levels(&self) -> [[f32; MAX_CHANNELS]; MAX_BUSES] {
        std::array::from_fn(|i| self.buses[i].meter.peak())
    }

    /// RMS levels of every bus in dBFS.
    pub fn rms_levels(&self) -> [[f32; MAX_CHANNELS]; MAX_BUSES] {
        std::array::from_fn(|i| self.buses[i].meter.rms())
    }

    pub fn reset_meters(&mut self) {
        for bus in &mut self.buses {
            bus.meter.reset();
        }
    }

    /// Gets the number of channels configured for this graph.
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }
}
