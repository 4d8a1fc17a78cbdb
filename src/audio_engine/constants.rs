//! Audio engine configuration constants and limits.

/// Maximum number of interleaved channels the engine processes.
pub const MAX_CHANNELS: usize = 2;

/// Number of input slots in the mix graph.
pub const MAX_INPUTS: usize = 8;

/// Number of output buses in the mix graph.
pub const MAX_BUSES: usize = 8;

/// Input slot that carries the decoded stream from the ring buffer.
pub const STREAM_SLOT: usize = 0;

/// Default internal sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default ring buffer capacity in frames.
pub const DEFAULT_BUFFER_FRAMES: usize = 1024 * 8;

/// Default processing block size in frames (one mix/meter pass).
pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

/// Default number of frames the producer tries to decode per wake-up.
pub const DEFAULT_PRODUCER_FRAMES: usize = 1024 * 8;

/// Default number of frames requested from the decoder per read call.
pub const DEFAULT_DECODE_CHUNK_FRAMES: usize = 512;

/// Default producer sleep between write cycles, in milliseconds.
pub const DEFAULT_PRODUCER_INTERVAL_MS: u64 = 20;

/// Default command queue capacity.
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 8;

/// Default telemetry polling interval in milliseconds (20 Hz).
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 50;

/// Length of the callback-rate smoothing window.
pub const PPS_WINDOW: usize = 10;

/// Number of trailing samples per channel carried across blocks for peak-hold.
pub const PEAK_HOLD_SAMPLES: usize = 4;

/// Largest sample rate an [`AudioFormat`](crate::audio_engine::format::AudioFormat) can describe.
pub const MAX_SAMPLE_RATE: u32 = (1 << 18) - 1;

/// Capacity of the wire-sample ring between [`CpalOutput`](crate::audio_engine::audio_stream::CpalOutput)
/// and the stream callback, in frames.
pub const CPAL_RING_FRAMES: usize = 1024 * 4;
