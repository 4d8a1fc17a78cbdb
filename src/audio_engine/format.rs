//! PCM format descriptor.
//!
//! [`AudioFormat`] describes how a stream of samples is laid out: byte order,
//! sample encoding, rate and channel count. It is a small `Copy` value passed
//! around by value and never mutated once built.

use std::time::Duration;

use crate::audio_engine::constants::MAX_SAMPLE_RATE;
use crate::audio_engine::errors::FormatError;

const ENDIAN_MASK: u32 = 0x0000_0001;
const SIGNED_MASK: u32 = 0x0000_0002;
const DEPTH_MASK: u32 = 0x0000_0038;
const RATE_MASK: u32 = 0x00ff_ffc0;
const CHANNELS_MASK: u32 = 0xff00_0000;

const SIGNED_SHIFT: u32 = 1;
const DEPTH_SHIFT: u32 = 3;
const RATE_SHIFT: u32 = 6;
const CHANNELS_SHIFT: u32 = 24;

const DEPTH_CODE_FLOAT: u32 = 7;

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the running target.
    pub const NATIVE: Endian = if cfg!(target_endian = "big") {
        Endian::Big
    } else {
        Endian::Little
    };
}

/// Sample encoding: integer width and signedness, or 32-bit float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    U8,
    S8,
    U16,
    S16,
    U24,
    S24,
    U32,
    S32,
    F32,
}

impl SampleEncoding {
    /// Bits per sample.
    pub const fn bits(self) -> u32 {
        match self {
            Self::U8 | Self::S8 => 8,
            Self::U16 | Self::S16 => 16,
            Self::U24 | Self::S24 => 24,
            Self::U32 | Self::S32 | Self::F32 => 32,
        }
    }

    /// Bytes per sample.
    pub const fn sample_size(self) -> usize {
        (self.bits() / 8) as usize
    }

    pub const fn is_signed(self) -> bool {
        !matches!(self, Self::U8 | Self::U16 | Self::U24 | Self::U32)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32)
    }
}

/// Immutable description of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    endian: Endian,
    encoding: SampleEncoding,
    rate: u32,
    channels: u8,
}

impl AudioFormat {
    /// CD audio: signed 16-bit little-endian, 44.1 kHz, stereo.
    pub const CD: AudioFormat = AudioFormat {
        endian: Endian::Little,
        encoding: SampleEncoding::S16,
        rate: 44_100,
        channels: 2,
    };

    /// Creates a native-endian format.
    pub fn new(encoding: SampleEncoding, rate: u32, channels: u8) -> Result<Self, FormatError> {
        if rate == 0 || rate > MAX_SAMPLE_RATE {
            return Err(FormatError::InvalidRate(rate));
        }
        if channels == 0 {
            return Err(FormatError::NoChannels);
        }

        Ok(Self {
            endian: Endian::NATIVE,
            encoding,
            rate,
            channels,
        })
    }

    /// Native-endian 32-bit float format, the engine's internal representation.
    pub fn float(rate: u32, channels: u8) -> Result<Self, FormatError> {
        Self::new(SampleEncoding::F32, rate, channels)
    }

    /// Returns a copy of this format with a different byte order.
    pub fn with_endian(self, endian: Endian) -> Self {
        Self { endian, ..self }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn channels(&self) -> usize {
        usize::from(self.channels)
    }

    pub fn sample_size(&self) -> usize {
        self.encoding.sample_size()
    }

    pub fn frame_size(&self) -> usize {
        self.sample_size() * self.channels()
    }

    pub fn second_size(&self) -> usize {
        self.frame_size() * self.rate as usize
    }

    /// Whether samples must be byte-swapped relative to the running target.
    pub fn is_foreign_endian(&self) -> bool {
        self.endian != Endian::NATIVE
    }

    /// Converts a millisecond offset to a frame index (floored).
    pub fn ms_to_frames(&self, offset_ms: u64) -> u64 {
        let frames = u128::from(offset_ms) * u128::from(self.rate) / 1000;
        u64::try_from(frames).unwrap_or(u64::MAX)
    }

    /// Converts a frame count to wall-clock duration at this rate.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        let nanos = u128::from(frames) * 1_000_000_000 / u128::from(self.rate);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Converts a frame count to seconds.
    pub fn frames_to_secs(&self, frames: u64) -> f64 {
        frames as f64 / f64::from(self.rate)
    }

    /// Converts a duration to a whole number of frames (floored).
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        let frames = duration.as_nanos() * u128::from(self.rate) / 1_000_000_000;
        u64::try_from(frames).unwrap_or(u64::MAX)
    }

    /// Packs the format into the 32-bit descriptor layout:
    /// bit 0 endian, bit 1 signed, bits 3-5 depth, bits 6-23 rate, bits 24-31 channels.
    pub fn to_bits(&self) -> u32 {
        let endian = match self.endian {
            Endian::Little => 0,
            Endian::Big => 1,
        };
        let signed = u32::from(self.encoding.is_signed());
        let depth = if self.encoding.is_float() {
            DEPTH_CODE_FLOAT
        } else {
            self.encoding.bits() / 8 - 1
        };

        endian
            | (signed << SIGNED_SHIFT)
            | ((depth << DEPTH_SHIFT) & DEPTH_MASK)
            | ((self.rate << RATE_SHIFT) & RATE_MASK)
            | ((u32::from(self.channels) << CHANNELS_SHIFT) & CHANNELS_MASK)
    }

    /// Unpacks a descriptor produced by [`AudioFormat::to_bits`].
    pub fn from_bits(bits: u32) -> Result<Self, FormatError> {
        let endian = if bits & ENDIAN_MASK == 0 {
            Endian::Little
        } else {
            Endian::Big
        };
        let signed = bits & SIGNED_MASK != 0;
        let depth = (bits & DEPTH_MASK) >> DEPTH_SHIFT;
        let rate = (bits & RATE_MASK) >> RATE_SHIFT;
        let channels = ((bits & CHANNELS_MASK) >> CHANNELS_SHIFT) as u8;

        let encoding = match (depth, signed) {
            (0, false) => SampleEncoding::U8,
            (0, true) => SampleEncoding::S8,
            (1, false) => SampleEncoding::U16,
            (1, true) => SampleEncoding::S16,
            (2, false) => SampleEncoding::U24,
            (2, true) => SampleEncoding::S24,
            (3, false) => SampleEncoding::U32,
            (3, true) => SampleEncoding::S32,
            (DEPTH_CODE_FLOAT, _) => SampleEncoding::F32,
            _ => return Err(FormatError::UnknownEncoding(bits)),
        };

        Ok(Self::new(encoding, rate, channels)?.with_endian(endian))
    }
}
