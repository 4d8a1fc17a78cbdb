//! Float ↔ fixed-point PCM conversion.
//!
//! The engine works on interleaved native `f32` in `[-1.0, 1.0]`. Decoders and
//! devices speak whatever [`AudioFormat`] they declare; these two functions
//! translate between the two, scaling by the sample width, offsetting unsigned
//! encodings, honouring the format's byte order and saturating out-of-range
//! input instead of wrapping.

use crate::audio_engine::format::{AudioFormat, Endian, SampleEncoding};

/// Converts `frames` interleaved float frames from `src` into `dst` using `format`.
///
/// Returns the number of frames converted, limited by both slices.
pub fn float_to_fixed(format: AudioFormat, dst: &mut [u8], src: &[f32], frames: usize) -> usize {
    let channels = format.channels();
    let size = format.sample_size();
    let frames = frames
        .min(src.len() / channels)
        .min(dst.len() / format.frame_size());

    let samples = frames * channels;
    for (sample, out) in src[..samples]
        .iter()
        .zip(dst.chunks_exact_mut(size))
    {
        encode_sample(format.encoding(), format.endian(), *sample, out);
    }

    frames
}

/// Converts `frames` interleaved frames in `format` from `src` into float samples in `dst`.
///
/// Returns the number of frames converted, limited by both slices.
pub fn fixed_to_float(format: AudioFormat, dst: &mut [f32], src: &[u8], frames: usize) -> usize {
    let channels = format.channels();
    let size = format.sample_size();
    let frames = frames
        .min(dst.len() / channels)
        .min(src.len() / format.frame_size());

    let samples = frames * channels;
    for (out, bytes) in dst[..samples].iter_mut().zip(src.chunks_exact(size)) {
        *out = decode_sample(format.encoding(), format.endian(), bytes);
    }

    frames
}

/// Scale factor between a signed integer of `bits` width and `[-1.0, 1.0)`.
fn full_scale(bits: u32) -> f64 {
    (1u64 << (bits - 1)) as f64
}

/// Maps a float sample to the signed integer domain of `bits`, saturating.
fn quantize(sample: f32, bits: u32) -> i64 {
    let scale = full_scale(bits);
    let max = scale - 1.0;
    let value = if sample.is_nan() {
        0.0
    } else {
        (f64::from(sample) * scale).round()
    };

    value.clamp(-scale, max) as i64
}

fn encode_sample(encoding: SampleEncoding, endian: Endian, sample: f32, out: &mut [u8]) {
    if encoding.is_float() {
        let bytes = match endian {
            Endian::Little => sample.to_le_bytes(),
            Endian::Big => sample.to_be_bytes(),
        };
        out.copy_from_slice(&bytes);
        return;
    }

    let bits = encoding.bits();
    let mut value = quantize(sample, bits);
    if !encoding.is_signed() {
        value += 1i64 << (bits - 1);
    }

    let raw = (value as u64).to_le_bytes();
    let width = encoding.sample_size();
    match endian {
        Endian::Little => out.copy_from_slice(&raw[..width]),
        Endian::Big => {
            for (dst, src) in out.iter_mut().zip(raw[..width].iter().rev()) {
                *dst = *src;
            }
        }
    }
}

fn decode_sample(encoding: SampleEncoding, endian: Endian, bytes: &[u8]) -> f32 {
    if encoding.is_float() {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        return match endian {
            Endian::Little => f32::from_le_bytes(raw),
            Endian::Big => f32::from_be_bytes(raw),
        };
    }

    let bits = encoding.bits();
    let width = encoding.sample_size();

    let mut raw = [0u8; 8];
    match endian {
        Endian::Little => raw[..width].copy_from_slice(bytes),
        Endian::Big => {
            for (dst, src) in raw[..width].iter_mut().zip(bytes.iter().rev()) {
                *dst = *src;
            }
        }
    }
    let unsigned = u64::from_le_bytes(raw) as i64;

    let value = if encoding.is_signed() {
        // Sign-extend from `bits` to 64.
        let shift = 64 - bits;
        (unsigned << shift) >> shift
    } else {
        unsigned - (1i64 << (bits - 1))
    };

    (value as f64 / full_scale(bits)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(encoding: SampleEncoding, endian: Endian) -> AudioFormat {
        AudioFormat::new(encoding, 44_100, 2)
            .unwrap()
            .with_endian(endian)
    }

    #[test]
    fn test_s16_little_endian_values() {
        let af = format(SampleEncoding::S16, Endian::Little);
        let src = [0.0f32, 0.5, -0.5, 1.0];
        let mut dst = [0u8; 8];

        assert_eq!(float_to_fixed(af, &mut dst, &src, 2), 2);

        let values: Vec<i16> = dst
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![0, 16_384, -16_384, i16::MAX]);
    }

    #[test]
    fn test_saturates_instead_of_wrapping() {
        let af = format(SampleEncoding::S16, Endian::Little);
        let src = [4.0f32, -4.0];
        let mut dst = [0u8; 4];

        float_to_fixed(af, &mut dst, &src, 1);

        assert_eq!(i16::from_le_bytes([dst[0], dst[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([dst[2], dst[3]]), i16::MIN);
    }

    #[test]
    fn test_big_endian_output_is_swapped() {
        let af = format(SampleEncoding::S16, Endian::Big);
        let src = [0.5f32, -0.5];
        let mut dst = [0u8; 4];

        float_to_fixed(af, &mut dst, &src, 1);

        assert_eq!(i16::from_be_bytes([dst[0], dst[1]]), 16_384);
        assert_eq!(i16::from_be_bytes([dst[2], dst[3]]), -16_384);
    }

    #[test]
    fn test_unsigned_encodings_are_offset() {
        let af = format(SampleEncoding::U8, Endian::Little);
        let src = [0.0f32, -1.0];
        let mut dst = [0u8; 2];

        float_to_fixed(af, &mut dst, &src, 1);
        assert_eq!(dst, [128, 0]);

        let mut back = [0.0f32; 2];
        fixed_to_float(af, &mut back, &dst, 1);
        assert_eq!(back, [0.0, -1.0]);
    }

    #[test]
    fn test_s24_packed() {
        let af = format(SampleEncoding::S24, Endian::Little);
        let src = [-0.25f32, 0.75];
        let mut dst = [0u8; 6];

        assert_eq!(float_to_fixed(af, &mut dst, &src, 1), 1);

        let mut back = [0.0f32; 2];
        assert_eq!(fixed_to_float(af, &mut back, &dst, 1), 1);
        assert!((back[0] + 0.25).abs() < 1e-6);
        assert!((back[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_round_trip_within_one_lsb() {
        let src: Vec<f32> = (0..64).map(|i| (i as f32 / 32.0) - 1.0).collect();

        for encoding in [
            SampleEncoding::U8,
            SampleEncoding::S8,
            SampleEncoding::U16,
            SampleEncoding::S16,
            SampleEncoding::U24,
            SampleEncoding::S24,
            SampleEncoding::U32,
            SampleEncoding::S32,
            SampleEncoding::F32,
        ] {
            for endian in [Endian::Little, Endian::Big] {
                let af = format(encoding, endian);
                let mut bytes = vec![0u8; 32 * af.frame_size()];
                let mut back = vec![0.0f32; 64];

                assert_eq!(float_to_fixed(af, &mut bytes, &src, 32), 32);
                assert_eq!(fixed_to_float(af, &mut back, &bytes, 32), 32);

                let lsb = 1.0 / full_scale(encoding.bits()) as f32;
                for (a, b) in src.iter().zip(&back) {
                    assert!(
                        (a - b).abs() <= lsb,
                        "{encoding:?}/{endian:?}: {a} vs {b}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_frames_limited_by_buffers() {
        let af = format(SampleEncoding::S16, Endian::Little);
        let src = [0.1f32; 8];
        let mut dst = [0u8; 8];

        assert_eq!(float_to_fixed(af, &mut dst, &src, 100), 2);

        let mut back = [0.0f32; 2];
        assert_eq!(fixed_to_float(af, &mut back, &dst, 100), 1);
    }
}
