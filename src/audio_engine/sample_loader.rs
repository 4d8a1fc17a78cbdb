//! Streaming audio file decoder.
//!
//! This module provides [`SymphoniaDecoder`], a [`Decoder`] that reads an audio file packet by
//! packet with the Symphonia library and hands out interleaved native-endian `f32` frames in
//! the requested channel layout.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::{
    audio::SampleBuffer as SymphoniaSampleBuffer,
    codecs::{Decoder as SymphoniaCodec, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
    units::{Time, TimeBase},
};
use symphonia::default::{get_codecs, get_probe};

use crate::audio_engine::channels::ChannelMap;
use crate::audio_engine::decoder::Decoder;
use crate::audio_engine::errors::{DecoderError, SampleLoadError};
use crate::audio_engine::format::AudioFormat;

struct Probed {
    reader: Box<dyn FormatReader>,
    track_id: u32,
    rate: u32,
    channels: usize,
    time_base: Option<TimeBase>,
    n_frames: Option<u64>,
}

fn probe(path: &Path) -> Result<Probed, SampleLoadError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let reader = probed.format;

    let track = reader
        .default_track()
        .ok_or(SampleLoadError::NoDefaultTrack)?;
    let rate = track
        .codec_params
        .sample_rate
        .ok_or(SampleLoadError::MissingSampleRate)?;
    let channels = track
        .codec_params
        .channels
        .ok_or(SampleLoadError::MissingChannels)?
        .count();

    Ok(Probed {
        track_id: track.id,
        rate,
        channels,
        time_base: track.codec_params.time_base,
        n_frames: track.codec_params.n_frames,
        reader,
    })
}

struct OpenStream {
    reader: Box<dyn FormatReader>,
    codec: Box<dyn SymphoniaCodec>,
    track_id: u32,
    time_base: Option<TimeBase>,
    /// Decoded, channel-mapped samples not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames to drop from the next decoded packets after a seek.
    skip_frames: u64,
    eos: bool,
}

/// File-backed [`Decoder`] built on Symphonia.
///
/// The file is probed once at construction so [`Decoder::format`], duration and bitrate
/// are known before `open`. Every `open` starts a fresh stream at the beginning.
pub struct SymphoniaDecoder {
    path: PathBuf,
    format: AudioFormat,
    map: ChannelMap,
    duration: Option<Duration>,
    bitrate: Option<u32>,
    stream: Option<OpenStream>,
}

impl SymphoniaDecoder {
    /// Probes `path` and prepares a decoder producing `output_channels` channels.
    ///
    /// # Errors
    ///
    /// This function may return errors for various conditions:
    /// - File not found or cannot be opened
    /// - Audio format not recognized or corrupted
    /// - Unsupported channel count
    pub fn new(path: impl AsRef<Path>, output_channels: usize) -> Result<Self, SampleLoadError> {
        let path = path.as_ref().to_path_buf();
        let probed = probe(&path)?;

        let map = ChannelMap::new(probed.channels, output_channels)?;
        let channels = u8::try_from(output_channels).map_err(|_| {
            SampleLoadError::UnsupportedChannels {
                file_channels: probed.channels,
                output_channels,
            }
        })?;
        let format = AudioFormat::float(probed.rate, channels)?;

        let duration = probed
            .n_frames
            .map(|frames| format.frames_to_duration(frames));
        let bitrate = match (duration, fs::metadata(&path)) {
            (Some(duration), Ok(meta)) if !duration.is_zero() => {
                u32::try_from((meta.len() as f64 * 8.0 / duration.as_secs_f64()) as u64).ok()
            }
            _ => None,
        };

        log::debug!(
            "Probed {}: {} Hz, {} -> {} channels, duration {:?}",
            path.display(),
            probed.rate,
            probed.channels,
            output_channels,
            duration
        );

        Ok(Self {
            path,
            format,
            map,
            duration,
            bitrate,
            stream: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes the next packet of our track into `stream.pending`.
    ///
    /// Returns `false` at end of stream.
    fn decode_next(map: ChannelMap, rate: u32, stream: &mut OpenStream) -> Result<bool, DecoderError> {
        loop {
            let packet = match stream.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(err) => return Err(DecoderError::Read(err.to_string())),
            };
            if packet.track_id() != stream.track_id {
                continue;
            }

            let audio_buf = match stream.codec.decode(&packet) {
                Ok(audio_buf) => audio_buf,
                Err(SymphoniaError::DecodeError(err)) => {
                    log::warn!("Skipping undecodable packet: {err}");
                    continue;
                }
                Err(err) => return Err(DecoderError::Read(err.to_string())),
            };

            let spec = *audio_buf.spec();
            let capacity = audio_buf.capacity() as u64;
            let mut sample_buf = SymphoniaSampleBuffer::<f32>::new(capacity, spec);
            sample_buf.copy_interleaved_ref(audio_buf);

            let mut samples = sample_buf.samples();
            let in_channels = map.input_channels();
            if stream.skip_frames > 0 {
                let frames = (samples.len() / in_channels) as u64;
                let skip = stream.skip_frames.min(frames);
                stream.skip_frames -= skip;
                samples = &samples[skip as usize * in_channels..];
            }
            if samples.is_empty() {
                continue;
            }

            stream.pending.clear();
            stream.pending_pos = 0;
            map.apply(samples, &mut stream.pending);
            log::trace!("Decoded packet: {} frames at {} Hz", samples.len() / in_channels, rate);
            return Ok(true);
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn open(&mut self) -> Result<(), DecoderError> {
        let probed = probe(&self.path)?;
        let track = probed
            .reader
            .tracks()
            .iter()
            .find(|t| t.id == probed.track_id)
            .ok_or(SampleLoadError::NoDefaultTrack)?;
        let codec = get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(SampleLoadError::Decode)?;

        self.stream = Some(OpenStream {
            reader: probed.reader,
            codec,
            track_id: probed.track_id,
            time_base: probed.time_base,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            eos: false,
        });
        log::debug!("Opened {}", self.path.display());
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("Closed {}", self.path.display());
        }
    }

    fn read(&mut self, dst: &mut [u8], frames: usize) -> Result<usize, DecoderError> {
        let map = self.map;
        let rate = self.format.rate();
        let channels = self.format.channels();
        let frame_size = self.format.frame_size();
        let Some(stream) = self.stream.as_mut() else {
            return Err(DecoderError::NotOpen);
        };

        let wanted = frames.min(dst.len() / frame_size);
        let mut produced = 0;
        while produced < wanted {
            if stream.pending_pos >= stream.pending.len() {
                if stream.eos || !Self::decode_next(map, rate, stream)? {
                    stream.eos = true;
                    break;
                }
            }

            let available = (stream.pending.len() - stream.pending_pos) / channels;
            let n = available.min(wanted - produced);
            let src = &stream.pending[stream.pending_pos..stream.pending_pos + n * channels];
            let out = &mut dst[produced * frame_size..(produced + n) * frame_size];
            for (bytes, sample) in out.chunks_exact_mut(4).zip(src) {
                bytes.copy_from_slice(&sample.to_ne_bytes());
            }

            stream.pending_pos += n * channels;
            produced += n;
        }

        Ok(produced)
    }

    fn seek(&mut self, offset_ms: u64) -> Result<(), DecoderError> {
        let rate = self.format.rate();
        let Some(stream) = self.stream.as_mut() else {
            return Err(DecoderError::NotOpen);
        };

        let time = Time::new(offset_ms / 1000, (offset_ms % 1000) as f64 / 1000.0);
        let seeked = stream
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(stream.track_id),
                },
            )
            .map_err(|e| DecoderError::Seek {
                offset_ms,
                reason: e.to_string(),
            })?;
        stream.codec.reset();

        let delta = seeked.required_ts.saturating_sub(seeked.actual_ts);
        stream.skip_frames = match stream.time_base {
            Some(tb) => {
                let t = tb.calc_time(delta);
                ((t.seconds as f64 + t.frac) * f64::from(rate)).round() as u64
            }
            None => delta,
        };
        stream.pending.clear();
        stream.pending_pos = 0;
        stream.eos = false;

        log::debug!(
            "Seeked {} to {offset_ms} ms (skipping {} frames)",
            self.path.display(),
            stream.skip_frames
        );
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use super::*;

    /// Helper function to create a PCM16 WAV file for testing.
    pub(crate) fn write_pcm16_wav(
        path: &Path,
        channels: u16,
        sample_rate_hz: u32,
        samples: &[i16],
    ) -> std::io::Result<()> {
        let bits_per_sample = 16u16;
        let block_align = channels * (bits_per_sample / 8);
        let byte_rate = sample_rate_hz * u32::from(block_align);
        let data_len_bytes = u32::try_from(samples.len() * 2).expect("sample data too large");
        let chunk_size = 36 + data_len_bytes;

        let mut file = File::create(path)?;
        file.write_all(b"RIFF")?;
        file.write_all(&chunk_size.to_le_bytes())?;
        file.write_all(b"WAVE")?;

        file.write_all(b"fmt ")?;
        file.write_all(&16u32.to_le_bytes())?;
        file.write_all(&1u16.to_le_bytes())?; // PCM
        file.write_all(&channels.to_le_bytes())?;
        file.write_all(&sample_rate_hz.to_le_bytes())?;
        file.write_all(&byte_rate.to_le_bytes())?;
        file.write_all(&block_align.to_le_bytes())?;
        file.write_all(&bits_per_sample.to_le_bytes())?;

        file.write_all(b"data")?;
        file.write_all(&data_len_bytes.to_le_bytes())?;
        for sample in samples {
            file.write_all(&sample.to_le_bytes())?;
        }

        Ok(())
    }

    fn read_all(decoder: &mut SymphoniaDecoder) -> Vec<f32> {
        let frame_size = decoder.format().frame_size();
        let mut bytes = vec![0u8; 64 * frame_size];
        let mut out = Vec::new();
        loop {
            let n = decoder.read(&mut bytes, 64).unwrap();
            if n == 0 {
                break;
            }
            out.extend(
                bytes[..n * frame_size]
                    .chunks_exact(4)
                    .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
            );
        }
        out
    }

    #[test]
    fn test_decode_wav_to_f32_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wav");

        let samples = [0i16, 16_384i16, -16_384i16, 32_767i16];
        write_pcm16_wav(&path, 1, 44_100, &samples).unwrap();

        let mut decoder = SymphoniaDecoder::new(&path, 1).unwrap();
        assert_eq!(decoder.format(), AudioFormat::float(44_100, 1).unwrap());

        decoder.open().unwrap();
        let decoded = read_all(&mut decoder);
        assert_eq!(decoded.len(), samples.len());
        assert!((decoded[1] - 0.5).abs() < 1e-4);
        assert!((decoded[2] + 0.5).abs() < 1e-4);
        assert!(decoded.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_decode_channel_mapping_mono_to_stereo() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wav");

        let samples = [0i16, 16_384i16, -16_384i16];
        write_pcm16_wav(&path, 1, 44_100, &samples).unwrap();

        let mut decoder = SymphoniaDecoder::new(&path, 2).unwrap();
        assert_eq!(decoder.format().channels(), 2);
        decoder.open().unwrap();
        let decoded = read_all(&mut decoder);
        assert_eq!(decoded.len(), samples.len() * 2);

        // Verify that mono samples are duplicated to both stereo channels
        for frame in decoded.chunks_exact(2) {
            assert!((frame[0] - frame[1]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_metadata_and_seek() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ramp.wav");

        let samples: Vec<i16> = (0..8000).map(|i| i as i16).collect();
        write_pcm16_wav(&path, 1, 8000, &samples).unwrap();

        let mut decoder = SymphoniaDecoder::new(&path, 1).unwrap();
        assert_eq!(decoder.duration(), Some(Duration::from_secs(1)));
        assert!(decoder.bitrate().unwrap() >= 128_000);

        assert!(matches!(decoder.seek(500), Err(DecoderError::NotOpen)));

        decoder.open().unwrap();
        decoder.seek(500).unwrap();

        let mut bytes = [0u8; 4];
        assert_eq!(decoder.read(&mut bytes, 1).unwrap(), 1);
        let value = f32::from_ne_bytes(bytes) * 32_768.0;
        assert!((value - 4000.0).abs() < 0.5, "got {value}");
    }

    #[test]
    fn test_read_requires_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wav");
        write_pcm16_wav(&path, 2, 44_100, &[0; 8]).unwrap();

        let mut decoder = SymphoniaDecoder::new(&path, 2).unwrap();
        let mut bytes = [0u8; 32];
        assert!(matches!(decoder.read(&mut bytes, 4), Err(DecoderError::NotOpen)));

        decoder.open().unwrap();
        decoder.close();
        assert!(matches!(decoder.read(&mut bytes, 4), Err(DecoderError::NotOpen)));
    }

    #[test]
    fn test_unsupported_channel_mapping() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.wav");
        write_pcm16_wav(&path, 2, 44_100, &[0; 8]).unwrap();

        assert!(matches!(
            SymphoniaDecoder::new(&path, 4),
            Err(SampleLoadError::UnsupportedChannels { .. })
        ));
    }

    #[test]
    fn test_decode_invalid_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nonexistent.wav");

        assert!(matches!(
            SymphoniaDecoder::new(&path, 1),
            Err(SampleLoadError::Io(_))
        ));
    }
}
