use crate::audio_engine::errors::SampleLoadError;

/// Channel layout conversion applied to decoded frames.
///
/// Currently supports:
/// - Same channel count: samples pass through
/// - Mono (1 channel) → Stereo (2 channels): duplicates mono signal to both channels
/// - Stereo (2 channels) → Mono (1 channel): averages both channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMap {
    Identity(usize),
    MonoToStereo,
    StereoToMono,
}

impl ChannelMap {
    /// Resolves the mapping from `file_channels` to `output_channels`.
    ///
    /// # Returns
    ///
    /// - `Ok(ChannelMap)`: Supported mapping
    /// - `Err(SampleLoadError)`: Unsupported channel mapping
    pub fn new(file_channels: usize, output_channels: usize) -> Result<Self, SampleLoadError> {
        match (file_channels, output_channels) {
            (a, b) if a == b && a > 0 => Ok(Self::Identity(a)),
            (1, 2) => Ok(Self::MonoToStereo),
            (2, 1) => Ok(Self::StereoToMono),
            _ => Err(SampleLoadError::UnsupportedChannels {
                file_channels,
                output_channels,
            }),
        }
    }

    pub fn input_channels(self) -> usize {
        match self {
            Self::Identity(channels) => channels,
            Self::MonoToStereo => 1,
            Self::StereoToMono => 2,
        }
    }

    pub fn output_channels(self) -> usize {
        match self {
            Self::Identity(channels) => channels,
            Self::MonoToStereo => 2,
            Self::StereoToMono => 1,
        }
    }

    /// Appends the interleaved `src` frames to `dst` in the output layout.
    ///
    /// A trailing partial frame in `src` is ignored.
    pub fn apply(self, src: &[f32], dst: &mut Vec<f32>) {
        let frames = src.len() / self.input_channels();
        dst.reserve(frames * self.output_channels());

        match self {
            Self::Identity(channels) => dst.extend_from_slice(&src[..frames * channels]),
            Self::MonoToStereo => {
                for s in &src[..frames] {
                    dst.push(*s);
                    dst.push(*s);
                }
            }
            Self::StereoToMono => {
                for frame in src.chunks_exact(2) {
                    dst.push((frame[0] + frame[1]) * 0.5);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(map: ChannelMap, src: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        map.apply(src, &mut out);
        out
    }

    #[test]
    fn test_mono_to_stereo() {
        let map = ChannelMap::new(1, 2).unwrap();
        let output = mapped(map, &[0.5, -0.3, 0.8]);

        assert_eq!(output.len(), 6); // 3 frames × 2 channels
        assert_eq!(output, vec![0.5, 0.5, -0.3, -0.3, 0.8, 0.8]);
    }

    #[test]
    fn test_stereo_to_mono() {
        let map = ChannelMap::new(2, 1).unwrap();
        let output = mapped(map, &[0.5, 0.3, -0.2, 0.4, 0.8, 0.6, 0.9]);

        assert_eq!(output.len(), 3); // trailing half frame dropped
        assert!((output[0] - 0.4).abs() < 1e-6);
        assert!((output[1] - 0.1).abs() < 1e-6);
        assert!((output[2] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_identity_appends() {
        let map = ChannelMap::new(2, 2).unwrap();
        let mut out = vec![1.0];
        map.apply(&[0.5, -0.3, 0.8, 0.2], &mut out);

        assert_eq!(map, ChannelMap::Identity(2));
        assert_eq!(out, vec![1.0, 0.5, -0.3, 0.8, 0.2]);
    }

    #[test]
    fn test_unsupported() {
        assert!(matches!(
            ChannelMap::new(2, 4),
            Err(SampleLoadError::UnsupportedChannels {
                file_channels: 2,
                output_channels: 4
            })
        ));
        assert!(ChannelMap::new(0, 0).is_err());
    }
}
