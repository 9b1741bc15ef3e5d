//! Profile validation.

use super::types::TranscodeProfile;
use crate::transcoder::TranscodeError;

const MIN_DIMENSION: u32 = 16;
const VIDEO_BITRATE_KBPS: (u32, u32) = (100, 100_000);
const AUDIO_BITRATE_KBPS: (u32, u32) = (32, 512);

/// Checks a profile against the supported codec/container/resolution
/// combinations.
///
/// Pure function: does not touch the filesystem or spawn anything.
pub fn validate_profile(profile: &TranscodeProfile) -> Result<(), TranscodeError> {
    let codec = profile.codec;
    let container = profile.container;

    if !container.supports(codec) {
        return Err(TranscodeError::invalid_profile(format!(
            "codec {} cannot be stored in a {} container",
            codec, container
        )));
    }

    let (width, height) = profile.resolution.bounds();
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(TranscodeError::invalid_profile(format!(
            "resolution {} is below the {}px minimum",
            profile.resolution, MIN_DIMENSION
        )));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(TranscodeError::invalid_profile(format!(
            "resolution {} must have even dimensions",
            profile.resolution
        )));
    }
    let (max_w, max_h) = codec.max_frame_size();
    if width > max_w || height > max_h {
        return Err(TranscodeError::invalid_profile(format!(
            "resolution {} exceeds {} limit of {}x{}",
            profile.resolution, codec, max_w, max_h
        )));
    }

    if profile.video_bitrate_kbps.is_some() && profile.crf.is_some() {
        return Err(TranscodeError::invalid_profile(
            "set either video_bitrate_kbps or crf, not both",
        ));
    }

    if let Some(kbps) = profile.video_bitrate_kbps {
        let (min, max) = VIDEO_BITRATE_KBPS;
        if !(min..=max).contains(&kbps) {
            return Err(TranscodeError::invalid_profile(format!(
                "video bitrate {} kbps outside {}-{} kbps",
                kbps, min, max
            )));
        }
    }

    if let Some(crf) = profile.crf {
        match codec.crf_range() {
            Some((min, max)) if (min..=max).contains(&crf) => {}
            Some((min, max)) => {
                return Err(TranscodeError::invalid_profile(format!(
                    "crf {} outside {}-{} for {}",
                    crf, min, max, codec
                )));
            }
            None => {
                return Err(TranscodeError::invalid_profile(format!(
                    "{} does not support crf, use video_bitrate_kbps",
                    codec
                )));
            }
        }
    }

    if let Some(kbps) = profile.audio_bitrate_kbps {
        let (min, max) = AUDIO_BITRATE_KBPS;
        if !(min..=max).contains(&kbps) {
            return Err(TranscodeError::invalid_profile(format!(
                "audio bitrate {} kbps outside {}-{} kbps",
                kbps, min, max
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Container, Resolution, VideoCodec};
    use crate::transcoder::ErrorKind;

    fn assert_invalid(profile: TranscodeProfile, needle: &str) {
        let err = validate_profile(&profile).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidProfile);
        assert!(
            err.to_string().contains(needle),
            "expected '{}' in '{}'",
            needle,
            err
        );
    }

    #[test]
    fn test_default_profile_is_valid() {
        assert!(validate_profile(&TranscodeProfile::default()).is_ok());
    }

    #[test]
    fn test_h264_720p_2mbps_is_valid() {
        let profile = TranscodeProfile::new(VideoCodec::H264, Container::Mp4, Resolution::P720)
            .with_bitrate_kbps(2000)
            .with_audio_kbps(128);
        assert!(validate_profile(&profile).is_ok());
    }

    #[test]
    fn test_codec_container_mismatch() {
        assert_invalid(
            TranscodeProfile::new(VideoCodec::H264, Container::Webm, Resolution::P720),
            "cannot be stored",
        );
        assert_invalid(
            TranscodeProfile::new(VideoCodec::Vp9, Container::Mp4, Resolution::P720),
            "cannot be stored",
        );
    }

    #[test]
    fn test_resolution_limits() {
        assert_invalid(
            TranscodeProfile::new(VideoCodec::Mpeg4, Container::Mp4, Resolution::P2160),
            "exceeds mpeg4 limit",
        );
        assert_invalid(
            TranscodeProfile::new(
                VideoCodec::H264,
                Container::Mp4,
                Resolution::Custom {
                    width: 8,
                    height: 8,
                },
            ),
            "minimum",
        );
        assert_invalid(
            TranscodeProfile::new(
                VideoCodec::H264,
                Container::Mkv,
                Resolution::Custom {
                    width: 1279,
                    height: 720,
                },
            ),
            "even",
        );
        let ok = TranscodeProfile::new(VideoCodec::H265, Container::Mkv, Resolution::P2160);
        assert!(validate_profile(&ok).is_ok());
    }

    #[test]
    fn test_rate_control_rules() {
        assert_invalid(
            TranscodeProfile::default().with_crf(20).with_bitrate_kbps(2000),
            "not both",
        );
        assert_invalid(TranscodeProfile::default().with_crf(60), "crf 60");
        assert_invalid(
            TranscodeProfile::new(VideoCodec::Mpeg4, Container::Mp4, Resolution::P720)
                .with_crf(10),
            "does not support crf",
        );
        assert_invalid(TranscodeProfile::default().with_bitrate_kbps(10), "video bitrate");
        assert_invalid(TranscodeProfile::default().with_audio_kbps(8), "audio bitrate");

        let vp9 = TranscodeProfile::new(VideoCodec::Vp9, Container::Webm, Resolution::P1080)
            .with_crf(60);
        assert!(validate_profile(&vp9).is_ok());
    }
}
