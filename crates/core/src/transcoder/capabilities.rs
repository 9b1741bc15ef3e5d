//! Encoder capability detection.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

use super::config::FfmpegConfig;
use crate::profile::VideoCodec;

/// Software encoders detected in the local ffmpeg build.
///
/// An undetected set (the default) reports every codec as available and
/// leaves failures to the encode itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderCapabilities {
    /// Whether detection ran successfully.
    pub detected: bool,
    /// libx264 available
    pub libx264: bool,
    /// libx265 available
    pub libx265: bool,
    /// libvpx-vp9 available
    pub libvpx_vp9: bool,
    /// libaom-av1 available
    pub libaom_av1: bool,
    /// Native mpeg4 encoder available
    pub mpeg4: bool,
}

impl EncoderCapabilities {
    /// Detect available encoders by probing ffmpeg.
    pub async fn detect(config: &FfmpegConfig) -> Self {
        let output = Command::new(&config.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(o) if o.status.success() => Self::from_encoder_list(&String::from_utf8_lossy(&o.stdout)),
            Ok(o) => {
                tracing::warn!(code = ?o.status.code(), "ffmpeg -encoders failed, assuming all encoders");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not run ffmpeg for encoder detection");
                Self::default()
            }
        }
    }

    /// Parses the table printed by `ffmpeg -encoders`.
    ///
    /// Each entry line is `<flags> <name> <description>`.
    pub fn from_encoder_list(stdout: &str) -> Self {
        let mut caps = Self {
            detected: true,
            ..Default::default()
        };

        let names = stdout
            .lines()
            .skip_while(|l| !l.trim_start().starts_with("------"))
            .skip(1)
            .filter_map(|l| l.split_whitespace().nth(1));

        for name in names {
            match name {
                "libx264" => caps.libx264 = true,
                "libx265" => caps.libx265 = true,
                "libvpx-vp9" => caps.libvpx_vp9 = true,
                "libaom-av1" => caps.libaom_av1 = true,
                "mpeg4" => caps.mpeg4 = true,
                _ => {}
            }
        }

        caps
    }

    /// Whether an encoder for `codec` is usable.
    pub fn supports(&self, codec: VideoCodec) -> bool {
        if !self.detected {
            return true;
        }
        match codec {
            VideoCodec::H264 => self.libx264,
            VideoCodec::H265 => self.libx265,
            VideoCodec::Vp9 => self.libvpx_vp9,
            VideoCodec::Av1 => self.libaom_av1,
            VideoCodec::Mpeg4 => self.mpeg4,
        }
    }

    /// Codecs usable with this ffmpeg build.
    pub fn available_codecs(&self) -> Vec<VideoCodec> {
        VideoCodec::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODERS: &str = "Encoders:
 V..... = Video
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10 (codec h264)
 V....D h264_v4l2m2m         V4L2 mem2mem H.264 encoder wrapper (codec h264)
 V.S... mpeg4                MPEG-4 part 2
 V....D mpeg4_v4l2m2m        V4L2 mem2mem MPEG4 encoder wrapper (codec mpeg4)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn test_default_capabilities_allow_everything() {
        let caps = EncoderCapabilities::default();
        assert!(!caps.detected);
        assert!(caps.supports(VideoCodec::Av1));
        assert_eq!(caps.available_codecs().len(), VideoCodec::ALL.len());
    }

    #[test]
    fn test_parse_encoder_list() {
        let caps = EncoderCapabilities::from_encoder_list(ENCODERS);
        assert!(caps.detected);
        assert!(caps.supports(VideoCodec::H264));
        assert!(caps.supports(VideoCodec::Mpeg4));
        assert!(!caps.supports(VideoCodec::H265));
        assert!(!caps.supports(VideoCodec::Vp9));
        assert_eq!(
            caps.available_codecs(),
            vec![VideoCodec::H264, VideoCodec::Mpeg4]
        );
    }

    #[test]
    fn test_header_lines_ignored() {
        // "V....." legend lines must not be read as encoder names.
        let caps = EncoderCapabilities::from_encoder_list(" V..... = Video\n ------\n");
        assert!(caps.detected);
        assert!(caps.available_codecs().is_empty());
    }
}
