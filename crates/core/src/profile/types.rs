//! Types for the profile module.

use serde::{Deserialize, Serialize};

/// Target video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
    /// VP9
    Vp9,
    /// AV1
    Av1,
    /// MPEG-4 Part 2
    Mpeg4,
}

impl VideoCodec {
    /// All codecs known to the engine.
    pub const ALL: [VideoCodec; 5] = [
        Self::H264,
        Self::H265,
        Self::Vp9,
        Self::Av1,
        Self::Mpeg4,
    ];

    /// Returns the ffmpeg encoder name for this codec.
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Vp9 => "libvpx-vp9",
            Self::Av1 => "libaom-av1",
            Self::Mpeg4 => "mpeg4",
        }
    }

    /// Returns the codec name as reported by ffprobe.
    pub fn probe_name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "hevc",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Mpeg4 => "mpeg4",
        }
    }

    /// Largest frame the engine will ask this encoder for.
    pub fn max_frame_size(&self) -> (u32, u32) {
        match self {
            Self::H264 => (4096, 2304),
            Self::H265 | Self::Vp9 | Self::Av1 => (8192, 4320),
            Self::Mpeg4 => (2048, 2048),
        }
    }

    /// Inclusive CRF range, `None` if the encoder has no CRF mode.
    pub fn crf_range(&self) -> Option<(u8, u8)> {
        match self {
            Self::H264 | Self::H265 => Some((0, 51)),
            Self::Vp9 | Self::Av1 => Some((0, 63)),
            Self::Mpeg4 => None,
        }
    }

    /// Rate control used when the profile sets neither CRF nor bitrate.
    pub fn default_rate_control(&self) -> RateControl {
        match self {
            Self::H264 => RateControl::Crf(22),
            Self::H265 => RateControl::Crf(28),
            Self::Vp9 => RateControl::Crf(32),
            Self::Av1 => RateControl::Crf(35),
            Self::Mpeg4 => RateControl::Bitrate(2500),
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Mpeg4 => "mpeg4",
        };
        f.write_str(name)
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    /// MPEG-4 Part 14 (.mp4)
    Mp4,
    /// Matroska (.mkv)
    Mkv,
    /// WebM
    Webm,
    /// QuickTime (.mov)
    Mov,
}

impl Container {
    /// Returns the file extension for this container.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
            Self::Mov => "mov",
        }
    }

    /// Returns the ffmpeg muxer name.
    pub fn ffmpeg_muxer(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "matroska",
            Self::Webm => "webm",
            Self::Mov => "mov",
        }
    }

    /// Whether the container can carry the given video codec.
    pub fn supports(&self, codec: VideoCodec) -> bool {
        use VideoCodec::*;
        match self {
            Self::Mp4 => matches!(codec, H264 | H265 | Av1 | Mpeg4),
            Self::Mov => matches!(codec, H264 | H265 | Mpeg4),
            Self::Mkv => true,
            Self::Webm => matches!(codec, Vp9 | Av1),
        }
    }

    /// Audio encoder used when the profile keeps audio.
    pub fn audio_encoder(&self) -> &'static str {
        match self {
            Self::Webm => "libopus",
            _ => "aac",
        }
    }

    /// Whether the muxer benefits from moving the index to the front.
    pub fn wants_faststart(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Mov)
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Bounding box for the output frame.
///
/// The source is scaled down to fit inside the box while keeping its aspect
/// ratio; it is never scaled up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
    #[serde(rename = "custom")]
    Custom { width: u32, height: u32 },
}

impl Resolution {
    /// Width and height of the bounding box.
    pub fn bounds(&self) -> (u32, u32) {
        match *self {
            Self::P360 => (640, 360),
            Self::P480 => (854, 480),
            Self::P720 => (1280, 720),
            Self::P1080 => (1920, 1080),
            Self::P1440 => (2560, 1440),
            Self::P2160 => (3840, 2160),
            Self::Custom { width, height } => (width, height),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom { width, height } => write!(f, "{}x{}", width, height),
            other => write!(f, "{}p", other.bounds().1),
        }
    }
}

/// Effective rate control for an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// Constant rate factor.
    Crf(u8),
    /// Average bitrate in kbps.
    Bitrate(u32),
}

/// Target settings for a transcode job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    /// Target video codec.
    pub codec: VideoCodec,
    /// Target container.
    pub container: Container,
    /// Bounding resolution.
    pub resolution: Resolution,
    /// Target video bitrate in kbps (alternative to CRF).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u32>,
    /// Constant Rate Factor (quality, lower = better).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,
    /// Audio bitrate in kbps. Audio is dropped when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_kbps: Option<u32>,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            container: Container::Mp4,
            resolution: Resolution::P720,
            video_bitrate_kbps: None,
            crf: None,
            audio_bitrate_kbps: None,
        }
    }
}

/// Encoder preference for the mobile preset.
const MOBILE_CODECS: [VideoCodec; 3] = [VideoCodec::H264, VideoCodec::Mpeg4, VideoCodec::H265];

impl TranscodeProfile {
    /// 720p mp4 preset on the first usable encoder in h264, mpeg4, h265 order.
    ///
    /// Rate control follows the codec default, so mpeg4 encodes at a fixed
    /// bitrate. `None` when no listed encoder is usable.
    pub fn mobile(usable: impl Fn(VideoCodec) -> bool) -> Option<Self> {
        MOBILE_CODECS
            .into_iter()
            .find(|codec| usable(*codec))
            .map(|codec| Self::new(codec, Container::Mp4, Resolution::P720))
    }

    /// Creates a profile with codec defaults for rate control and no audio.
    pub fn new(codec: VideoCodec, container: Container, resolution: Resolution) -> Self {
        Self {
            codec,
            container,
            resolution,
            ..Default::default()
        }
    }

    /// Sets the target video bitrate.
    pub fn with_bitrate_kbps(mut self, kbps: u32) -> Self {
        self.video_bitrate_kbps = Some(kbps);
        self
    }

    /// Sets the CRF.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Keeps the audio track, re-encoded at the given bitrate.
    pub fn with_audio_kbps(mut self, kbps: u32) -> Self {
        self.audio_bitrate_kbps = Some(kbps);
        self
    }

    /// Rate control the encoder will actually use.
    pub fn rate_control(&self) -> RateControl {
        match (self.video_bitrate_kbps, self.crf) {
            (Some(kbps), _) => RateControl::Bitrate(kbps),
            (None, Some(crf)) => RateControl::Crf(crf),
            (None, None) => self.codec.default_rate_control(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_encoder_names() {
        assert_eq!(VideoCodec::H264.ffmpeg_encoder(), "libx264");
        assert_eq!(VideoCodec::H265.ffmpeg_encoder(), "libx265");
        assert_eq!(VideoCodec::Mpeg4.ffmpeg_encoder(), "mpeg4");
        assert_eq!(VideoCodec::H265.probe_name(), "hevc");
    }

    #[test]
    fn test_container_support_matrix() {
        assert!(Container::Mp4.supports(VideoCodec::H264));
        assert!(!Container::Mp4.supports(VideoCodec::Vp9));
        assert!(Container::Webm.supports(VideoCodec::Vp9));
        assert!(!Container::Webm.supports(VideoCodec::H264));
        assert!(!Container::Mov.supports(VideoCodec::Av1));
        assert!(VideoCodec::ALL.iter().all(|c| Container::Mkv.supports(*c)));
    }

    #[test]
    fn test_container_muxer() {
        assert_eq!(Container::Mkv.ffmpeg_muxer(), "matroska");
        assert_eq!(Container::Mkv.extension(), "mkv");
        assert_eq!(Container::Webm.audio_encoder(), "libopus");
        assert_eq!(Container::Mp4.audio_encoder(), "aac");
    }

    #[test]
    fn test_resolution_serde() {
        let json = serde_json::to_string(&Resolution::P720).unwrap();
        assert_eq!(json, "\"720p\"");

        let parsed: Resolution =
            serde_json::from_str(r#"{"custom":{"width":960,"height":540}}"#).unwrap();
        assert_eq!(parsed.bounds(), (960, 540));
        assert_eq!(parsed.to_string(), "960x540");
        assert_eq!(Resolution::P1080.to_string(), "1080p");
    }

    #[test]
    fn test_profile_deserialize_minimal() {
        let profile: TranscodeProfile = serde_json::from_str(
            r#"{"codec":"h264","container":"mp4","resolution":"720p","video_bitrate_kbps":2000}"#,
        )
        .unwrap();
        assert_eq!(profile.codec, VideoCodec::H264);
        assert_eq!(profile.rate_control(), RateControl::Bitrate(2000));
        assert!(profile.audio_bitrate_kbps.is_none());
    }

    #[test]
    fn test_rate_control_defaults() {
        let profile = TranscodeProfile::default();
        assert_eq!(profile.rate_control(), RateControl::Crf(22));

        let profile = TranscodeProfile::new(VideoCodec::Mpeg4, Container::Mp4, Resolution::P480);
        assert_eq!(profile.rate_control(), RateControl::Bitrate(2500));

        let profile = TranscodeProfile::default().with_crf(18);
        assert_eq!(profile.rate_control(), RateControl::Crf(18));
    }

    #[test]
    fn test_mobile_preset_falls_back_to_mpeg4() {
        let profile = TranscodeProfile::mobile(|_| true).unwrap();
        assert_eq!(profile, TranscodeProfile::default());

        let profile = TranscodeProfile::mobile(|c| c != VideoCodec::H264).unwrap();
        assert_eq!(profile.codec, VideoCodec::Mpeg4);
        assert_eq!(profile.rate_control(), RateControl::Bitrate(2500));

        let profile = TranscodeProfile::mobile(|c| c == VideoCodec::H265).unwrap();
        assert_eq!(profile.codec, VideoCodec::H265);

        assert!(TranscodeProfile::mobile(|c| c == VideoCodec::Vp9).is_none());
    }
}
