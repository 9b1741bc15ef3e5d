//! Types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::profile::{TranscodeProfile, VideoCodec};

/// Pipeline stage a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Opening the source and reading stream headers.
    Demux,
    /// Decoding before the first frame reaches the encoder.
    Decode,
    /// Frames are being encoded.
    Encode,
    /// Writing the container trailer and moving the artifact into place.
    Mux,
}

/// Progress reported by a transcoder for the attempt it is running.
#[derive(Debug, Clone, PartialEq)]
pub struct StageProgress {
    /// Current stage.
    pub stage: Stage,
    /// Progress percentage (0.0 - 100.0).
    pub percent: f32,
    /// Frames written so far.
    pub frame: Option<u64>,
    /// Encoding speed relative to real time.
    pub speed: Option<f32>,
}

impl StageProgress {
    pub fn new(stage: Stage, percent: f32) -> Self {
        Self {
            stage,
            percent,
            frame: None,
            speed: None,
        }
    }
}

/// Information about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// File path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Container format (e.g., "mov", "matroska").
    pub format: String,
    /// Overall bitrate in kbps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
    /// Number of streams in the container.
    pub stream_count: u32,
    /// Video codec (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    /// Coded video width (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_width: Option<u32>,
    /// Coded video height (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_height: Option<u32>,
    /// Video frame rate (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_fps: Option<f32>,
    /// Display rotation in degrees, from the display matrix or rotate tag.
    #[serde(default)]
    pub rotation: i32,
    /// Audio codec (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Audio channels (if present).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_channels: Option<u8>,
}

impl MediaInfo {
    /// Whether the file carries a video stream.
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }
}

/// A single transcode attempt handed to a [`Transcoder`](super::Transcoder).
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Job ID, used for logging.
    pub job_id: String,
    /// Input file path.
    pub input_path: PathBuf,
    /// Where the encoder writes. The engine moves this into place on success.
    pub output_path: PathBuf,
    /// Target profile (already validated).
    pub profile: TranscodeProfile,
    /// Probed source information.
    pub source: Option<MediaInfo>,
}

/// What a successful attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    /// Output file size in bytes.
    pub size_bytes: u64,
    /// Output duration in seconds, if known.
    pub duration_secs: Option<f64>,
    /// Codec written.
    pub codec: VideoCodec,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
}
