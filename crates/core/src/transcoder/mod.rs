//! Codec boundary for the transcode engine.
//!
//! This module provides the `Transcoder` trait and an implementation that
//! drives the `ffmpeg` and `ffprobe` binaries as subprocesses.
//!
//! # Features
//!
//! - Video transcoding (H.264, H.265, VP9, AV1, MPEG-4 Part 2)
//! - Downscaling into a bounding box, never upscaling
//! - Progress reporting per `-progress` block, with pipeline stages
//! - Cooperative cancellation between progress blocks
//! - Classification of failures into retryable and fatal errors
//!
//! # Example
//!
//! ```ignore
//! use vidpress_core::transcoder::{FfmpegConfig, FfmpegTranscoder, Transcoder};
//!
//! let transcoder = FfmpegTranscoder::detect(FfmpegConfig::default()).await;
//! transcoder.validate().await?;
//!
//! let info = transcoder.probe(Path::new("/sdcard/DCIM/clip.mp4")).await?;
//! println!("{}x{} for {} seconds", info.video_width.unwrap_or(0), info.video_height.unwrap_or(0), info.duration_secs);
//! ```

mod capabilities;
mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use capabilities::EncoderCapabilities;
pub use config::FfmpegConfig;
pub use error::{ErrorKind, TranscodeError};
pub use ffmpeg::FfmpegTranscoder;
pub use traits::Transcoder;
pub use types::{MediaInfo, Stage, StageProgress, TranscodeJob, TranscodeOutput};
