//! Transcode job engine.
//!
//! This module provides the `TranscodeEngine` which owns every submitted job:
//! - Submission: profile validation, then FIFO queueing behind a bounded
//!   set of worker slots
//! - Execution: source probing with bounded retry, the transcode itself,
//!   and an atomic move of the staged output into place
//! - Observation: snapshots, and per-job event streams that replay history
//!   before following live progress to the terminal result
//! - Cancellation: cooperative, idempotent, a no-op once a job is finished
//!
//! # Example
//!
//! ```ignore
//! use vidpress_core::engine::{EngineConfig, TranscodeEngine, TranscodeRequest, JobEvent};
//! use vidpress_core::profile::TranscodeProfile;
//! use vidpress_core::transcoder::{FfmpegConfig, FfmpegTranscoder};
//!
//! let transcoder = FfmpegTranscoder::detect(FfmpegConfig::default()).await;
//! let engine = TranscodeEngine::new(EngineConfig::default(), transcoder);
//!
//! let handle = engine
//!     .submit(TranscodeRequest::new(
//!         "/sdcard/DCIM/clip.mp4",
//!         TranscodeProfile::default().with_bitrate_kbps(2000),
//!         "/sdcard/Movies/clip_720p.mp4",
//!     ))
//!     .await?;
//!
//! let mut events = engine.subscribe(handle.id()).await?;
//! while let Some(event) = events.next().await {
//!     match event {
//!         JobEvent::Progress(p) => println!("{:?} {:.1}%", p.stage, p.percent),
//!         JobEvent::Finished { result, .. } => println!("{:?}", result),
//!     }
//! }
//! ```

mod config;
mod error;
mod job;
mod retry;
mod runner;
mod types;

pub use config::{EngineConfig, RetryConfig};
pub use error::EngineError;
pub use job::JobEventStream;
pub use runner::TranscodeEngine;
pub use types::{
    JobEvent, JobHandle, JobId, JobResult, JobSnapshot, JobState, OutputArtifact, PoolStatus,
    ProgressEvent, TranscodeRequest,
};
