//! Types for the engine module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::profile::{Container, TranscodeProfile, VideoCodec};
use crate::transcoder::{ErrorKind, Stage};

/// Unique identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A request to transcode one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    /// Source media file.
    pub source: PathBuf,
    /// Target profile.
    pub profile: TranscodeProfile,
    /// Where the output artifact is placed on success.
    pub destination: PathBuf,
}

impl TranscodeRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        profile: TranscodeProfile,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            profile,
            destination: destination.into(),
        }
    }
}

/// Returned by submission: the job id plus the power to cancel it.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, cancel: CancellationToken) -> Self {
        Self { id, cancel }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Requests cooperative cancellation.
    ///
    /// Idempotent. Has no effect once the job reached a terminal state.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested through any handle.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Percentage complete (0.0 - 100.0), never decreasing within a job.
    pub percent: f32,
    pub stage: Stage,
    /// Milliseconds since submission, from a monotonic clock.
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// Metadata of a produced output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub codec: VideoCodec,
    pub container: Container,
    pub width: u32,
    pub height: u32,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResult {
    Completed { artifact: OutputArtifact },
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

impl JobResult {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    /// The terminal state this result puts a job in.
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed { .. } => JobState::Completed,
            Self::Failed { .. } => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
        }
    }

    pub fn artifact(&self) -> Option<&OutputArtifact> {
        match self {
            Self::Completed { artifact } => Some(artifact),
            _ => None,
        }
    }

    /// Error kind of a failed or cancelled job.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed { kind, .. } => Some(*kind),
            Self::Cancelled => Some(ErrorKind::Cancelled),
        }
    }
}

/// An event delivered to job subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress(ProgressEvent),
    /// Always the last event of a job.
    Finished {
        job_id: JobId,
        elapsed_ms: u64,
        result: JobResult,
    },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Self::Progress(p) => p.job_id,
            Self::Finished { job_id, .. } => *job_id,
        }
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub request: TranscodeRequest,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of transcode attempts started.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

/// Status of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Maximum concurrent jobs.
    pub max_concurrent: usize,
    /// Number of running jobs.
    pub active_jobs: usize,
    /// Number of jobs waiting for a slot.
    pub queued_jobs: usize,
    /// Jobs completed since startup.
    pub total_completed: u64,
    /// Jobs failed since startup.
    pub total_failed: u64,
    /// Jobs cancelled since startup.
    pub total_cancelled: u64,
    /// Whether new submissions are accepted.
    pub accepting: bool,
}
