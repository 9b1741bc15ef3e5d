//! Error types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classification reported to callers in a failed job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The profile was rejected before any work started.
    InvalidProfile,
    /// Source I/O kept failing after bounded retries.
    TransientIoError,
    /// Corrupt input, unsupported stream or encoder failure.
    CodecError,
    /// Disk full, permission denied, missing source, timeout.
    ResourceError,
    /// User-initiated cancellation.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidProfile => "invalid_profile",
            Self::TransientIoError => "transient_io_error",
            Self::CodecError => "codec_error",
            Self::ResourceError => "resource_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while probing or transcoding.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The requested profile is not supported.
    #[error("Invalid profile: {reason}")]
    InvalidProfile { reason: String },

    /// A retryable I/O failure while reading the source.
    #[error("Transient I/O error: {reason}")]
    TransientIo { reason: String },

    /// The codec library rejected the input or failed to encode.
    #[error("Codec error: {reason}")]
    Codec {
        reason: String,
        stderr: Option<String>,
    },

    /// Disk, permission or other resource exhaustion.
    #[error("Resource error: {reason}")]
    Resource { reason: String },

    /// Source file does not exist.
    #[error("Source not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// FFmpeg/FFprobe binary not found.
    #[error("Tool not found at path: {path}")]
    ToolNotFound { path: PathBuf },

    /// The job exceeded its time budget.
    #[error("Transcode timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Job was cancelled.
    #[error("Transcode cancelled")]
    Cancelled,
}

impl TranscodeError {
    /// Creates an invalid profile error.
    pub fn invalid_profile(reason: impl Into<String>) -> Self {
        Self::InvalidProfile {
            reason: reason.into(),
        }
    }

    /// Creates a codec error with optional stderr output.
    pub fn codec(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
            stderr,
        }
    }

    /// Creates a resource error.
    pub fn resource(reason: impl Into<String>) -> Self {
        Self::Resource {
            reason: reason.into(),
        }
    }

    /// Creates a transient I/O error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientIo {
            reason: reason.into(),
        }
    }

    /// Classifies an I/O error raised while touching `path`.
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        use std::io::ErrorKind as Io;

        match err.kind() {
            Io::NotFound => Self::SourceNotFound {
                path: path.to_path_buf(),
            },
            Io::Interrupted | Io::TimedOut | Io::WouldBlock | Io::UnexpectedEof => {
                Self::transient(format!("{}: {}", path.display(), err))
            }
            _ => Self::resource(format!("{}: {}", path.display(), err)),
        }
    }

    /// The kind reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProfile { .. } => ErrorKind::InvalidProfile,
            Self::TransientIo { .. } => ErrorKind::TransientIoError,
            Self::Codec { .. } => ErrorKind::CodecError,
            Self::Resource { .. }
            | Self::SourceNotFound { .. }
            | Self::ToolNotFound { .. }
            | Self::Timeout { .. } => ErrorKind::ResourceError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    /// Message including the stderr tail, if any.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Codec {
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => format!("{}\n{}", self, stderr.trim_end()),
            _ => self.to_string(),
        }
    }
}

/// Classifies the stderr output of a failed ffmpeg or ffprobe run.
pub(crate) fn classify_stderr(tool: &str, stderr: &str, exit_code: Option<i32>) -> TranscodeError {
    let lower = stderr.to_ascii_lowercase();
    let reason = match exit_code {
        Some(code) => format!("{} exited with code {}", tool, code),
        None => format!("{} terminated by signal", tool),
    };
    let tail = if stderr.trim().is_empty() {
        None
    } else {
        Some(stderr.to_string())
    };

    if lower.contains("no space left on device") || lower.contains("disk quota exceeded") {
        return TranscodeError::resource(format!("{}: no space left on device", reason));
    }
    if lower.contains("permission denied") || lower.contains("read-only file system") {
        return TranscodeError::resource(format!("{}: permission denied", reason));
    }
    if lower.contains("input/output error")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("connection timed out")
        || lower.contains("connection reset")
    {
        return TranscodeError::transient(reason);
    }

    TranscodeError::codec(reason, tail)
}
