//! Trait definitions for the transcoder module.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::TranscodeError;
use super::types::{MediaInfo, StageProgress, TranscodeJob, TranscodeOutput};
use crate::profile::VideoCodec;

/// Boundary to the codec library.
///
/// Implementations must honour `cancel` between processed chunks and return
/// [`TranscodeError::Cancelled`] when they stop early. They never move the
/// output into its final place; that is the engine's job.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Whether an encoder for `codec` is available.
    ///
    /// Called on the submission path, so it must not do I/O.
    fn supports_codec(&self, _codec: VideoCodec) -> bool {
        true
    }

    /// Probes a media file to get its information.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError>;

    /// Runs one transcode attempt, writing to `job.output_path`.
    ///
    /// Progress is sent with `try_send`; a full or closed channel never
    /// stalls the encode.
    async fn transcode(
        &self,
        job: TranscodeJob,
        progress_tx: mpsc::Sender<StageProgress>,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutput, TranscodeError>;

    /// Validates that the transcoder is properly configured and ready.
    async fn validate(&self) -> Result<(), TranscodeError>;
}
