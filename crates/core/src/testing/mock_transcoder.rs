//! Mock transcoder for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::profile::{fit_within, VideoCodec};
use crate::transcoder::{
    MediaInfo, Stage, StageProgress, TranscodeError, TranscodeJob, TranscodeOutput, Transcoder,
};

/// Bytes written to the output per chunk.
const CHUNK_BYTES: usize = 4096;

/// A recorded transcode attempt for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedTranscode {
    /// The job that was submitted.
    pub job: TranscodeJob,
    /// Whether the attempt succeeded.
    pub success: bool,
}

/// Mock implementation of the Transcoder trait.
///
/// Provides controllable behavior for testing:
/// - Track probe and transcode calls for assertions
/// - Write real bytes to the output path, one chunk at a time
/// - Honour cancellation between chunks
/// - Inject fatal, transient and panicking failures
/// - Hold progress until released
///
/// # Example
///
/// ```rust,ignore
/// use vidpress_core::testing::MockTranscoder;
///
/// let transcoder = MockTranscoder::new();
/// transcoder.hold();
///
/// let engine = TranscodeEngine::new(EngineConfig::default(), transcoder.clone());
/// let handle = engine.submit(request).await?;
///
/// // Job is parked after its first chunk until released
/// transcoder.release();
/// let result = engine.wait(handle.id()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct MockTranscoder {
    /// Recorded probe paths.
    probes: Arc<RwLock<Vec<PathBuf>>>,
    /// Recorded transcode attempts.
    transcodes: Arc<RwLock<Vec<RecordedTranscode>>>,
    /// Pre-configured probe results by path.
    probe_results: Arc<RwLock<HashMap<PathBuf, MediaInfo>>>,
    /// If set, the next transcode will fail with this error.
    next_error: Arc<RwLock<Option<TranscodeError>>>,
    /// Remaining probes that fail with a transient error.
    transient_failures: Arc<RwLock<u32>>,
    /// Whether the next transcode panics.
    panic_next: Arc<RwLock<bool>>,
    /// Codecs reported as unavailable.
    unsupported: HashSet<VideoCodec>,
    /// Number of chunks per transcode.
    chunks: u32,
    /// Delay after each chunk.
    chunk_delay: Duration,
    /// Progress gate.
    held: Arc<AtomicBool>,
    release: Arc<Notify>,
    /// Concurrency tracking.
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active count even when the attempt unwinds.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTranscoder {
    /// Create a new mock transcoder.
    pub fn new() -> Self {
        Self {
            probes: Arc::new(RwLock::new(Vec::new())),
            transcodes: Arc::new(RwLock::new(Vec::new())),
            probe_results: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            transient_failures: Arc::new(RwLock::new(0)),
            panic_next: Arc::new(RwLock::new(false)),
            unsupported: HashSet::new(),
            chunks: 4,
            chunk_delay: Duration::ZERO,
            held: Arc::new(AtomicBool::new(false)),
            release: Arc::new(Notify::new()),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reports `codec` as unavailable.
    pub fn without_codec(mut self, codec: VideoCodec) -> Self {
        self.unsupported.insert(codec);
        self
    }

    /// Sets the number of chunks per transcode.
    pub fn with_chunks(mut self, chunks: u32) -> Self {
        self.chunks = chunks.max(1);
        self
    }

    /// Sets the delay after each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Get all recorded transcode attempts.
    pub async fn recorded_transcodes(&self) -> Vec<RecordedTranscode> {
        self.transcodes.read().await.clone()
    }

    /// Get the number of transcode attempts.
    pub async fn transcode_count(&self) -> usize {
        self.transcodes.read().await.len()
    }

    /// Get the number of probes performed.
    pub async fn probe_count(&self) -> usize {
        self.probes.read().await.len()
    }

    /// Set a probe result for a specific path.
    pub async fn set_probe_result(&self, path: impl AsRef<Path>, info: MediaInfo) {
        self.probe_results
            .write()
            .await
            .insert(path.as_ref().to_path_buf(), info);
    }

    /// Configure the next transcode to fail with the given error.
    pub async fn set_next_error(&self, error: TranscodeError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make the next `count` probes fail with a transient I/O error.
    pub async fn fail_transiently(&self, count: u32) {
        *self.transient_failures.write().await = count;
    }

    /// Make the next transcode panic after writing its first chunk.
    pub async fn panic_next(&self) {
        *self.panic_next.write().await = true;
    }

    /// Park every transcode after each chunk until [`release`](Self::release).
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let held transcodes run to completion.
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    /// Transcodes running right now.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of transcodes seen running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Create a default MediaInfo for testing: 10 s of 1080p H.264.
    pub fn default_media_info(path: &Path) -> MediaInfo {
        MediaInfo {
            path: path.to_path_buf(),
            size_bytes: 25 * 1024 * 1024,
            duration_secs: 10.0,
            format: "mov".to_string(),
            bitrate_kbps: Some(20_000),
            stream_count: 2,
            video_codec: Some("h264".to_string()),
            video_width: Some(1920),
            video_height: Some(1080),
            video_fps: Some(30.0),
            rotation: 0,
            audio_codec: Some("aac".to_string()),
            audio_channels: Some(2),
        }
    }

    async fn wait_for_release(&self, cancel: &CancellationToken) -> Result<(), TranscodeError> {
        loop {
            let released = self.release.notified();
            if !self.held.load(Ordering::SeqCst) {
                return Ok(());
            }
            tokio::select! {
                _ = released => {}
                _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            }
        }
    }

    async fn record(&self, job: TranscodeJob, success: bool) {
        self.transcodes
            .write()
            .await
            .push(RecordedTranscode { job, success });
    }

    async fn write_chunks(
        &self,
        job: &TranscodeJob,
        progress_tx: &mpsc::Sender<StageProgress>,
        cancel: &CancellationToken,
        panic_midway: bool,
    ) -> Result<u64, TranscodeError> {
        let mut file = tokio::fs::File::create(&job.output_path)
            .await
            .map_err(|e| TranscodeError::from_io(e, &job.output_path))?;
        let _ = progress_tx.try_send(StageProgress::new(Stage::Decode, 0.0));

        let chunk = vec![0u8; CHUNK_BYTES];
        let mut written = 0u64;
        for i in 0..self.chunks {
            if cancel.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| TranscodeError::from_io(e, &job.output_path))?;
            written += CHUNK_BYTES as u64;
            if panic_midway {
                let _ = file.flush().await;
                panic!("mock transcoder panic after {} bytes", written);
            }

            let mut update =
                StageProgress::new(Stage::Encode, (i + 1) as f32 / self.chunks as f32 * 99.0);
            update.frame = Some(u64::from(i + 1) * 30);
            update.speed = Some(4.0);
            let _ = progress_tx.try_send(update);

            self.wait_for_release(cancel).await?;
            if self.chunk_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        file.flush()
            .await
            .map_err(|e| TranscodeError::from_io(e, &job.output_path))?;
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        let _ = progress_tx.try_send(StageProgress::new(Stage::Mux, 100.0));
        Ok(written)
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    fn supports_codec(&self, codec: VideoCodec) -> bool {
        !self.unsupported.contains(&codec)
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        self.probes.write().await.push(path.to_path_buf());

        {
            let mut remaining = self.transient_failures.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TranscodeError::transient(format!(
                    "{}: Input/output error",
                    path.display()
                )));
            }
        }

        if let Some(info) = self.probe_results.read().await.get(path) {
            return Ok(info.clone());
        }
        Ok(Self::default_media_info(path))
    }

    async fn transcode(
        &self,
        job: TranscodeJob,
        progress_tx: mpsc::Sender<StageProgress>,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let panic_midway = std::mem::take(&mut *self.panic_next.write().await);
        if panic_midway {
            self.record(job.clone(), false).await;
        }

        if let Some(err) = self.next_error.write().await.take() {
            self.record(job, false).await;
            return Err(err);
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let guard = ActiveGuard(&self.active);

        let result = self
            .write_chunks(&job, &progress_tx, &cancel, panic_midway)
            .await;
        drop(guard);
        self.record(job.clone(), result.is_ok()).await;

        let size_bytes = result?;
        let source = job
            .source
            .as_ref()
            .and_then(|s| Some((s.video_width?, s.video_height?)));
        let (width, height) = fit_within(source, job.profile.resolution.bounds());

        Ok(TranscodeOutput {
            size_bytes,
            duration_secs: job.source.as_ref().map(|s| s.duration_secs),
            codec: job.profile.codec,
            width,
            height,
        })
    }

    async fn validate(&self) -> Result<(), TranscodeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TranscodeProfile;
    use tempfile::TempDir;

    fn job(dir: &TempDir) -> TranscodeJob {
        TranscodeJob {
            job_id: "mock-1".to_string(),
            input_path: dir.path().join("clip.mp4"),
            output_path: dir.path().join("out.part"),
            profile: TranscodeProfile::default(),
            source: Some(MockTranscoder::default_media_info(Path::new("clip.mp4"))),
        }
    }

    #[tokio::test]
    async fn test_transcode_writes_output() {
        let dir = TempDir::new().unwrap();
        let transcoder = MockTranscoder::new().with_chunks(3);
        let (tx, mut rx) = mpsc::channel(16);

        let output = transcoder
            .transcode(job(&dir), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.size_bytes, 3 * CHUNK_BYTES as u64);
        assert_eq!((output.width, output.height), (1280, 720));
        assert_eq!(
            std::fs::metadata(dir.path().join("out.part")).unwrap().len(),
            output.size_bytes
        );

        let mut stages = Vec::new();
        while let Some(update) = rx.recv().await {
            stages.push(update.stage);
        }
        assert_eq!(stages.first(), Some(&Stage::Decode));
        assert_eq!(stages.last(), Some(&Stage::Mux));
        assert_eq!(transcoder.transcode_count().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_between_chunks() {
        let dir = TempDir::new().unwrap();
        let transcoder = MockTranscoder::new();
        transcoder.hold();
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(16);

        let task = {
            let transcoder = transcoder.clone();
            let job = job(&dir);
            let cancel = cancel.clone();
            tokio::spawn(async move { transcoder.transcode(job, tx, cancel).await })
        };

        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, TranscodeError::Cancelled));
        assert_eq!(transcoder.active(), 0);
    }

    #[tokio::test]
    async fn test_error_injection() {
        let dir = TempDir::new().unwrap();
        let transcoder = MockTranscoder::new();
        transcoder
            .set_next_error(TranscodeError::codec("test error", None))
            .await;
        let (tx, _rx) = mpsc::channel(16);

        let result = transcoder
            .transcode(job(&dir), tx.clone(), CancellationToken::new())
            .await;
        assert!(result.is_err());

        // Error is consumed
        let result = transcoder
            .transcode(job(&dir), tx, CancellationToken::new())
            .await;
        assert!(result.is_ok());

        let recorded = transcoder.recorded_transcodes().await;
        assert_eq!(recorded.len(), 2);
        assert!(!recorded[0].success);
        assert!(recorded[1].success);
    }

    #[tokio::test]
    async fn test_transient_probe_failures() {
        let transcoder = MockTranscoder::new();
        transcoder.fail_transiently(1).await;

        let err = transcoder.probe(Path::new("clip.mp4")).await.unwrap_err();
        assert!(err.is_retryable());
        let info = transcoder.probe(Path::new("clip.mp4")).await.unwrap();
        assert_eq!(info.video_width, Some(1920));
        assert_eq!(transcoder.probe_count().await, 2);
    }

    #[test]
    fn test_unsupported_codec() {
        let transcoder = MockTranscoder::new().without_codec(VideoCodec::Av1);
        assert!(!transcoder.supports_codec(VideoCodec::Av1));
        assert!(transcoder.supports_codec(VideoCodec::H264));
    }
}
