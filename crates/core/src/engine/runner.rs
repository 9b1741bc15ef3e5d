//! Transcode engine: bounded worker pool and job lifecycle.

use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::error::EngineError;
use super::job::{JobEntry, JobEventStream};
use super::retry::with_retry;
use super::types::{
    JobEvent, JobHandle, JobId, JobResult, JobSnapshot, JobState, OutputArtifact, PoolStatus,
    TranscodeRequest,
};
use crate::profile::validate_profile;
use crate::transcoder::{
    ErrorKind, MediaInfo, Stage, StageProgress, TranscodeError, TranscodeJob, Transcoder,
};

/// Tracks statistics for the worker pool.
#[derive(Default)]
struct PoolStats {
    active: AtomicU64,
    queued: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
    total_cancelled: AtomicU64,
}

impl PoolStats {
    fn record(&self, result: &JobResult) {
        let counter = match result.state() {
            JobState::Completed => &self.total_completed,
            JobState::Cancelled => &self.total_cancelled,
            _ => &self.total_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Holds a pool gauge up for as long as it lives, including during unwinding.
struct GaugeGuard<'a>(&'a AtomicU64);

impl<'a> GaugeGuard<'a> {
    fn new(gauge: &'a AtomicU64) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Runs transcode jobs on a bounded set of worker slots.
///
/// Jobs beyond `max_concurrent_jobs` wait in submission order. All job state
/// is owned here; callers hold [`JobHandle`]s and read snapshots.
pub struct TranscodeEngine<T: Transcoder + ?Sized> {
    config: EngineConfig,
    transcoder: Arc<T>,
    slots: Arc<Semaphore>,
    stats: Arc<PoolStats>,
    jobs: Arc<RwLock<HashMap<JobId, Arc<JobEntry>>>>,
    next_seq: AtomicU64,
    accepting: AtomicBool,
}

impl<T: Transcoder + 'static> TranscodeEngine<T> {
    /// Creates a new engine owning the given transcoder.
    pub fn new(config: EngineConfig, transcoder: T) -> Self {
        Self::with_transcoder(config, Arc::new(transcoder))
    }
}

impl<T: Transcoder + ?Sized + 'static> TranscodeEngine<T> {
    /// Creates a new engine over a shared transcoder.
    pub fn with_transcoder(config: EngineConfig, transcoder: Arc<T>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            config,
            transcoder,
            slots,
            stats: Arc::new(PoolStats::default()),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transcoder(&self) -> &Arc<T> {
        &self.transcoder
    }

    /// Validates and enqueues a request. Returns without waiting for a slot.
    ///
    /// Rejections happen before any filesystem or codec access.
    pub async fn submit(&self, request: TranscodeRequest) -> Result<JobHandle, EngineError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        validate_profile(&request.profile)?;
        let codec = request.profile.codec;
        if !self.transcoder.supports_codec(codec) {
            return Err(EngineError::invalid_profile(format!(
                "no {} encoder available in {}",
                codec,
                self.transcoder.name()
            )));
        }
        validate_request(&request, &self.config.allowed_roots)?;

        let id = JobId::new();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(JobEntry::new(
            id,
            seq,
            request,
            self.config.event_buffer,
            self.config.event_history,
        ));

        {
            let mut jobs = self.jobs.write().await;
            self.prune(&mut jobs).await;
            jobs.insert(id, Arc::clone(&entry));
        }

        info!(
            job_id = %id,
            source = %entry.request.source.display(),
            destination = %entry.request.destination.display(),
            codec = %codec,
            container = %entry.request.profile.container,
            resolution = %entry.request.profile.resolution,
            "Job submitted"
        );

        let handle = JobHandle::new(id, entry.cancel.clone());
        self.spawn_worker(entry);
        Ok(handle)
    }

    /// Requests cancellation.
    ///
    /// Returns `Ok(false)` when the job is already terminal; the recorded
    /// result is left untouched.
    pub async fn cancel(&self, id: JobId) -> Result<bool, EngineError> {
        let entry = self.entry(id).await?;
        if entry.state().await.is_terminal() {
            debug!(job_id = %id, "Cancel ignored, job already finished");
            return Ok(false);
        }
        entry.cancel.cancel();
        info!(job_id = %id, "Cancellation requested");
        Ok(true)
    }

    /// Subscribes to a job's events: everything emitted so far, then live
    /// events, ending with the terminal outcome.
    pub async fn subscribe(&self, id: JobId) -> Result<JobEventStream, EngineError> {
        Ok(self.entry(id).await?.subscribe().await)
    }

    /// Returns a snapshot of one job.
    pub async fn status(&self, id: JobId) -> Result<JobSnapshot, EngineError> {
        Ok(self.entry(id).await?.snapshot().await)
    }

    /// Returns snapshots of all retained jobs in submission order.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let mut entries: Vec<Arc<JobEntry>> = self.jobs.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.snapshot().await);
        }
        snapshots
    }

    /// Waits for the terminal result of a job.
    pub async fn wait(&self, id: JobId) -> Result<JobResult, EngineError> {
        let entry = self.entry(id).await?;
        let mut events = entry.subscribe().await;
        while let Some(event) = events.next().await {
            if let JobEvent::Finished { result, .. } = event {
                return Ok(result);
            }
        }
        entry.result().await.ok_or(EngineError::JobNotFound(id))
    }

    /// Reads metadata of a media file.
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, EngineError> {
        check_confined(path, &self.config.allowed_roots, "path")?;
        self.transcoder.probe(path).await.map_err(EngineError::Probe)
    }

    /// Returns the worker pool status.
    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            max_concurrent: self.config.max_concurrent_jobs.max(1),
            active_jobs: self.stats.active.load(Ordering::Relaxed) as usize,
            queued_jobs: self.stats.queued.load(Ordering::Relaxed) as usize,
            total_completed: self.stats.total_completed.load(Ordering::Relaxed),
            total_failed: self.stats.total_failed.load(Ordering::Relaxed),
            total_cancelled: self.stats.total_cancelled.load(Ordering::Relaxed),
            accepting: self.accepting.load(Ordering::SeqCst),
        }
    }

    /// Stops accepting jobs, cancels every unfinished job and waits until
    /// each one has reached its terminal state.
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);

        let entries: Vec<Arc<JobEntry>> = self.jobs.read().await.values().cloned().collect();
        let mut pending = Vec::new();
        for entry in entries {
            if !entry.state().await.is_terminal() {
                entry.cancel.cancel();
                pending.push(entry);
            }
        }

        info!(pending = pending.len(), "Engine shutting down");
        for entry in pending {
            let mut events = entry.subscribe().await;
            while events.next().await.is_some() {}
        }
        info!("Engine stopped");
    }

    async fn entry(&self, id: JobId) -> Result<Arc<JobEntry>, EngineError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::JobNotFound(id))
    }

    /// Drops the oldest terminal records beyond `max_retained_jobs`.
    async fn prune(&self, jobs: &mut HashMap<JobId, Arc<JobEntry>>) {
        let mut terminal = Vec::new();
        for entry in jobs.values() {
            if entry.state().await.is_terminal() {
                terminal.push((entry.seq, entry.id));
            }
        }

        let limit = self.config.max_retained_jobs;
        if terminal.len() <= limit {
            return;
        }

        terminal.sort_unstable();
        let excess = terminal.len() - limit;
        for (_, id) in terminal.into_iter().take(excess) {
            jobs.remove(&id);
        }
        debug!(pruned = excess, "Pruned finished jobs");
    }

    fn spawn_worker(&self, entry: Arc<JobEntry>) {
        let worker = Worker {
            config: self.config.clone(),
            transcoder: Arc::clone(&self.transcoder),
            slots: Arc::clone(&self.slots),
            stats: Arc::clone(&self.stats),
        };
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let job = Arc::clone(&entry);
            let run = tokio::spawn(async move { worker.run(job).await });

            let result = match run.await {
                Ok(result) => result,
                Err(e) => {
                    // Slot and gauges were released while unwinding.
                    remove_staging(&entry.staging_path).await;
                    if e.is_panic() {
                        error!(job_id = %entry.id, "Transcoder panicked");
                        JobResult::failed(ErrorKind::CodecError, "transcoder panicked")
                    } else {
                        JobResult::Cancelled
                    }
                }
            };

            if entry.finish(result.clone()).await {
                stats.record(&result);
                match &result {
                    JobResult::Completed { artifact } => info!(
                        job_id = %entry.id,
                        path = %artifact.path.display(),
                        size_bytes = artifact.size_bytes,
                        "Job completed"
                    ),
                    JobResult::Failed { kind, message } => warn!(
                        job_id = %entry.id,
                        kind = %kind,
                        error = %message,
                        "Job failed"
                    ),
                    JobResult::Cancelled => info!(job_id = %entry.id, "Job cancelled"),
                }
            }
        });
    }
}

/// Checks path-level request invariants. Pure.
fn validate_request(request: &TranscodeRequest, roots: &[PathBuf]) -> Result<(), EngineError> {
    if request.source.as_os_str().is_empty() {
        return Err(EngineError::invalid_request("source path is empty"));
    }
    if request.destination.file_name().is_none() {
        return Err(EngineError::invalid_request(
            "destination must name a file",
        ));
    }
    if request.source == request.destination {
        return Err(EngineError::invalid_request(
            "destination must differ from source",
        ));
    }
    check_confined(&request.source, roots, "source")?;
    check_confined(&request.destination, roots, "destination")?;
    Ok(())
}

/// Rejects paths outside every allowed root. Lexical only, so `..` is
/// refused outright.
fn check_confined(path: &Path, roots: &[PathBuf], what: &str) -> Result<(), EngineError> {
    if roots.is_empty() {
        return Ok(());
    }
    let escapes = !path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
    if escapes || !roots.iter().any(|root| path.starts_with(root)) {
        return Err(EngineError::invalid_request(format!(
            "{} {} is outside the allowed directories",
            what,
            path.display()
        )));
    }
    Ok(())
}

async fn remove_staging(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed staging file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
    }
}

fn checkpoint(entry: &JobEntry) -> Result<(), TranscodeError> {
    if entry.cancel.is_cancelled() {
        Err(TranscodeError::Cancelled)
    } else {
        Ok(())
    }
}

/// State one job worker needs, detached from the engine.
struct Worker<T: ?Sized> {
    config: EngineConfig,
    transcoder: Arc<T>,
    slots: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl<T: Transcoder + ?Sized + 'static> Worker<T> {
    async fn run(self, entry: Arc<JobEntry>) -> JobResult {
        let queued = GaugeGuard::new(&self.stats.queued);
        let permit = tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => {
                debug!(job_id = %entry.id, "Cancelled while queued");
                return JobResult::Cancelled;
            }
            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return JobResult::Cancelled,
            },
        };
        drop(queued);
        let _active = GaugeGuard::new(&self.stats.active);
        let _permit = permit;

        if !entry.mark_running().await {
            return JobResult::Cancelled;
        }
        info!(job_id = %entry.id, "Job started");

        match self.execute(&entry).await {
            Ok(artifact) => JobResult::Completed { artifact },
            Err(e) => {
                remove_staging(&entry.staging_path).await;
                match e {
                    TranscodeError::Cancelled => JobResult::Cancelled,
                    other => JobResult::failed(other.kind(), other.diagnostic()),
                }
            }
        }
    }

    async fn execute(&self, entry: &Arc<JobEntry>) -> Result<OutputArtifact, TranscodeError> {
        let request = &entry.request;
        let cancel = &entry.cancel;
        let transcoder = &self.transcoder;

        entry.publish(StageProgress::new(Stage::Demux, 0.0)).await;
        checkpoint(entry)?;
        self.prepare_destination(&request.destination).await?;

        let source = with_retry(&self.config.retry, cancel, entry.id, "probe", |_| {
            transcoder.probe(&request.source)
        })
        .await?;
        if !source.has_video() {
            return Err(TranscodeError::codec("no video stream found", None));
        }
        debug!(
            job_id = %entry.id,
            format = %source.format,
            duration_secs = source.duration_secs,
            width = ?source.video_width,
            height = ?source.video_height,
            "Source probed"
        );
        checkpoint(entry)?;

        let (progress_tx, mut progress_rx) =
            mpsc::channel::<StageProgress>(self.config.event_buffer.max(1));
        let forwarder = {
            let entry = Arc::clone(entry);
            tokio::spawn(async move {
                while let Some(update) = progress_rx.recv().await {
                    entry.publish(update).await;
                }
            })
        };

        let outcome = with_retry(&self.config.retry, cancel, entry.id, "transcode", |_| {
            let job = TranscodeJob {
                job_id: entry.id.to_string(),
                input_path: request.source.clone(),
                output_path: entry.staging_path.clone(),
                profile: request.profile.clone(),
                source: Some(source.clone()),
            };
            let tx = progress_tx.clone();
            let cancel = cancel.clone();
            async move {
                let attempt = entry.begin_attempt().await;
                debug!(job_id = %entry.id, attempt, "Transcode attempt");
                if cancel.is_cancelled() {
                    return Err(TranscodeError::Cancelled);
                }
                let result = transcoder.transcode(job, tx, cancel).await;
                if result.is_err() {
                    remove_staging(&entry.staging_path).await;
                }
                result
            }
        })
        .await;

        // Every update is published before the terminal event.
        drop(progress_tx);
        let _ = forwarder.await;
        let output = outcome?;

        checkpoint(entry)?;
        self.commit(&entry.staging_path, &request.destination).await?;
        entry.publish(StageProgress::new(Stage::Mux, 100.0)).await;

        Ok(OutputArtifact {
            path: request.destination.clone(),
            size_bytes: output.size_bytes,
            duration_secs: output.duration_secs,
            codec: output.codec,
            container: request.profile.container,
            width: output.width,
            height: output.height,
        })
    }

    async fn prepare_destination(&self, destination: &Path) -> Result<(), TranscodeError> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TranscodeError::resource(format!("creating {}: {}", parent.display(), e))
            })?;
        }
        if !self.config.overwrite_existing && tokio::fs::try_exists(destination).await.unwrap_or(false)
        {
            return Err(TranscodeError::resource(format!(
                "destination {} already exists",
                destination.display()
            )));
        }
        Ok(())
    }

    /// Moves the staged output into place.
    async fn commit(&self, staging: &Path, destination: &Path) -> Result<(), TranscodeError> {
        if !self.config.overwrite_existing && tokio::fs::try_exists(destination).await.unwrap_or(false)
        {
            return Err(TranscodeError::resource(format!(
                "destination {} appeared during transcode",
                destination.display()
            )));
        }
        tokio::fs::rename(staging, destination).await.map_err(|e| {
            TranscodeError::resource(format!(
                "moving output to {}: {}",
                destination.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RetryConfig;
    use crate::profile::{Container, Resolution, TranscodeProfile, VideoCodec};
    use crate::testing::MockTranscoder;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config() -> EngineConfig {
        EngineConfig::default().with_retry(RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        })
    }

    fn request(dir: &TempDir, name: &str) -> TranscodeRequest {
        TranscodeRequest::new(
            dir.path().join("clip.mp4"),
            TranscodeProfile::default().with_bitrate_kbps(2000),
            dir.path().join("out").join(name),
        )
    }

    fn staging_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "part"))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_invalid_profile_rejected_without_io() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        let engine = TranscodeEngine::new(config(), mock.clone());

        let mut req = request(&dir, "clip.webm");
        req.profile = TranscodeProfile::new(VideoCodec::H264, Container::Webm, Resolution::P720);

        let err = engine.submit(req).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidProfile { .. }));
        assert_eq!(mock.probe_count().await, 0);
        assert_eq!(mock.transcode_count().await, 0);
        assert!(!dir.path().join("out").exists());
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_codec_rejected() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new().without_codec(VideoCodec::H265);
        let engine = TranscodeEngine::new(config(), mock.clone());

        let mut req = request(&dir, "clip.mp4");
        req.profile = TranscodeProfile::new(VideoCodec::H265, Container::Mp4, Resolution::P720);

        let err = engine.submit(req).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidProfile { .. }));
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = TranscodeEngine::new(config(), MockTranscoder::new());

        let mut req = request(&dir, "clip.mp4");
        req.destination = req.source.clone();
        let err = engine.submit(req).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_paths_outside_allowed_roots_rejected() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        let engine = TranscodeEngine::new(
            config().with_allowed_roots(vec![dir.path().to_path_buf()]),
            mock.clone(),
        );

        let mut req = request(&dir, "clip.mp4");
        req.destination = PathBuf::from("/etc/cron.d/clip.mp4");
        assert!(matches!(
            engine.submit(req).await,
            Err(EngineError::InvalidRequest { .. })
        ));

        let mut req = request(&dir, "clip.mp4");
        req.source = dir.path().join("..").join("secret.mp4");
        assert!(matches!(
            engine.submit(req).await,
            Err(EngineError::InvalidRequest { .. })
        ));

        assert!(matches!(
            engine.probe(Path::new("/etc/passwd")).await,
            Err(EngineError::InvalidRequest { .. })
        ));
        assert_eq!(mock.probe_count().await, 0);

        let handle = engine.submit(request(&dir, "clip.mp4")).await.unwrap();
        assert!(matches!(
            engine.wait(handle.id()).await.unwrap(),
            JobResult::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_completes_and_places_artifact() {
        let dir = TempDir::new().unwrap();
        let engine = TranscodeEngine::new(config(), MockTranscoder::new());

        let handle = engine.submit(request(&dir, "clip_720p.mp4")).await.unwrap();
        let result = engine.wait(handle.id()).await.unwrap();

        let artifact = result.artifact().expect("completed");
        assert_eq!(artifact.path, dir.path().join("out").join("clip_720p.mp4"));
        assert!(artifact.path.exists());
        assert_eq!(artifact.codec, VideoCodec::H264);
        assert_eq!(artifact.container, Container::Mp4);
        assert_eq!((artifact.width, artifact.height), (1280, 720));
        assert!(staging_files(&dir.path().join("out")).is_empty());

        let snapshot = engine.status(handle.id()).await.unwrap();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.progress.unwrap().percent, 100.0);
        assert_eq!(engine.pool_status().total_completed, 1);
    }

    #[tokio::test]
    async fn test_codec_error_is_fatal_and_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.set_next_error(TranscodeError::codec("Invalid data found", None))
            .await;
        let engine = TranscodeEngine::new(config(), mock.clone());

        let req = request(&dir, "clip.mp4");
        let destination = req.destination.clone();
        let handle = engine.submit(req).await.unwrap();
        let result = engine.wait(handle.id()).await.unwrap();

        assert_eq!(result.error_kind(), Some(ErrorKind::CodecError));
        assert_eq!(mock.transcode_count().await, 1);
        assert!(!destination.exists());
        assert!(staging_files(&dir.path().join("out")).is_empty());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.fail_transiently(2).await;
        let engine = TranscodeEngine::new(config(), mock.clone());

        let handle = engine.submit(request(&dir, "clip.mp4")).await.unwrap();
        let result = engine.wait(handle.id()).await.unwrap();

        assert!(matches!(result, JobResult::Completed { .. }));
        assert_eq!(mock.probe_count().await, 3);
    }

    #[tokio::test]
    async fn test_transient_errors_escalate() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.fail_transiently(10).await;
        let engine = TranscodeEngine::new(config(), mock.clone());

        let handle = engine.submit(request(&dir, "clip.mp4")).await.unwrap();
        let result = engine.wait(handle.id()).await.unwrap();

        assert_eq!(result.error_kind(), Some(ErrorKind::TransientIoError));
        assert_eq!(mock.probe_count().await, 3);
        assert_eq!(mock.transcode_count().await, 0);
    }

    #[tokio::test]
    async fn test_existing_destination_is_resource_error() {
        let dir = TempDir::new().unwrap();
        let engine = TranscodeEngine::new(config(), MockTranscoder::new());

        let req = request(&dir, "clip.mp4");
        std::fs::create_dir_all(req.destination.parent().unwrap()).unwrap();
        std::fs::write(&req.destination, b"keep me").unwrap();
        let destination = req.destination.clone();

        let handle = engine.submit(req).await.unwrap();
        let result = engine.wait(handle.id()).await.unwrap();

        assert_eq!(result.error_kind(), Some(ErrorKind::ResourceError));
        assert_eq!(std::fs::read(&destination).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.hold();
        let engine = TranscodeEngine::new(config(), mock.clone());

        let req = request(&dir, "clip.mp4");
        let destination = req.destination.clone();
        let handle = engine.submit(req).await.unwrap();

        let mut events = engine.subscribe(handle.id()).await.unwrap();
        while let Some(event) = events.next().await {
            if matches!(&event, JobEvent::Progress(p) if p.stage == Stage::Encode) {
                break;
            }
        }
        assert_eq!(engine.status(handle.id()).await.unwrap().state, JobState::Running);

        assert!(engine.cancel(handle.id()).await.unwrap());
        assert!(engine.cancel(handle.id()).await.is_ok());
        let result = engine.wait(handle.id()).await.unwrap();
        assert_eq!(result, JobResult::Cancelled);
        assert!(!destination.exists());
        assert!(staging_files(&dir.path().join("out")).is_empty());
        assert_eq!(engine.pool_status().active_jobs, 0);
        assert_eq!(engine.pool_status().total_cancelled, 1);

        // The stream ends with the terminal event and nothing follows it.
        let mut rest = Vec::new();
        while let Some(event) = events.next().await {
            rest.push(event);
        }
        assert!(rest.last().unwrap().is_terminal());
        assert_eq!(rest.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.hold();
        let engine = TranscodeEngine::new(config().with_max_concurrent(1), mock.clone());

        let first = engine.submit(request(&dir, "a.mp4")).await.unwrap();
        let second = engine.submit(request(&dir, "b.mp4")).await.unwrap();
        assert_eq!(engine.status(second.id()).await.unwrap().state, JobState::Queued);

        second.cancel();
        assert_eq!(engine.wait(second.id()).await.unwrap(), JobResult::Cancelled);
        assert_eq!(engine.status(second.id()).await.unwrap().attempts, 0);

        mock.release();
        let result = engine.wait(first.id()).await.unwrap();
        assert!(matches!(result, JobResult::Completed { .. }));
        assert_eq!(mock.transcode_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_fifo() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.hold();
        let engine = TranscodeEngine::new(config().with_max_concurrent(2), mock.clone());

        let mut ids = Vec::new();
        for name in ["a.mp4", "b.mp4", "c.mp4", "d.mp4"] {
            ids.push(engine.submit(request(&dir, name)).await.unwrap().id());
        }

        while mock.active() < 2 || engine.pool_status().queued_jobs < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let status = engine.pool_status();
        assert_eq!(status.active_jobs, 2);
        assert_eq!(status.queued_jobs, 2);

        mock.release();
        for id in &ids {
            assert!(matches!(
                engine.wait(*id).await.unwrap(),
                JobResult::Completed { .. }
            ));
        }
        assert_eq!(mock.max_concurrency(), 2);

        let order: Vec<PathBuf> = mock
            .recorded_transcodes()
            .await
            .iter()
            .map(|t| t.job.output_path.clone())
            .collect();
        let third = order.iter().position(|p| p.to_string_lossy().contains(".c.mp4.")).unwrap();
        let fourth = order.iter().position(|p| p.to_string_lossy().contains(".d.mp4.")).unwrap();
        assert!(third >= 2 && fourth >= 2);
        assert_eq!(engine.pool_status().total_completed, 4);
    }

    #[tokio::test]
    async fn test_transient_transcode_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.set_next_error(TranscodeError::transient("Input/output error"))
            .await;
        let engine = TranscodeEngine::new(config(), mock.clone());

        let handle = engine.submit(request(&dir, "clip.mp4")).await.unwrap();
        let result = engine.wait(handle.id()).await.unwrap();

        assert!(matches!(result, JobResult::Completed { .. }));
        assert_eq!(mock.transcode_count().await, 2);
        assert_eq!(engine.status(handle.id()).await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let engine = TranscodeEngine::new(config(), MockTranscoder::new().with_chunks(8));

        let handle = engine.submit(request(&dir, "clip.mp4")).await.unwrap();
        let events: Vec<JobEvent> = engine.subscribe(handle.id()).await.unwrap().collect().await;

        let percents: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Progress(p) => Some(p.percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_terminal_is_noop() {
        let dir = TempDir::new().unwrap();
        let engine = TranscodeEngine::new(config(), MockTranscoder::new());

        let handle = engine.submit(request(&dir, "clip.mp4")).await.unwrap();
        let result = engine.wait(handle.id()).await.unwrap();

        assert!(!engine.cancel(handle.id()).await.unwrap());
        handle.cancel();
        let snapshot = engine.status(handle.id()).await.unwrap();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.result, Some(result));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let engine = TranscodeEngine::new(config(), MockTranscoder::new());
        let id = JobId::new();
        assert!(matches!(
            engine.cancel(id).await,
            Err(EngineError::JobNotFound(_))
        ));
        assert!(matches!(
            engine.status(id).await,
            Err(EngineError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_panicking_transcoder_releases_slot() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.panic_next().await;
        let engine = TranscodeEngine::new(config().with_max_concurrent(1), mock.clone());

        let first = engine.submit(request(&dir, "a.mp4")).await.unwrap();
        let second = engine.submit(request(&dir, "b.mp4")).await.unwrap();

        let result = engine.wait(first.id()).await.unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::CodecError));
        assert!(!dir.path().join("out").join("a.mp4").exists());
        assert!(staging_files(&dir.path().join("out")).is_empty());

        let result = engine.wait(second.id()).await.unwrap();
        assert!(matches!(result, JobResult::Completed { .. }));
        assert_eq!(engine.pool_status().active_jobs, 0);
    }

    #[tokio::test]
    async fn test_retention_prunes_oldest_finished() {
        let dir = TempDir::new().unwrap();
        let engine = TranscodeEngine::new(config().with_max_retained(1), MockTranscoder::new());

        let first = engine.submit(request(&dir, "a.mp4")).await.unwrap();
        engine.wait(first.id()).await.unwrap();
        let second = engine.submit(request(&dir, "b.mp4")).await.unwrap();
        engine.wait(second.id()).await.unwrap();
        let third = engine.submit(request(&dir, "c.mp4")).await.unwrap();
        engine.wait(third.id()).await.unwrap();

        assert!(engine.status(first.id()).await.is_err());
        let ids: Vec<JobId> = engine.list().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id(), third.id()]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_rejects() {
        let dir = TempDir::new().unwrap();
        let mock = MockTranscoder::new();
        mock.hold();
        let engine = TranscodeEngine::new(config().with_max_concurrent(1), mock);

        let running = engine.submit(request(&dir, "a.mp4")).await.unwrap();
        let queued = engine.submit(request(&dir, "b.mp4")).await.unwrap();

        engine.shutdown().await;

        for id in [running.id(), queued.id()] {
            assert_eq!(engine.status(id).await.unwrap().state, JobState::Cancelled);
        }
        assert!(matches!(
            engine.submit(request(&dir, "c.mp4")).await,
            Err(EngineError::ShuttingDown)
        ));
        assert!(!engine.pool_status().accepting);
        assert!(staging_files(&dir.path().join("out")).is_empty());
    }
}
