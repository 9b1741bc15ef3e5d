//! Per-job record: state, event history and live subscribers.

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::{
    JobEvent, JobId, JobResult, JobSnapshot, JobState, ProgressEvent, TranscodeRequest,
};
use crate::transcoder::StageProgress;

/// Stream of events for one job. Finite: ends after the terminal event.
pub type JobEventStream = BoxStream<'static, JobEvent>;

/// A published event tagged with its position in the job's sequence.
type Sequenced = (u64, JobEvent);

struct JobInner {
    state: JobState,
    next_event: u64,
    history: VecDeque<Sequenced>,
    last_progress: Option<ProgressEvent>,
    result: Option<JobResult>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    attempts: u32,
}

/// Engine-owned record of a submitted job.
///
/// Every state change and every publish happens under `inner`, and
/// subscribers attach under the same lock, so a subscriber sees the recorded
/// history followed by live events without gaps or repeats. A subscriber that
/// falls behind the broadcast buffer catches up from the history.
pub(crate) struct JobEntry {
    pub id: JobId,
    /// Submission order.
    pub seq: u64,
    pub request: TranscodeRequest,
    pub submitted_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    pub staging_path: PathBuf,
    clock: Instant,
    history_limit: usize,
    events: broadcast::Sender<Sequenced>,
    inner: Arc<Mutex<JobInner>>,
}

/// Hidden file next to `destination` that receives the encoder output.
pub(crate) fn staging_path_for(destination: &Path, id: JobId) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let staged = format!(".{}.{}.part", name, id);
    match destination.parent() {
        Some(parent) => parent.join(staged),
        None => PathBuf::from(staged),
    }
}

impl JobEntry {
    pub fn new(
        id: JobId,
        seq: u64,
        request: TranscodeRequest,
        event_buffer: usize,
        history_limit: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        let staging_path = staging_path_for(&request.destination, id);
        Self {
            id,
            seq,
            request,
            submitted_at: Utc::now(),
            cancel: CancellationToken::new(),
            staging_path,
            clock: Instant::now(),
            history_limit: history_limit.max(1),
            events,
            inner: Arc::new(Mutex::new(JobInner {
                state: JobState::Queued,
                next_event: 0,
                history: VecDeque::new(),
                last_progress: None,
                result: None,
                started_at: None,
                finished_at: None,
                attempts: 0,
            })),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    fn record(&self, inner: &mut JobInner, event: JobEvent) {
        if inner.history.len() >= self.history_limit {
            // Drop the oldest progress, never the terminal event.
            if let Some(pos) = inner.history.iter().position(|(_, e)| !e.is_terminal()) {
                inner.history.remove(pos);
            }
        }
        let seq = inner.next_event;
        inner.next_event += 1;
        inner.history.push_back((seq, event.clone()));
        // No receivers is fine.
        let _ = self.events.send((seq, event));
    }

    /// Queued -> Running. False if the job already left the queue.
    pub async fn mark_running(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != JobState::Queued {
            return false;
        }
        inner.state = JobState::Running;
        inner.started_at = Some(Utc::now());
        debug!(job_id = %self.id, "Job running");
        true
    }

    /// Counts a transcode attempt.
    pub async fn begin_attempt(&self) -> u32 {
        let mut inner = self.inner.lock().await;
        inner.attempts += 1;
        inner.attempts
    }

    /// Publishes a progress update.
    ///
    /// Dropped once the job is terminal. Percent is held non-decreasing.
    pub async fn publish(&self, update: StageProgress) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminal() {
            return false;
        }

        let floor = inner.last_progress.as_ref().map(|p| p.percent).unwrap_or(0.0);
        let percent = update.percent.clamp(0.0, 100.0).max(floor);

        let event = ProgressEvent {
            job_id: self.id,
            percent,
            stage: update.stage,
            elapsed_ms: self.elapsed_ms(),
            frame: update.frame,
            speed: update.speed,
        };
        inner.last_progress = Some(event.clone());
        self.record(&mut inner, JobEvent::Progress(event));
        true
    }

    /// Records the terminal outcome. Only the first call has any effect.
    pub async fn finish(&self, result: JobResult) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminal() {
            return false;
        }

        inner.state = result.state();
        inner.finished_at = Some(Utc::now());
        inner.result = Some(result.clone());
        let event = JobEvent::Finished {
            job_id: self.id,
            elapsed_ms: self.elapsed_ms(),
            result,
        };
        self.record(&mut inner, event);
        true
    }

    pub async fn state(&self) -> JobState {
        self.inner.lock().await.state
    }

    pub async fn result(&self) -> Option<JobResult> {
        self.inner.lock().await.result.clone()
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.lock().await;
        JobSnapshot {
            id: self.id,
            state: inner.state,
            request: self.request.clone(),
            submitted_at: self.submitted_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            attempts: inner.attempts,
            progress: inner.last_progress.clone(),
            result: inner.result.clone(),
        }
    }

    /// Replays the recorded history, then follows live events.
    pub async fn subscribe(&self) -> JobEventStream {
        let inner = self.inner.lock().await;
        let replay = inner.history.clone();
        let live = if inner.state.is_terminal() {
            None
        } else {
            Some(self.events.subscribe())
        };
        drop(inner);

        struct Cursor {
            source: Arc<Mutex<JobInner>>,
            replay: VecDeque<Sequenced>,
            live: Option<broadcast::Receiver<Sequenced>>,
            last: Option<u64>,
            done: bool,
        }

        let cursor = Cursor {
            source: Arc::clone(&self.inner),
            replay,
            live,
            last: None,
            done: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            loop {
                if cursor.done {
                    return None;
                }
                if let Some((seq, event)) = cursor.replay.pop_front() {
                    cursor.last = Some(seq);
                    cursor.done = event.is_terminal();
                    return Some((event, cursor));
                }

                let received = match cursor.live.as_mut() {
                    Some(live) => live.recv().await,
                    None => return None,
                };
                match received {
                    Ok((seq, event)) => {
                        if cursor.last.is_some_and(|last| seq <= last) {
                            continue;
                        }
                        cursor.last = Some(seq);
                        cursor.done = event.is_terminal();
                        return Some((event, cursor));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Subscriber lagged, catching up from history");
                        let last = cursor.last;
                        let missed: VecDeque<Sequenced> = cursor
                            .source
                            .lock()
                            .await
                            .history
                            .iter()
                            .filter(|(seq, _)| last.map_or(true, |l| *seq > l))
                            .cloned()
                            .collect();
                        cursor.replay = missed;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
