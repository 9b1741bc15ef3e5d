//! Configuration for the engine module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the transcode job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum jobs running at once. Further jobs wait in FIFO order.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: usize,

    /// Whether an existing file at the destination may be replaced.
    #[serde(default)]
    pub overwrite_existing: bool,

    /// Terminal job records kept for status queries.
    #[serde(default = "default_max_retained")]
    pub max_retained_jobs: usize,

    /// Live event buffer per job. Subscribers that fall further behind
    /// catch up from the recorded history.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Events recorded per job for replay to late subscribers.
    #[serde(default = "default_event_history")]
    pub event_history: usize,

    /// Directories sources and destinations must live under. Empty allows
    /// any path.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,

    /// Retry configuration for transient source I/O errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_retries")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_retained() -> usize {
    256
}

fn default_event_buffer() -> usize {
    64
}

fn default_event_history() -> usize {
    1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    5000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_retries(),
            initial_delay_ms: default_retry_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Disables retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exp);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent(),
            overwrite_existing: false,
            max_retained_jobs: default_max_retained(),
            event_buffer: default_event_buffer(),
            event_history: default_event_history(),
            allowed_roots: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Allows replacing existing destination files.
    pub fn with_overwrite(mut self, enabled: bool) -> Self {
        self.overwrite_existing = enabled;
        self
    }

    /// Sets the number of retained terminal jobs.
    pub fn with_max_retained(mut self, max: usize) -> Self {
        self.max_retained_jobs = max;
        self
    }

    /// Confines request paths to `roots`.
    pub fn with_allowed_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.allowed_roots = roots;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
