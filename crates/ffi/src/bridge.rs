//! Blocking, JSON-speaking facade over the engine for C callers.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use vidpress_core::{
    load_config, Config, EngineError, FfmpegTranscoder, JobId, TranscodeEngine, TranscodeProfile,
    TranscodeRequest, Transcoder,
};

/// Engine shared by every exported function.
pub type SharedEngine = Arc<TranscodeEngine<dyn Transcoder>>;

/// Outcome of a cancel call, mapped to the C return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCode {
    Requested = 1,
    NoOp = 0,
    Unknown = -1,
}

/// Owns the runtime the engine's workers run on.
pub struct Bridge {
    runtime: Runtime,
    engine: SharedEngine,
}

pub(crate) fn error_json(message: impl std::fmt::Display, kind: Option<&str>) -> Value {
    match kind {
        Some(kind) => json!({ "error": message.to_string(), "kind": kind }),
        None => json!({ "error": message.to_string() }),
    }
}

fn engine_error_json(err: &EngineError) -> Value {
    error_json(err, err.kind().map(|k| k.as_str()))
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| error_json(e, None))
}

impl Bridge {
    pub fn new(runtime: Runtime, engine: SharedEngine) -> Self {
        Self { runtime, engine }
    }

    /// Builds the process-wide bridge over ffmpeg.
    ///
    /// Settings come from the file named by `VIDPRESS_CONFIG` when it loads,
    /// defaults otherwise.
    pub fn from_env() -> Result<Self, String> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("vidpress-ffi")
            .build()
            .map_err(|e| format!("Failed to start runtime: {}", e))?;

        let config = match std::env::var("VIDPRESS_CONFIG") {
            Ok(path) => load_config(Path::new(&path)).unwrap_or_else(|e| {
                warn!("Ignoring config {}: {}", path, e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        let transcoder = runtime.block_on(FfmpegTranscoder::detect(config.ffmpeg.clone()));
        info!(
            codecs = ?transcoder.capabilities().available_codecs(),
            "Native engine ready"
        );
        let transcoder: Arc<dyn Transcoder> = Arc::new(transcoder);
        let engine = Arc::new(TranscodeEngine::with_transcoder(config.engine, transcoder));

        Ok(Self::new(runtime, engine))
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Media info of `path`, or an error object.
    pub fn metadata(&self, path: &str) -> Value {
        match self.runtime.block_on(self.engine.probe(Path::new(path))) {
            Ok(info) => to_json(&info),
            Err(e) => engine_error_json(&e),
        }
    }

    /// Submits a job and returns `{ "id": ... }`.
    ///
    /// `profile_json` of `None` selects the mobile preset.
    pub fn submit(&self, input: &str, output: &str, profile_json: Option<&str>) -> Value {
        let profile = match profile_json {
            Some(raw) => match serde_json::from_str::<TranscodeProfile>(raw) {
                Ok(profile) => profile,
                Err(e) => return error_json(format!("Invalid profile: {}", e), Some("invalid_profile")),
            },
            None => match self.mobile_profile() {
                Ok(profile) => profile,
                Err(e) => return e,
            },
        };

        let request = TranscodeRequest::new(input, profile, output);
        match self.runtime.block_on(self.engine.submit(request)) {
            Ok(handle) => json!({ "id": handle.id() }),
            Err(e) => engine_error_json(&e),
        }
    }

    /// Mobile preset on the best encoder this build of ffmpeg carries.
    fn mobile_profile(&self) -> Result<TranscodeProfile, Value> {
        let transcoder = self.engine.transcoder();
        TranscodeProfile::mobile(|codec| transcoder.supports_codec(codec)).ok_or_else(|| {
            error_json(
                format!("No h264, mpeg4 or h265 encoder in {}", transcoder.name()),
                Some("invalid_profile"),
            )
        })
    }

    /// Transcodes with the mobile preset and blocks until the job ends.
    pub fn compress(&self, input: &str, output: &str) -> Value {
        let profile = match self.mobile_profile() {
            Ok(profile) => profile,
            Err(e) => return e,
        };
        let request = TranscodeRequest::new(input, profile, output);
        let engine = Arc::clone(&self.engine);
        let outcome = self.runtime.block_on(async move {
            let handle = engine.submit(request).await?;
            engine.wait(handle.id()).await
        });

        match outcome {
            Ok(result) => to_json(&result),
            Err(e) => engine_error_json(&e),
        }
    }

    /// Snapshot of a job.
    pub fn poll(&self, job_id: &str) -> Value {
        let id: JobId = match job_id.parse() {
            Ok(id) => id,
            Err(_) => return error_json(format!("Invalid job id: {}", job_id), None),
        };
        match self.runtime.block_on(self.engine.status(id)) {
            Ok(snapshot) => to_json(&snapshot),
            Err(e) => engine_error_json(&e),
        }
    }

    pub fn cancel(&self, job_id: &str) -> CancelCode {
        let Ok(id) = job_id.parse::<JobId>() else {
            return CancelCode::Unknown;
        };
        match self.runtime.block_on(self.engine.cancel(id)) {
            Ok(true) => CancelCode::Requested,
            Ok(false) => CancelCode::NoOp,
            Err(_) => CancelCode::Unknown,
        }
    }
}
