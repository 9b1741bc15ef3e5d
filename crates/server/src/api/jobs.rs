//! Job API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use vidpress_core::{
    EngineError, JobId, JobSnapshot, JobState, TranscodeError, TranscodeProfile, TranscodeRequest,
};

use crate::metrics::{JOBS_REJECTED_TOTAL, JOBS_SUBMITTED_TOTAL};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    /// Source media file
    pub source: PathBuf,
    /// Where the output is placed on success
    pub destination: PathBuf,
    /// Target profile (h264/mp4/720p when omitted)
    #[serde(default)]
    pub profile: TranscodeProfile,
}

/// Response for a submitted job
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub id: JobId,
    pub state: JobState,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
}

/// Response for a cancel request
#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub id: JobId,
    /// False when the job had already finished
    pub cancel_requested: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Maps an engine error to a status code and JSON body.
pub fn engine_error_response(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::InvalidProfile { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        EngineError::JobNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Probe(TranscodeError::SourceNotFound { .. }) => StatusCode::NOT_FOUND,
        EngineError::Probe(TranscodeError::ToolNotFound { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Probe(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorResponse {
            kind: err.kind().map(|k| k.as_str().to_string()),
            error: err.to_string(),
        }),
    )
}

fn parse_job_id(id: &str) -> Result<JobId, ApiError> {
    id.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid job id: {}", id),
                kind: None,
            }),
        )
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new transcode job
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let request = TranscodeRequest::new(body.source, body.profile, body.destination);
    let engine = state.engine();

    let handle = match engine.submit(request).await {
        Ok(handle) => handle,
        Err(e) => {
            let reason = e.kind().map(|k| k.as_str()).unwrap_or("invalid_request");
            JOBS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
            info!(error = %e, "Rejected job submission");
            return Err(engine_error_response(e));
        }
    };
    JOBS_SUBMITTED_TOTAL.inc();

    // The job may already have left the queue, or even finished.
    let job_state = engine
        .status(handle.id())
        .await
        .map(|s| s.state)
        .unwrap_or(JobState::Queued);

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            id: handle.id(),
            state: job_state,
        }),
    ))
}

/// List all retained jobs in submission order
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<ListJobsResponse> {
    let jobs = state.engine().list().await;
    Json(ListJobsResponse {
        total: jobs.len(),
        jobs,
    })
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let id = parse_job_id(&id)?;
    state
        .engine()
        .status(id)
        .await
        .map(Json)
        .map_err(engine_error_response)
}

/// Request cancellation of a job (DELETE endpoint)
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let id = parse_job_id(&id)?;
    let cancel_requested = state
        .engine()
        .cancel(id)
        .await
        .map_err(engine_error_response)?;

    Ok(Json(CancelJobResponse {
        id,
        cancel_requested,
    }))
}
