use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{
    handlers, jobs,
    middleware::{auth_middleware, metrics_middleware},
    ws,
};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Routes behind the authenticator
    let protected = Router::new()
        .route("/config", get(handlers::get_config))
        // Media
        .route("/probe", post(handlers::probe))
        // Jobs
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/jobs/{id}/events", get(ws::job_events))
        // Worker pool
        .route("/engine/status", get(handlers::engine_status))
        // Prometheus
        .route("/metrics", get(handlers::metrics))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    // API routes
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
