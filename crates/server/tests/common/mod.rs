//! In-process API harness over the mock transcoder.
//!
//! Requests go straight into the router with `oneshot`, so the job API runs
//! end to end without a socket or an ffmpeg install.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use vidpress_core::{
    create_authenticator, testing::MockTranscoder, Authenticator, Config, EngineConfig,
    TranscodeEngine, Transcoder,
};
use vidpress_server::state::{AppState, SharedEngine};

macro_rules! assert_status {
    ($response:expr, $status:expr) => {{
        let response = &$response;
        assert_eq!(
            response.status, $status,
            "unexpected status, body: {}",
            response.body
        );
    }};
}

/// Router, engine and mock wired together over a scratch directory.
pub struct TestFixture {
    pub router: Router,
    /// Shared with the engine; script failures and holds through it.
    pub transcoder: MockTranscoder,
    pub engine: SharedEngine,
    pub temp_dir: TempDir,
}

/// Status and decoded JSON body (`Null` when empty or not JSON).
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_transcoder(MockTranscoder::new(), EngineConfig::default()).await
    }

    pub async fn with_transcoder(transcoder: MockTranscoder, engine_config: EngineConfig) -> Self {
        let config = Config {
            engine: engine_config,
            ..Default::default()
        };
        Self::with_config(transcoder, TempDir::new().unwrap(), config).await
    }

    /// Fixture over a full config; `temp_dir` is passed in so the config can
    /// name paths inside it.
    pub async fn with_config(transcoder: MockTranscoder, temp_dir: TempDir, config: Config) -> Self {
        let backend: Arc<dyn Transcoder> = Arc::new(transcoder.clone());
        let engine: SharedEngine =
            Arc::new(TranscodeEngine::with_transcoder(config.engine.clone(), backend));
        let authenticator: Arc<dyn Authenticator> =
            Arc::from(create_authenticator(&config.auth).unwrap());
        let state = AppState::new(config, Arc::clone(&engine), authenticator);
        let router = vidpress_server::api::create_router(Arc::new(state));

        Self {
            router,
            transcoder,
            engine,
            temp_dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Job body reading `clip.mp4` and writing `out/<name>` as 720p h264.
    pub fn job_body(&self, name: &str) -> Value {
        json!({
            "source": self.path("clip.mp4"),
            "destination": self.path("out").join(name),
            "profile": {
                "codec": "h264",
                "container": "mp4",
                "resolution": "720p",
                "video_bitrate_kbps": 2000
            }
        })
    }

    /// Submits `job_body(name)` and returns the new job id.
    pub async fn submit(&self, name: &str) -> String {
        let response = self.post("/api/v1/jobs", self.job_body(name)).await;
        assert_status!(response, StatusCode::CREATED);
        response.body["id"].as_str().unwrap().to_string()
    }

    /// Polls the job until its state is terminal and returns the snapshot.
    pub async fn wait_terminal(&self, id: &str) -> Value {
        let path = format!("/api/v1/jobs/{}", id);
        for _ in 0..200 {
            let job = self.get(&path).await.body;
            if matches!(
                job["state"].as_str(),
                Some("completed" | "failed" | "cancelled")
            ) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", id);
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.json_call(Method::GET, path, Body::empty()).await
    }

    /// Sends `body` (empty when `None`) with an optional `X-API-Key`.
    pub async fn send_with_key(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        api_key: Option<&str>,
    ) -> TestResponse {
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = api_key {
            request = request.header("x-api-key", key);
        }
        let (status, bytes) = self.dispatch(request.body(body).unwrap()).await;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse { status, body }
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.json_call(Method::POST, path, Body::from(body.to_string()))
            .await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.json_call(Method::DELETE, path, Body::empty()).await
    }

    /// POSTs `body` verbatim with a JSON content type.
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.json_call(Method::POST, path, Body::from(body.to_owned()))
            .await
    }

    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let (status, bytes) = self.call(Method::GET, path, Body::empty()).await;
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn json_call(&self, method: Method, path: &str, body: Body) -> TestResponse {
        let (status, bytes) = self.call(method, path, body).await;
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse { status, body }
    }

    async fn call(&self, method: Method, path: &str, body: Body) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }
}
