//! WebSocket streaming of job events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, warn};
use vidpress_core::{JobEvent, JobEventStream, JobId};

use super::jobs::{engine_error_response, ErrorResponse};
use crate::metrics::{WS_EVENTS_SENT, WS_SUBSCRIBERS_ACTIVE};
use crate::state::AppState;

/// Metric label for an event.
fn event_type(event: &JobEvent) -> &'static str {
    match event {
        JobEvent::Progress(_) => "progress",
        JobEvent::Finished { .. } => "finished",
    }
}

/// WebSocket upgrade handler for `GET /jobs/{id}/events`.
///
/// The subscription is taken before the upgrade so unknown jobs get a plain
/// 404 instead of an empty socket.
pub async fn job_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return (
                axum::http::StatusCode::BAD_REQUEST,
                axum::Json(ErrorResponse {
                    error: format!("Invalid job id: {}", id),
                    kind: None,
                }),
            )
                .into_response()
        }
    };

    match state.engine().subscribe(id).await {
        Ok(events) => ws.on_upgrade(move |socket| stream_events(socket, id, events)),
        Err(e) => engine_error_response(e).into_response(),
    }
}

/// Forwards one job's events to a client, closing after the terminal event.
async fn stream_events(socket: WebSocket, id: JobId, mut events: JobEventStream) {
    let (mut sender, mut receiver) = socket.split();

    WS_SUBSCRIBERS_ACTIVE.inc();
    debug!(job_id = %id, "Event subscriber connected");

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    break;
                };
                let terminal = event.is_terminal();
                WS_EVENTS_SENT.with_label_values(&[event_type(&event)]).inc();

                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            debug!(job_id = %id, "WebSocket send failed, client disconnected");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(job_id = %id, "Failed to serialize JobEvent: {}", e);
                    }
                }

                if terminal {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(job_id = %id, "WebSocket client closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(job_id = %id, "WebSocket receive error: {}", e);
                        break;
                    }
                    // Pings are answered by axum; nothing else is expected
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    WS_SUBSCRIBERS_ACTIVE.dec();
    debug!(job_id = %id, "Event subscriber disconnected");
}
