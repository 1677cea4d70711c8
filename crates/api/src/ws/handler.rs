//! Per-connection websocket loop.
//!
//! Each connection owns a broadcast subscription on the session's event
//! channel. After the upgrade the socket splits: a spawned sender task
//! forwards bus events as JSON text frames and pings every 30 seconds, while
//! the receiver loop drains inbound frames (the channel is informational) and
//! tears the connection down on close or error. When a slow client lags past
//! the channel capacity the oldest events are dropped and the stream resumes
//! from the oldest retained event.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use worldline_db::repositories::SessionRepo;
use worldline_events::SessionEvent;

use crate::state::AppState;

/// Interval between heartbeat pings (in seconds).
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Manage a single WebSocket connection after upgrade.
async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, session_id = %session_id, "WebSocket connected");

    let events = state.sim.event_bus.subscribe(&session_id).await;
    let (mut sink, mut stream) = socket.split();

    // Known sessions get their current running state up front.
    if let Ok(mut conn) = state.sim.pool.acquire().await {
        if let Ok(Some(session)) = SessionRepo::find_by_id(&mut conn, &session_id).await {
            let frame = SessionEvent::SessionState {
                running: session.running,
            };
            if send_event(&mut sink, &frame).await.is_err() {
                return;
            }
        }
    }

    // Sender task: forward bus events and heartbeat pings to the sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(forward_events(sink, events, sender_conn_id));

    // Receiver loop: drain inbound frames until close or error.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            // Client frames are informational-channel noise; ignore them.
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(conn_id = %conn_id, %error, "WebSocket receive error");
                break;
            }
        }
    }

    send_task.abort();
    tracing::info!(conn_id = %conn_id, session_id = %session_id, "WebSocket disconnected");
}

/// Forward loop owned by the sender task.
async fn forward_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: broadcast::Receiver<SessionEvent>,
    conn_id: String,
) {
    let mut lagged_total: u64 = 0;
    let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    heartbeat.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Drop-oldest policy: count it and keep streaming.
                    lagged_total += skipped;
                    tracing::debug!(
                        conn_id = %conn_id,
                        skipped,
                        lagged_total,
                        "WebSocket subscriber lagged; oldest events dropped"
                    );
                }
                Err(RecvError::Closed) => break,
            },

            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    if lagged_total > 0 {
        tracing::debug!(conn_id = %conn_id, lagged_total, "WebSocket sender finished with lag");
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &SessionEvent,
) -> Result<(), axum::Error> {
    let frame = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    sink.send(Message::Text(frame.into())).await
}
