//! Websocket endpoint streaming session events to clients.

pub mod handler;

pub use handler::ws_handler;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{session_id}", get(ws_handler))
}
