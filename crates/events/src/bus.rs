//! Per-session event bus backed by `tokio::sync::broadcast` channels.
//!
//! [`SessionEventBus`] is the publish/subscribe hub between the runner /
//! services and websocket connections. Each session gets its own bounded
//! broadcast channel; the ring buffer drops the oldest events when a
//! subscriber lags, so publishers never block on slow consumers. A lagging
//! subscriber observes `RecvError::Lagged(n)` and continues from the oldest
//! retained event.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// Bounded queue capacity per session channel.
const CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// A typed event on a session's realtime channel.
///
/// Serialized with an `"event"` tag so frames read as
/// `{"event": "message_created", ...}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The runner started or stopped producing rounds.
    SessionState { running: bool },

    /// A timeline message was appended.
    MessageCreated {
        branch_id: String,
        message: serde_json::Value,
    },

    /// A timeline message was edited in place.
    MessageUpdated {
        branch_id: String,
        message: serde_json::Value,
    },

    /// The session's active branch changed.
    BranchSwitched { active_branch_id: String },

    /// A provider model listing completed.
    ModelsLoaded {
        provider: String,
        models: Vec<String>,
    },

    /// A runtime error surfaced to clients.
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// SessionEventBus
// ---------------------------------------------------------------------------

/// Fan-out hub holding one broadcast channel per session.
///
/// Designed to be shared via `Arc<SessionEventBus>` across the application.
pub struct SessionEventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<SessionEvent>>>,
}

impl SessionEventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Publish an event to all subscribers of a session.
    ///
    /// With zero subscribers the event is silently dropped and the channel
    /// entry is pruned; realtime frames have no replay contract.
    pub async fn publish(&self, session_id: &str, event: SessionEvent) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(session_id) {
            if sender.send(event).is_err() {
                // SendError means every receiver is gone.
                channels.remove(session_id);
            }
        }
    }

    /// Subscribe to a session's events, creating the channel on first use.
    pub async fn subscribe(&self, session_id: &str) -> broadcast::Receiver<SessionEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Number of live subscribers for a session.
    pub async fn subscriber_count(&self, session_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(session_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of sessions with an open channel.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn publish_reaches_all_session_subscribers() {
        let bus = SessionEventBus::new();
        let mut rx1 = bus.subscribe("s1").await;
        let mut rx2 = bus.subscribe("s1").await;

        bus.publish("s1", SessionEvent::SessionState { running: true })
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.recv().await.expect("subscriber should receive");
            assert!(matches!(event, SessionEvent::SessionState { running: true }));
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let bus = SessionEventBus::new();
        let mut rx_a = bus.subscribe("a").await;
        let mut rx_b = bus.subscribe("b").await;

        bus.publish(
            "a",
            SessionEvent::BranchSwitched {
                active_branch_id: "branch-1".into(),
            },
        )
        .await;

        assert!(rx_a.recv().await.is_ok());
        assert!(matches!(rx_b.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_block_or_panic() {
        let bus = SessionEventBus::new();
        bus.publish("ghost", SessionEvent::SessionState { running: false })
            .await;
        assert_eq!(bus.subscriber_count("ghost").await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_observes_lag() {
        let bus = SessionEventBus::new();
        let mut rx = bus.subscribe("s").await;

        // Overflow the 64-slot ring without draining.
        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(
                "s",
                SessionEvent::Error {
                    code: "E".into(),
                    message: format!("event {i}"),
                    hint: None,
                },
            )
            .await;
        }

        match rx.recv().await {
            Err(RecvError::Lagged(skipped)) => assert_eq!(skipped, 10),
            other => panic!("expected Lagged, got {other:?}"),
        }
        // After the lag report the oldest retained event is next.
        match rx.recv().await {
            Ok(SessionEvent::Error { message, .. }) => assert_eq!(message, "event 10"),
            other => panic!("expected event 10, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dead_channels_are_pruned_on_publish() {
        let bus = SessionEventBus::new();
        let rx = bus.subscribe("s").await;
        assert_eq!(bus.channel_count().await, 1);

        drop(rx);
        bus.publish("s", SessionEvent::SessionState { running: true })
            .await;
        assert_eq!(bus.channel_count().await, 0);
    }

    #[test]
    fn events_serialize_with_event_tag() {
        let frame = serde_json::to_value(SessionEvent::ModelsLoaded {
            provider: "ollama".into(),
            models: vec!["m1".into()],
        })
        .unwrap();
        assert_eq!(frame["event"], "models_loaded");
        assert_eq!(frame["provider"], "ollama");

        let error = serde_json::to_value(SessionEvent::Error {
            code: "BUSY".into(),
            message: "pause first".into(),
            hint: None,
        })
        .unwrap();
        assert_eq!(error["event"], "error");
        assert!(error.get("hint").is_none());
    }
}
