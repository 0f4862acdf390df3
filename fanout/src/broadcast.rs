//! Cross-instance broadcast (spec §4.5 "Cross-instance broadcast"): each
//! instance subscribes once to `ws:broadcast:*`, and on receipt looks up
//! which of the addressed user's connections it owns locally and forwards
//! the message only to those.

use crate::bus::SharedBus;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Registry of sockets this instance currently owns, keyed by
/// `connection_id`, so the broadcast listener can address them directly
/// without going back through the shared bus.
#[derive(Default)]
pub struct ConnectionRegistry {
    senders: DashMap<String, mpsc::UnboundedSender<String>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").field("local_connections", &self.senders.len()).finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, connection_id: String) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(connection_id, tx);
        rx
    }

    pub fn deregister(&self, connection_id: &str) {
        self.senders.remove(connection_id);
    }

    fn send_local(&self, connection_id: &str, payload: &str) -> bool {
        match self.senders.get(connection_id) {
            Some(sender) => sender.send(payload.to_string()).is_ok(),
            None => false,
        }
    }
}

/// Payload envelope published on `ws:broadcast:{channel}` — `channel` is
/// the Redis/bus routing key, `user_id` scopes delivery, `topic`/`data` are
/// forwarded to the client verbatim as a `{topic, data}` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub user_id: String,
    pub topic: String,
    pub data: serde_json::Value,
}

/// Publishes an update addressed to `user_id` on `topic` to every instance
/// via the shared bus; each instance's listener filters to its own sockets.
pub async fn publish_update(bus: &Arc<dyn SharedBus>, channel: &str, user_id: &str, topic: &str, data: serde_json::Value) {
    let envelope = BroadcastEnvelope { user_id: user_id.to_string(), topic: topic.to_string(), data };
    match serde_json::to_string(&envelope) {
        Ok(payload) => {
            if let Err(err) = bus.publish(channel, &payload).await {
                warn!(%channel, %err, "failed to publish broadcast");
            }
        }
        Err(err) => warn!(%err, "failed to serialize broadcast envelope"),
    }
}

/// Spawns the instance-wide listener: one subscription per process, fans
/// out to whichever local connections the registry and bus agree this
/// instance owns for the envelope's `user_id`.
pub fn spawn_broadcast_listener(bus: Arc<dyn SharedBus>, registry: Arc<ConnectionRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match bus.subscribe_broadcasts().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "failed to subscribe to broadcast channel, listener exiting");
                return;
            }
        };
        use tokio_stream::StreamExt;
        while let Some(message) = stream.next().await {
            let envelope: BroadcastEnvelope = match serde_json::from_str(&message.payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(%err, "malformed broadcast payload, dropping");
                    continue;
                }
            };
            let owned = match bus.user_connections(&envelope.user_id).await {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(%err, "failed to look up user connections for broadcast");
                    continue;
                }
            };
            let outbound = serde_json::json!({ "topic": envelope.topic, "data": envelope.data }).to_string();
            for connection_id in owned {
                registry.send_local(&connection_id, &outbound);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemorySharedBus;

    #[tokio::test]
    async fn broadcast_reaches_only_locally_registered_connections() {
        let bus: Arc<dyn SharedBus> = InMemorySharedBus::new();
        let registry = ConnectionRegistry::new();
        bus.add_user_connection("alice", "conn-1").await.unwrap();

        let mut rx = registry.register("conn-1".to_string());
        let handle = spawn_broadcast_listener(bus.clone(), registry.clone());

        // give the listener a moment to subscribe before publishing.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        publish_update(&bus, "updates", "alice", "order_updates:alice", serde_json::json!({"status": "FILLED"})).await;

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(received.contains("FILLED"));

        handle.abort();
    }
}
