//! `SharedBus` — the key-value/pub-sub abstraction every rate limit,
//! presence record and cross-instance broadcast goes through (spec §6
//! "Shared-bus keyspace"). A production deployment backs this with Redis;
//! [`InMemorySharedBus`] backs tests and a single-instance default run.

use crate::presence::ConnectionPresence;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus backend error: {0}")]
    Backend(String),
}

/// A single published cross-instance broadcast (spec `ws:broadcast:{channel}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub channel: String,
    pub payload: String,
}

pub type BroadcastStream = Pin<Box<dyn Stream<Item = BroadcastMessage> + Send>>;

/// The full keyspace contract (spec §6). Every method maps to exactly one
/// key family so a Redis implementation is a thin, literal translation.
#[async_trait]
pub trait SharedBus: Send + Sync {
    // -- presence: `ws:connections:{connection_id}` ------------------------
    async fn set_presence(&self, presence: &ConnectionPresence, ttl: Duration) -> Result<(), BusError>;
    async fn get_presence(&self, connection_id: &str) -> Result<Option<ConnectionPresence>, BusError>;
    async fn touch_presence_heartbeat(&self, connection_id: &str, at: DateTime<Utc>) -> Result<(), BusError>;
    async fn delete_presence(&self, connection_id: &str) -> Result<(), BusError>;

    // -- `ws:user:{user_id}:connections` ------------------------------------
    async fn add_user_connection(&self, user_id: &str, connection_id: &str) -> Result<(), BusError>;
    async fn remove_user_connection(&self, user_id: &str, connection_id: &str) -> Result<(), BusError>;
    async fn user_connections(&self, user_id: &str) -> Result<Vec<String>, BusError>;

    // -- `ws:subs:user:{user_id}` --------------------------------------------
    async fn add_subscription(&self, user_id: &str, topic: &str) -> Result<(), BusError>;
    async fn remove_subscription(&self, user_id: &str, topic: &str) -> Result<(), BusError>;
    async fn subscriptions(&self, user_id: &str) -> Result<BTreeSet<String>, BusError>;

    /// Sliding-window rate limiting primitive shared by `ws:conn:ip:{ip}`,
    /// `ws:msg:{connection_id}` and the per-user subscription counter:
    /// records `now_ms` into the window keyed by `key`, evicts entries
    /// older than `window_ms`, and returns the count remaining.
    async fn record_and_count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u64, BusError>;

    // -- `jwt:*` revocation keyspace -----------------------------------------
    async fn is_jti_revoked(&self, jti: &str) -> Result<bool, BusError>;
    async fn revoke_after(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, BusError>;
    /// Marks a refresh token's `jti` used; returns `true` if this call is
    /// the one that marked it (i.e. it was not already used — replay).
    async fn mark_refresh_used(&self, jti: &str) -> Result<bool, BusError>;
    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, BusError>;
    async fn revoke_family(&self, family_id: &str) -> Result<(), BusError>;

    // -- `ws:broadcast:{channel}` pub/sub ------------------------------------
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;
    async fn subscribe_broadcasts(&self) -> Result<BroadcastStream, BusError>;
}

const BROADCAST_CAPACITY: usize = 1024;

/// In-process bus backing tests and the facade's default (single-instance)
/// run mode — no Redis required.
pub struct InMemorySharedBus {
    presence: DashMap<String, ConnectionPresence>,
    user_connections: DashMap<String, BTreeSet<String>>,
    user_subscriptions: DashMap<String, BTreeSet<String>>,
    windows: DashMap<String, Vec<i64>>,
    revoked_jti: DashMap<String, ()>,
    revoke_after_watermark: DashMap<String, DateTime<Utc>>,
    used_refresh_jti: DashMap<String, ()>,
    revoked_families: DashMap<String, ()>,
    broadcast: tokio::sync::broadcast::Sender<BroadcastMessage>,
}

impl Default for InMemorySharedBus {
    fn default() -> Self {
        Self {
            presence: DashMap::new(),
            user_connections: DashMap::new(),
            user_subscriptions: DashMap::new(),
            windows: DashMap::new(),
            revoked_jti: DashMap::new(),
            revoke_after_watermark: DashMap::new(),
            used_refresh_jti: DashMap::new(),
            revoked_families: DashMap::new(),
            broadcast: tokio::sync::broadcast::channel(BROADCAST_CAPACITY).0,
        }
    }
}

impl InMemorySharedBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SharedBus for InMemorySharedBus {
    async fn set_presence(&self, presence: &ConnectionPresence, _ttl: Duration) -> Result<(), BusError> {
        self.presence.insert(presence.connection_id.clone(), presence.clone());
        Ok(())
    }

    async fn get_presence(&self, connection_id: &str) -> Result<Option<ConnectionPresence>, BusError> {
        Ok(self.presence.get(connection_id).map(|p| p.clone()))
    }

    async fn touch_presence_heartbeat(&self, connection_id: &str, at: DateTime<Utc>) -> Result<(), BusError> {
        if let Some(mut entry) = self.presence.get_mut(connection_id) {
            entry.last_heartbeat = at;
        }
        Ok(())
    }

    async fn delete_presence(&self, connection_id: &str) -> Result<(), BusError> {
        self.presence.remove(connection_id);
        Ok(())
    }

    async fn add_user_connection(&self, user_id: &str, connection_id: &str) -> Result<(), BusError> {
        self.user_connections
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        Ok(())
    }

    async fn remove_user_connection(&self, user_id: &str, connection_id: &str) -> Result<(), BusError> {
        if let Some(mut set) = self.user_connections.get_mut(user_id) {
            set.remove(connection_id);
        }
        Ok(())
    }

    async fn user_connections(&self, user_id: &str) -> Result<Vec<String>, BusError> {
        Ok(self
            .user_connections
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_subscription(&self, user_id: &str, topic: &str) -> Result<(), BusError> {
        self.user_subscriptions
            .entry(user_id.to_string())
            .or_default()
            .insert(topic.to_string());
        Ok(())
    }

    async fn remove_subscription(&self, user_id: &str, topic: &str) -> Result<(), BusError> {
        if let Some(mut set) = self.user_subscriptions.get_mut(user_id) {
            set.remove(topic);
        }
        Ok(())
    }

    async fn subscriptions(&self, user_id: &str) -> Result<BTreeSet<String>, BusError> {
        Ok(self.user_subscriptions.get(user_id).map(|set| set.clone()).unwrap_or_default())
    }

    async fn record_and_count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u64, BusError> {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        entry.push(now_ms);
        let cutoff = now_ms - window_ms;
        entry.retain(|&ts| ts > cutoff);
        Ok(entry.len() as u64)
    }

    async fn is_jti_revoked(&self, jti: &str) -> Result<bool, BusError> {
        Ok(self.revoked_jti.contains_key(jti))
    }

    async fn revoke_after(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, BusError> {
        Ok(self.revoke_after_watermark.get(user_id).map(|v| *v))
    }

    async fn mark_refresh_used(&self, jti: &str) -> Result<bool, BusError> {
        Ok(self.used_refresh_jti.insert(jti.to_string(), ()).is_none())
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, BusError> {
        Ok(self.revoked_families.contains_key(family_id))
    }

    async fn revoke_family(&self, family_id: &str) -> Result<(), BusError> {
        self.revoked_families.insert(family_id.to_string(), ());
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let _ = self.broadcast.send(BroadcastMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe_broadcasts(&self) -> Result<BroadcastStream, BusError> {
        let receiver = self.broadcast.subscribe();
        Ok(Box::pin(tokio_stream::wrappers::BroadcastStream::new(receiver).filter_map(|msg| async move { msg.ok() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn presence_round_trips() {
        let bus = InMemorySharedBus::new();
        let presence = ConnectionPresence::new("c1".into(), "u1".into(), "s1".into(), "i1".into());
        bus.set_presence(&presence, Duration::from_secs(60)).await.unwrap();
        let fetched = bus.get_presence("c1").await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
    }

    #[tokio::test]
    async fn sliding_window_evicts_old_entries() {
        let bus = InMemorySharedBus::new();
        for i in 0..5 {
            bus.record_and_count("k", i * 1000, 2000).await.unwrap();
        }
        let count = bus.record_and_count("k", 4500, 2000).await.unwrap();
        assert!(count <= 3, "window should have evicted entries older than 2s: got {count}");
    }

    #[tokio::test]
    async fn refresh_token_reuse_is_detected() {
        let bus = InMemorySharedBus::new();
        assert!(bus.mark_refresh_used("jti-1").await.unwrap());
        assert!(!bus.mark_refresh_used("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn publish_reaches_a_live_subscriber() {
        let bus = InMemorySharedBus::new();
        let mut stream = bus.subscribe_broadcasts().await.unwrap();
        bus.publish("risk_events", "{}").await.unwrap();
        let received = stream.next().await.unwrap();
        assert_eq!(received.channel, "risk_events");
    }
}
