//! Redis-backed [`SharedBus`] — the production implementation of the
//! keyspace in spec §6, used once a deployment runs more than one
//! fan-out instance and presence/subscriptions/rate limits must be
//! visible across all of them.

use crate::bus::{BroadcastMessage, BroadcastStream, BusError, SharedBus};
use crate::presence::ConnectionPresence;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_stream::StreamExt;

fn to_bus_err(err: redis::RedisError) -> BusError {
    BusError::Backend(err.to_string())
}

pub struct RedisSharedBus {
    client: redis::Client,
    manager: ConnectionManager,
}

impl std::fmt::Debug for RedisSharedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSharedBus").finish_non_exhaustive()
    }
}

impl RedisSharedBus {
    pub async fn connect(redis_url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url).map_err(to_bus_err)?;
        let manager = client.get_connection_manager().await.map_err(to_bus_err)?;
        Ok(Self { client, manager })
    }

    fn presence_key(connection_id: &str) -> String {
        format!("ws:connections:{connection_id}")
    }
    fn user_connections_key(user_id: &str) -> String {
        format!("ws:user:{user_id}:connections")
    }
    fn subscriptions_key(user_id: &str) -> String {
        format!("ws:subs:user:{user_id}")
    }
    fn revoked_jti_key(jti: &str) -> String {
        format!("jwt:revoked:{jti}")
    }
    fn revoke_after_key(user_id: &str) -> String {
        format!("jwt:user:revoke_after:{user_id}")
    }
    fn refresh_used_key(jti: &str) -> String {
        format!("jwt:refresh:used:{jti}")
    }
    fn family_revoked_key(family_id: &str) -> String {
        format!("jwt:refresh:family:revoked:{family_id}")
    }
    fn broadcast_channel(channel: &str) -> String {
        format!("ws:broadcast:{channel}")
    }
}

#[async_trait]
impl SharedBus for RedisSharedBus {
    async fn set_presence(&self, presence: &ConnectionPresence, ttl: Duration) -> Result<(), BusError> {
        let payload = serde_json::to_string(presence).map_err(|e| BusError::Backend(e.to_string()))?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(Self::presence_key(&presence.connection_id), payload, ttl.as_secs())
            .await
            .map_err(to_bus_err)
    }

    async fn get_presence(&self, connection_id: &str) -> Result<Option<ConnectionPresence>, BusError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(Self::presence_key(connection_id)).await.map_err(to_bus_err)?;
        raw.map(|s| serde_json::from_str(&s).map_err(|e| BusError::Backend(e.to_string()))).transpose()
    }

    async fn touch_presence_heartbeat(&self, connection_id: &str, at: DateTime<Utc>) -> Result<(), BusError> {
        let Some(mut presence) = self.get_presence(connection_id).await? else {
            return Ok(());
        };
        presence.last_heartbeat = at;
        self.set_presence(&presence, crate::presence::PRESENCE_TTL).await
    }

    async fn delete_presence(&self, connection_id: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(Self::presence_key(connection_id)).await.map_err(to_bus_err)
    }

    async fn add_user_connection(&self, user_id: &str, connection_id: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let key = Self::user_connections_key(user_id);
        conn.sadd::<_, _, ()>(&key, connection_id).await.map_err(to_bus_err)?;
        conn.expire::<_, ()>(&key, crate::presence::PRESENCE_TTL.as_secs() as i64).await.map_err(to_bus_err)
    }

    async fn remove_user_connection(&self, user_id: &str, connection_id: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(Self::user_connections_key(user_id), connection_id).await.map_err(to_bus_err)
    }

    async fn user_connections(&self, user_id: &str) -> Result<Vec<String>, BusError> {
        let mut conn = self.manager.clone();
        conn.smembers(Self::user_connections_key(user_id)).await.map_err(to_bus_err)
    }

    async fn add_subscription(&self, user_id: &str, topic: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        let key = Self::subscriptions_key(user_id);
        conn.sadd::<_, _, ()>(&key, topic).await.map_err(to_bus_err)?;
        conn.expire::<_, ()>(&key, crate::presence::PRESENCE_TTL.as_secs() as i64).await.map_err(to_bus_err)
    }

    async fn remove_subscription(&self, user_id: &str, topic: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(Self::subscriptions_key(user_id), topic).await.map_err(to_bus_err)
    }

    async fn subscriptions(&self, user_id: &str) -> Result<BTreeSet<String>, BusError> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = conn.smembers(Self::subscriptions_key(user_id)).await.map_err(to_bus_err)?;
        Ok(members.into_iter().collect())
    }

    async fn record_and_count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<u64, BusError> {
        let mut conn = self.manager.clone();
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());
        let cutoff = now_ms - window_ms;
        conn.zadd::<_, _, _, ()>(key, &member, now_ms).await.map_err(to_bus_err)?;
        conn.zrembyscore::<_, _, _, ()>(key, "-inf", cutoff).await.map_err(to_bus_err)?;
        let window_secs = ((window_ms / 1000) + 1) as i64;
        conn.expire::<_, ()>(key, window_secs).await.map_err(to_bus_err)?;
        conn.zcard(key).await.map_err(to_bus_err)
    }

    async fn is_jti_revoked(&self, jti: &str) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        conn.exists(Self::revoked_jti_key(jti)).await.map_err(to_bus_err)
    }

    async fn revoke_after(&self, user_id: &str) -> Result<Option<DateTime<Utc>>, BusError> {
        let mut conn = self.manager.clone();
        let raw: Option<i64> = conn.get(Self::revoke_after_key(user_id)).await.map_err(to_bus_err)?;
        Ok(raw.and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
    }

    async fn mark_refresh_used(&self, jti: &str) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        let set: bool = conn.set_nx(Self::refresh_used_key(jti), true).await.map_err(to_bus_err)?;
        Ok(set)
    }

    async fn is_family_revoked(&self, family_id: &str) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        conn.exists(Self::family_revoked_key(family_id)).await.map_err(to_bus_err)
    }

    async fn revoke_family(&self, family_id: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(Self::family_revoked_key(family_id), true).await.map_err(to_bus_err)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(Self::broadcast_channel(channel), payload).await.map_err(to_bus_err)
    }

    async fn subscribe_broadcasts(&self) -> Result<BroadcastStream, BusError> {
        let pubsub_conn = self.client.get_async_pubsub().await.map_err(to_bus_err)?;
        let mut pubsub_conn = pubsub_conn;
        pubsub_conn.psubscribe("ws:broadcast:*").await.map_err(to_bus_err)?;

        let stream = pubsub_conn.into_on_message().filter_map(|msg| {
            let channel = msg
                .get_channel_name()
                .strip_prefix("ws:broadcast:")
                .unwrap_or_else(|| msg.get_channel_name())
                .to_string();
            let payload: Option<String> = msg.get_payload().ok();
            payload.map(|payload| BroadcastMessage { channel, payload })
        });
        Ok(Box::pin(stream))
    }
}
