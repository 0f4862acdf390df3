//! Per-connection WebSocket driver (spec §4.5 "Connection lifecycle",
//! "Message protocol", "Heartbeat watchdog"): owns one socket from accept
//! to close, running the heartbeat watchdog and periodic token
//! revalidation alongside the inbound message loop the cancellation-aware
//! way the teacher's background loops do (`tokio::select!` over a `watch`
//! shutdown signal, see [`crate::bus`] and `mtrader_risk::monitor`).

use crate::acl::is_topic_permitted;
use crate::broadcast::ConnectionRegistry;
use crate::bus::SharedBus;
use crate::error::close_code;
use crate::presence::{ConnectionPresence, PRESENCE_TTL};
use crate::rate_limit::{message_key, RateLimit, RateLimiter};
use crate::token::{TokenClaims, TokenType, TokenVerifier};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HEARTBEAT_INSPECTION_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_MAX_AGE: Duration = Duration::from_secs(90);
const REVALIDATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat,
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    HeartbeatAck { ts: i64 },
    Subscribed { topic: &'a str },
    Unsubscribed { topic: &'a str },
    Error { detail: String },
    Topic { topic: &'a str, data: serde_json::Value },
}

pub struct ConnectionContext {
    pub bus: Arc<dyn SharedBus>,
    pub verifier: Arc<TokenVerifier>,
    pub instance_id: String,
    pub registry: Arc<ConnectionRegistry>,
}

/// Drives a single accepted socket until it closes. `claims` is the
/// already-authenticated token (accept-time auth happens in the router
/// before the upgrade completes, per the teacher's pattern of validating
/// before handing off to a long-lived task).
pub async fn run_connection(
    ctx: Arc<ConnectionContext>,
    mut socket: WebSocket,
    token: String,
    claims: TokenClaims,
    device_fingerprint: Option<String>,
) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let session_id = claims.jti.clone();
    let presence = ConnectionPresence::new(connection_id.clone(), claims.sub.clone(), session_id, ctx.instance_id.clone());

    if let Err(err) = ctx.bus.set_presence(&presence, PRESENCE_TTL).await {
        warn!(%connection_id, %err, "failed to record connection presence");
        close_with(&mut socket, close_code::INTERNAL_ERROR, "presence unavailable").await;
        return;
    }
    if let Err(err) = ctx.bus.add_user_connection(&claims.sub, &connection_id).await {
        warn!(%connection_id, %err, "failed to register user connection");
    }

    let rate_limiter = RateLimiter::new(ctx.bus.clone());
    let mut last_heartbeat = Utc::now();
    let mut inspection = tokio::time::interval(HEARTBEAT_INSPECTION_INTERVAL);
    let mut revalidation = tokio::time::interval(REVALIDATION_INTERVAL);
    let mut outbound = ctx.registry.register(connection_id.clone());

    let close = 'driver: loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_heartbeat = Utc::now();
                        if let Err(outcome) = handle_inbound(&ctx, &rate_limiter, &claims, &connection_id, &mut socket, &text).await {
                            break 'driver outcome;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break 'driver None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%connection_id, %err, "websocket read error");
                        break 'driver Some((close_code::INTERNAL_ERROR, "read error".to_string()));
                    }
                }
            }
            forwarded = outbound.recv() => {
                match forwarded {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break 'driver Some((close_code::INTERNAL_ERROR, "write error".to_string()));
                        }
                    }
                    None => {}
                }
            }
            _ = inspection.tick() => {
                if let Err(err) = ctx.bus.touch_presence_heartbeat(&connection_id, last_heartbeat).await {
                    warn!(%connection_id, %err, "failed to refresh presence heartbeat");
                }
                if Utc::now().signed_duration_since(last_heartbeat) > chrono::Duration::from_std(HEARTBEAT_MAX_AGE).unwrap() {
                    break 'driver Some((close_code::IDLE_OR_PRESENCE_LOST, "idle connection".to_string()));
                }
            }
            _ = revalidation.tick() => {
                match ctx.verifier.authenticate(&ctx.bus, &token, TokenType::Access, device_fingerprint.as_deref()).await {
                    Ok(_) => {}
                    Err(_) => break 'driver Some((close_code::SESSION_REVOKED, "session revoked".to_string())),
                }
            }
        }
    };

    ctx.registry.deregister(&connection_id);
    if let Err(err) = ctx.bus.remove_user_connection(&claims.sub, &connection_id).await {
        warn!(%connection_id, %err, "failed to deregister user connection");
    }
    if let Err(err) = ctx.bus.delete_presence(&connection_id).await {
        warn!(%connection_id, %err, "failed to clear presence on disconnect");
    }

    if let Some((code, reason)) = close {
        close_with(&mut socket, code, &reason).await;
    }
    info!(%connection_id, user = %claims.sub, "connection closed");
}

async fn handle_inbound(
    ctx: &ConnectionContext,
    rate_limiter: &RateLimiter,
    claims: &TokenClaims,
    connection_id: &str,
    socket: &mut WebSocket,
    text: &str,
) -> Result<(), Option<(u16, String)>> {
    let now_ms = Utc::now().timestamp_millis();
    match rate_limiter.check(&message_key(connection_id), RateLimit::MESSAGES, now_ms).await {
        Ok(crate::rate_limit::RateLimitOutcome::Exceeded) => {
            return Err(Some((close_code::RATE_LIMITED, "message rate exceeded".to_string())));
        }
        Ok(crate::rate_limit::RateLimitOutcome::Allowed) => {}
        Err(err) => {
            warn!(%connection_id, %err, "rate limiter bus error");
            return Err(Some((close_code::INTERNAL_ERROR, "bus unavailable".to_string())));
        }
    }

    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(err) => {
            send_json(socket, &ServerMessage::Error { detail: err.to_string() }).await;
            return Ok(());
        }
    };

    match message {
        ClientMessage::Heartbeat => {
            send_json(socket, &ServerMessage::HeartbeatAck { ts: Utc::now().timestamp() }).await;
        }
        ClientMessage::Subscribe { topic } => {
            if !is_topic_permitted(&topic, &claims.sub) {
                return Err(Some((close_code::UNAUTHORIZED, format!("topic {topic} forbidden"))));
            }
            let existing = match ctx.bus.subscriptions(&claims.sub).await {
                Ok(topics) => topics,
                Err(err) => {
                    warn!(%connection_id, %err, "bus unavailable while checking subscription count");
                    return Err(Some((close_code::INTERNAL_ERROR, "bus unavailable".to_string())));
                }
            };
            if !existing.contains(&topic) && existing.len() as u64 >= RateLimit::SUBSCRIPTIONS.max_events {
                return Err(Some((close_code::RATE_LIMITED, "subscription limit exceeded".to_string())));
            }
            if let Err(err) = ctx.bus.add_subscription(&claims.sub, &topic).await {
                warn!(%connection_id, %err, "failed to record subscription");
            }
            send_json(socket, &ServerMessage::Subscribed { topic: &topic }).await;
        }
        ClientMessage::Unsubscribe { topic } => {
            if let Err(err) = ctx.bus.remove_subscription(&claims.sub, &topic).await {
                warn!(%connection_id, %err, "failed to remove subscription");
            }
            send_json(socket, &ServerMessage::Unsubscribed { topic: &topic }).await;
        }
    }
    Ok(())
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage<'_>) {
    if let Ok(payload) = serde_json::to_string(message) {
        let _ = socket.send(Message::Text(payload)).await;
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
        .await;
}
