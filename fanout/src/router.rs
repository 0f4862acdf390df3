//! HTTP entrypoint: upgrades to a WebSocket after the accept-time checks in
//! spec §4.5 ("Connection lifecycle") — IP connection-count limit, then
//! bearer-token authentication — before handing the socket to
//! [`crate::connection::run_connection`].

use crate::broadcast::ConnectionRegistry;
use crate::connection::{run_connection, ConnectionContext};
use crate::error::close_code;
use crate::rate_limit::{ip_connection_key, RateLimit, RateLimiter};
use crate::token::{TokenType, TokenVerifier};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<ConnectionContext>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
    pub fingerprint: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| accept(socket, state, query, addr))
}

async fn accept(mut socket: WebSocket, state: AppState, query: ConnectQuery, addr: SocketAddr) {
    use axum::extract::ws::{CloseFrame, Message};

    let ip = addr.ip().to_string();
    let limiter = RateLimiter::new(state.connection.bus.clone());
    let now_ms = chrono::Utc::now().timestamp_millis();
    match limiter.check(&ip_connection_key(&ip), RateLimit::CONNECTIONS_PER_IP, now_ms).await {
        Ok(crate::rate_limit::RateLimitOutcome::Exceeded) => {
            reject(&mut socket, close_code::RATE_LIMITED, "too many connections from this address").await;
            return;
        }
        Ok(crate::rate_limit::RateLimitOutcome::Allowed) => {}
        Err(_) => {
            reject(&mut socket, close_code::INTERNAL_ERROR, "rate limiter unavailable").await;
            return;
        }
    }

    let Some(token) = query.token else {
        reject(&mut socket, close_code::UNAUTHORIZED, "missing token").await;
        return;
    };

    let claims = match state
        .connection
        .verifier
        .authenticate(&state.connection.bus, &token, TokenType::Access, query.fingerprint.as_deref())
        .await
    {
        Ok(claims) => claims,
        Err(_) => {
            reject(&mut socket, close_code::UNAUTHORIZED, "invalid token").await;
            return;
        }
    };

    run_connection(state.connection.clone(), socket, token, claims, query.fingerprint).await;

    async fn reject(socket: &mut WebSocket, code: u16, reason: &str) {
        let _ = socket
            .send(Message::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
            .await;
    }
}
