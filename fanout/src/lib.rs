//! Real-time fan-out layer: distributed WebSocket presence, topic routing
//! and rate limiting over a shared key-value bus (spec §4.5).
//!
//! The bus abstraction ([`bus::SharedBus`]) is what lets a single-instance
//! deployment run on [`bus::InMemorySharedBus`] while a cluster deployment
//! backs the same contract with Redis — every other module in this crate
//! (ACL, rate limiting, token revocation, broadcast) is written against the
//! trait, never against a concrete backend.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod acl;
pub mod broadcast;
pub mod bus;
pub mod connection;
pub mod error;
pub mod presence;
pub mod rate_limit;
pub mod redis_bus;
pub mod router;
pub mod token;

pub use bus::{BroadcastMessage, InMemorySharedBus, SharedBus};
pub use connection::{run_connection, ConnectionContext};
pub use error::{close_code, FanoutError, TokenError};
pub use presence::ConnectionPresence;
pub use router::{router, AppState};
pub use token::{TokenClaims, TokenType, TokenVerifier};
