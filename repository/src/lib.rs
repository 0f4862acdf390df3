//! Durable, optimistically-concurrent storage for orders, trades,
//! positions and risk incidents — a Postgres-backed implementation for
//! production and an in-memory one for tests and local runs.
//!
//! Every write that can race (a status transition racing a fill
//! notification, a position update racing the monitor loop) goes through
//! `expected_version`: callers get `Ok(None)` back on a lost update rather
//! than silently clobbering a concurrent write.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod error;
mod memory;
mod postgres;
mod retry;
mod traits;

pub use error::RepositoryError;
pub use memory::InMemoryOrderRepository;
pub use postgres::{PgOrderRepository, PostgresConfig};
pub use retry::{with_retry, MAX_ATTEMPTS};
pub use traits::{AuditLogEntry, OrderRepository, OrderStatusUpdate};
