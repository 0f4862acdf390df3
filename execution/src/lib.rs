//! Order state machine orchestration: risk check, broker submit,
//! persistence and lifecycle events.
//!
//! [`ExecutionEngine`] is the only component allowed to drive an
//! [`mtrader_types::Order`]'s status — everything else (HTTP handlers,
//! fill callbacks, the risk engine's kill switch) goes through its
//! `submit`/`cancel`/`update_status` surface so the transition matrix in
//! `mtrader_types::OrderStatus` stays the single source of truth.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod engine;
mod error;
pub mod events;
mod reconciliation;

pub use engine::ExecutionEngine;
pub use error::ExecutionError;
pub use events::{EventBus, EventKind, ExecutionEvent, Handler};
pub use reconciliation::spawn_reconciliation;
