//! Pre-trade risk gates, a background position monitor, and the
//! process-global kill switch.
//!
//! [`RiskEngine`] is the stateless-per-call evaluator; it is handed its
//! collaborators ([`OrderCancelingCapability`], [`PositionClosingCapability`],
//! [`IncidentSink`], [`RiskEventBroadcaster`], [`Notifier`]) at construction
//! rather than depending on the crates that implement them, breaking the
//! cycle the kill switch would otherwise create between this crate and
//! `mtrader-execution`.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod capability;
mod context;
mod engine;
mod error;
mod monitor;
mod rules;

pub use capability::{
    IncidentSink, NoopCollaborators, Notifier, OrderCancelingCapability, PositionClosingCapability,
    RiskEventBroadcaster,
};
pub use context::{MarketSnapshot, PreTradeContext};
pub use engine::{default_rules, RiskEngine};
pub use error::RiskError;
pub use monitor::{spawn_position_monitor, MonitorFeed};
pub use rules::{evaluate, RuleOutcome};
