//! Shared domain model for the order-execution pipeline: identifiers,
//! orders, positions, risk rules and incidents, and account snapshots.
//!
//! This crate has no I/O of its own — every downstream crate (connector,
//! risk, execution, repository, fanout) depends on it for a common
//! vocabulary so that, for example, the risk engine and the repository
//! agree on exactly what a `RiskIncident` looks like on the wire.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod account;
pub mod ids;
pub mod order;
pub mod position;
pub mod risk;
pub mod trade;

pub use account::AccountSnapshot;
pub use ids::{
    AccountId, BrokerOrderId, ClientOrderId, IncidentId, ModelId, OrderId, PositionId, StrategyId,
    TradeId,
};
pub use order::{InvalidStatusTransition, Order, OrderKind, OrderStatus, Side};
pub use position::Position;
pub use risk::{RiskAction, RiskIncident, RiskParameters, RiskRule, RiskRuleType, Severity, TradeApproval};
pub use trade::Trade;
