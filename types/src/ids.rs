//! Opaque identifiers used across the order-execution pipeline.
//!
//! Every id is a thin newtype so that, for example, an [`AccountId`] can
//! never be passed where an [`OrderId`] is expected.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal order identifier, opaque to callers.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-chosen identifier, unique globally, establishing end-to-end
/// idempotency between the client, the repository and the broker.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct ClientOrderId(pub String);

impl ClientOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier assigned by the upstream execution venue.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct BrokerOrderId(pub i64);

/// Account ownership reference.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct AccountId(pub Uuid);

/// Optional strategy reference carried by an order.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct StrategyId(pub String);

/// Optional model reference carried by an order.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct ModelId(pub String);

/// Position identifier, scoped to (account, symbol).
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct PositionId(pub Uuid);

impl PositionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Trade (fill) identifier.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct TradeId(pub Uuid);

impl TradeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TradeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Risk incident identifier.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display, From,
)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}
