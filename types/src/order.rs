//! Order aggregate and its status state machine.
//!
//! The transition matrix below is authoritative: [`OrderStatus::validate_transition`]
//! is the single place that decides whether a status change is legal. Nothing
//! outside this module may mutate `Order::status` directly in a conforming
//! implementation of the pipeline.

use crate::ids::{AccountId, BrokerOrderId, ClientOrderId, ModelId, OrderId, StrategyId};
use chrono::{DateTime, Utc};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order side.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Display)]
pub enum Side {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Display)]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Order lifecycle status.
///
/// ```text
/// PENDING    -> {VALIDATED, REJECTED, CANCELED}
/// VALIDATED  -> {SUBMITTED, REJECTED, CANCELED}
/// SUBMITTED  -> {PARTIAL, FILLED, REJECTED, CANCELED, EXPIRED}
/// PARTIAL    -> {FILLED, CANCELED, REJECTED, EXPIRED}
/// FILLED, REJECTED, CANCELED, EXPIRED are terminal.
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Display)]
pub enum OrderStatus {
    Pending,
    Validated,
    Submitted,
    Partial,
    Filled,
    Rejected,
    Canceled,
    Expired,
}

impl OrderStatus {
    /// Statuses reachable in one hop from `self`.
    pub fn allowed_next(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Validated, Rejected, Canceled],
            Validated => &[Submitted, Rejected, Canceled],
            Submitted => &[Partial, Filled, Rejected, Canceled, Expired],
            Partial => &[Filled, Canceled, Rejected, Expired],
            Filled | Rejected | Canceled | Expired => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Orders in these statuses still have an open lifecycle: repository
    /// callers use this to build `GetOpenOrders`.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Validated | OrderStatus::Submitted | OrderStatus::Partial
        )
    }

    /// Returns `Ok(())` iff transitioning from `self` to `next` is legal.
    /// A no-op transition (`self == next`) is accepted so that field-only
    /// updates can reuse the same entry point.
    pub fn validate_transition(self, next: OrderStatus) -> Result<(), InvalidStatusTransition> {
        if self == next || self.allowed_next().contains(&next) {
            Ok(())
        } else {
            Err(InvalidStatusTransition { from: self, to: next })
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct InvalidStatusTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Client order as it flows through the execution pipeline.
///
/// `0 <= filled_quantity <= quantity` and, once `status.is_terminal()`, no
/// field on this struct may be mutated further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_order_id: ClientOrderId,
    pub account_id: AccountId,
    pub strategy_id: Option<StrategyId>,
    pub model_id: Option<ModelId>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderKind,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub rejection_reason: Option<String>,
    pub commission: Decimal,
    pub swap: Decimal,
    pub profit: Decimal,
    pub broker_order_id: Option<BrokerOrderId>,
    pub retcode: Option<i32>,
    pub retcode_message: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Order {
    /// Builds a brand-new order in `PENDING`, as created by the caller.
    pub fn new(
        client_order_id: ClientOrderId,
        account_id: AccountId,
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderKind,
        quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            client_order_id,
            account_id,
            strategy_id: None,
            model_id: None,
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            filled_quantity: Decimal::ZERO,
            price: None,
            stop_price: None,
            limit_price: None,
            status: OrderStatus::Pending,
            rejection_reason: None,
            commission: Decimal::ZERO,
            swap: Decimal::ZERO,
            profit: Decimal::ZERO,
            broker_order_id: None,
            retcode: None,
            retcode_message: None,
            opened_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Applies a validated status transition, bumping `updated_at`. Does not
    /// touch `version` — that is the repository's responsibility under
    /// optimistic concurrency.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), InvalidStatusTransition> {
        self.status.validate_transition(next)?;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_allows_validated_rejected_canceled_only() {
        let allowed = OrderStatus::Pending.allowed_next();
        assert!(allowed.contains(&OrderStatus::Validated));
        assert!(allowed.contains(&OrderStatus::Rejected));
        assert!(allowed.contains(&OrderStatus::Canceled));
        assert!(!allowed.contains(&OrderStatus::Filled));
        assert!(!allowed.contains(&OrderStatus::Submitted));
    }

    #[test]
    fn terminal_statuses_accept_nothing() {
        for status in [
            OrderStatus::Filled,
            OrderStatus::Rejected,
            OrderStatus::Canceled,
            OrderStatus::Expired,
        ] {
            assert!(status.is_terminal());
            assert!(status.validate_transition(OrderStatus::Pending).is_err());
        }
    }

    #[test]
    fn full_lifecycle_submit_to_fill() {
        let mut order = Order::new(
            ClientOrderId::new("abc-1"),
            AccountId(uuid::Uuid::new_v4()),
            "EURUSD",
            Side::Buy,
            OrderKind::Market,
            Decimal::new(1, 1),
        );
        order.transition_to(OrderStatus::Validated).unwrap();
        order.transition_to(OrderStatus::Submitted).unwrap();
        order.transition_to(OrderStatus::Filled).unwrap();
        assert!(order.status.is_terminal());
    }

    #[test]
    fn rejects_invalid_jump_from_pending_to_filled() {
        let mut order = Order::new(
            ClientOrderId::new("abc-2"),
            AccountId(uuid::Uuid::new_v4()),
            "EURUSD",
            Side::Buy,
            OrderKind::Market,
            Decimal::new(1, 1),
        );
        let err = order.transition_to(OrderStatus::Filled).unwrap_err();
        assert_eq!(err.from, OrderStatus::Pending);
        assert_eq!(err.to, OrderStatus::Filled);
    }
}
