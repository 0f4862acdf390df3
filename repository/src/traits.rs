//! The repository surface every backing store (Postgres, in-memory)
//! implements identically.

use crate::error::RepositoryError;
use async_trait::async_trait;
use mtrader_types::{AccountId, Order, OrderId, OrderStatus, Position, PositionId, RiskIncident, Trade};
use serde_json::Value as JsonValue;

/// A single partial update applied by `UpdateOrderStatus`: the new status
/// plus whatever mutable fields changed alongside it (fill quantity,
/// rejection reason, broker fields, timestamps).
#[derive(Debug, Clone, Default)]
pub struct OrderStatusUpdate {
    pub filled_quantity: Option<rust_decimal::Decimal>,
    pub rejection_reason: Option<String>,
    pub broker_order_id: Option<mtrader_types::BrokerOrderId>,
    pub retcode: Option<i32>,
    pub retcode_message: Option<String>,
    pub opened_at: Option<chrono::DateTime<chrono::Utc>>,
    pub closed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// An immutable record of an out-of-band action, kept for later audit —
/// `SaveAuditLog` in spec §4.4.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub account_id: AccountId,
    pub action: String,
    pub detail: JsonValue,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Idempotent insert: a duplicate `client_order_id` returns the
    /// existing row without side effects.
    async fn save_order(&self, order: &Order) -> Result<Order, RepositoryError>;
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Full-row replace, used for fields outside the status transition
    /// surface (e.g. attaching a strategy id after the fact).
    async fn update_order(&self, order: &Order) -> Result<Order, RepositoryError>;

    /// Optimistic-locked status transition: reads the row's `version`,
    /// bumps it, writes conditional on the old value. Returns `Ok(None)`
    /// if no row matched the expected version (lost update).
    async fn update_order_status(
        &self,
        id: OrderId,
        expected_version: i64,
        status: OrderStatus,
        update: OrderStatusUpdate,
    ) -> Result<Option<Order>, RepositoryError>;

    async fn get_open_orders(&self, account_id: AccountId) -> Result<Vec<Order>, RepositoryError>;

    async fn save_trade(&self, trade: &Trade) -> Result<Trade, RepositoryError>;

    async fn get_position(&self, id: PositionId) -> Result<Option<Position>, RepositoryError>;
    async fn get_open_position(&self, account_id: AccountId, symbol: &str) -> Result<Option<Position>, RepositoryError>;
    async fn update_position(&self, position: &Position) -> Result<Position, RepositoryError>;
    async fn close_position(&self, id: PositionId, closed_at: chrono::DateTime<chrono::Utc>) -> Result<(), RepositoryError>;
    async fn get_open_positions(&self, account_id: AccountId) -> Result<Vec<Position>, RepositoryError>;

    async fn save_risk_incident(&self, incident: &RiskIncident) -> Result<(), RepositoryError>;
    async fn save_audit_log(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError>;
}
