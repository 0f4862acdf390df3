//! Postgres-backed [`OrderRepository`], grounded on
//! `original_source/trading_service/src/storage/postgres_repository.py`:
//! a connection pool, optimistic-locked updates via a conditional
//! `UPDATE ... WHERE version = $expected`, and every round trip wrapped in
//! [`crate::retry::with_retry`].
//!
//! Queries use the runtime `sqlx::query`/`query_as` functions rather than
//! the compile-time-checked `query!` macros: this workspace has no live
//! database to verify against at build time.

use crate::error::RepositoryError;
use crate::retry::with_retry;
use crate::traits::{AuditLogEntry, OrderRepository, OrderStatusUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mtrader_types::{
    AccountId, BrokerOrderId, Order, OrderId, OrderKind, OrderStatus, Position, PositionId, RiskIncident, Side, Trade,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Pool bounds and statement timeout from spec §5: small pool, bounded
/// command latency so a stuck connection cannot wedge the execution
/// pipeline indefinitely.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub command_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            min_connections: 2,
            max_connections: 20,
            command_timeout: Duration::from_secs(30),
        }
    }
}

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.command_timeout)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order, RepositoryError> {
        let side: String = row.try_get("side")?;
        let order_type: String = row.try_get("order_type")?;
        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId(row.try_get("id")?),
            client_order_id: mtrader_types::ClientOrderId::new(row.try_get::<String, _>("client_order_id")?),
            account_id: AccountId(row.try_get("account_id")?),
            strategy_id: row
                .try_get::<Option<String>, _>("strategy_id")?
                .map(mtrader_types::StrategyId::new),
            model_id: row
                .try_get::<Option<String>, _>("model_id")?
                .map(mtrader_types::ModelId::new),
            symbol: row.try_get("symbol")?,
            side: parse_side(&side)?,
            order_type: parse_order_kind(&order_type)?,
            quantity: row.try_get("quantity")?,
            filled_quantity: row.try_get("filled_quantity")?,
            price: row.try_get("price")?,
            stop_price: row.try_get("stop_price")?,
            limit_price: row.try_get("limit_price")?,
            status: parse_status(&status)?,
            rejection_reason: row.try_get("rejection_reason")?,
            commission: row.try_get("commission")?,
            swap: row.try_get("swap")?,
            profit: row.try_get("profit")?,
            broker_order_id: row.try_get::<Option<i64>, _>("broker_order_id")?.map(BrokerOrderId),
            retcode: row.try_get("retcode")?,
            retcode_message: row.try_get("retcode_message")?,
            opened_at: row.try_get("opened_at")?,
            closed_at: row.try_get("closed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }

    fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position, RepositoryError> {
        let side: String = row.try_get("side")?;
        Ok(Position {
            id: PositionId(row.try_get("id")?),
            account_id: AccountId(row.try_get("account_id")?),
            symbol: row.try_get("symbol")?,
            side: parse_side(&side)?,
            quantity: row.try_get("quantity")?,
            entry_price: row.try_get("entry_price")?,
            current_price: row.try_get("current_price")?,
            unrealized_pnl: row.try_get("unrealized_pnl")?,
            realized_pnl: row.try_get("realized_pnl")?,
            opened_at: row.try_get("opened_at")?,
            closed_at: row.try_get("closed_at")?,
            version: row.try_get("version")?,
        })
    }
}

fn parse_side(raw: &str) -> Result<Side, RepositoryError> {
    match raw {
        "Buy" => Ok(Side::Buy),
        "Sell" => Ok(Side::Sell),
        other => Err(RepositoryError::Storage(format!("unknown side in storage: {other}"))),
    }
}

fn parse_order_kind(raw: &str) -> Result<OrderKind, RepositoryError> {
    match raw {
        "Market" => Ok(OrderKind::Market),
        "Limit" => Ok(OrderKind::Limit),
        "Stop" => Ok(OrderKind::Stop),
        "StopLimit" => Ok(OrderKind::StopLimit),
        other => Err(RepositoryError::Storage(format!("unknown order_type in storage: {other}"))),
    }
}

fn risk_action_to_str(action: &mtrader_types::RiskAction) -> &'static str {
    use mtrader_types::RiskAction::*;
    match action {
        Reject => "Reject",
        Warning => "Warning",
        KillSwitchEngaged => "KillSwitchEngaged",
        PositionReduced => "PositionReduced",
        KillSwitchReleased => "KillSwitchReleased",
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus, RepositoryError> {
    match raw {
        "Pending" => Ok(OrderStatus::Pending),
        "Validated" => Ok(OrderStatus::Validated),
        "Submitted" => Ok(OrderStatus::Submitted),
        "Partial" => Ok(OrderStatus::Partial),
        "Filled" => Ok(OrderStatus::Filled),
        "Rejected" => Ok(OrderStatus::Rejected),
        "Canceled" => Ok(OrderStatus::Canceled),
        "Expired" => Ok(OrderStatus::Expired),
        other => Err(RepositoryError::Storage(format!("unknown status in storage: {other}"))),
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn save_order(&self, order: &Order) -> Result<Order, RepositoryError> {
        with_retry(|| async {
            let row = sqlx::query(
                r#"
                INSERT INTO orders (
                    id, client_order_id, account_id, strategy_id, model_id, symbol, side,
                    order_type, quantity, filled_quantity, price, stop_price, limit_price,
                    status, rejection_reason, commission, swap, profit, broker_order_id,
                    retcode, retcode_message, opened_at, closed_at, created_at, updated_at, version
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25,$26)
                ON CONFLICT (client_order_id) DO UPDATE SET client_order_id = EXCLUDED.client_order_id
                RETURNING *
                "#,
            )
            .bind(order.id.0)
            .bind(order.client_order_id.as_str())
            .bind(order.account_id.0)
            .bind(order.strategy_id.as_ref().map(|s| s.0.clone()))
            .bind(order.model_id.as_ref().map(|m| m.0.clone()))
            .bind(&order.symbol)
            .bind(order.side.to_string())
            .bind(order.order_type.to_string())
            .bind(order.quantity)
            .bind(order.filled_quantity)
            .bind(order.price)
            .bind(order.stop_price)
            .bind(order.limit_price)
            .bind(order.status.to_string())
            .bind(&order.rejection_reason)
            .bind(order.commission)
            .bind(order.swap)
            .bind(order.profit)
            .bind(order.broker_order_id.map(|b| b.0))
            .bind(order.retcode)
            .bind(&order.retcode_message)
            .bind(order.opened_at)
            .bind(order.closed_at)
            .bind(order.created_at)
            .bind(order.updated_at)
            .bind(order.version)
            .fetch_one(&self.pool)
            .await?;
            Self::row_to_order(&row)
        })
        .await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        with_retry(|| async {
            let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(Self::row_to_order).transpose()
        })
        .await
    }

    async fn update_order(&self, order: &Order) -> Result<Order, RepositoryError> {
        with_retry(|| async {
            let row = sqlx::query(
                r#"
                UPDATE orders SET
                    strategy_id = $2, model_id = $3, price = $4, stop_price = $5,
                    limit_price = $6, rejection_reason = $7, commission = $8, swap = $9,
                    profit = $10, broker_order_id = $11, retcode = $12, retcode_message = $13,
                    opened_at = $14, closed_at = $15, updated_at = now()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(order.id.0)
            .bind(order.strategy_id.as_ref().map(|s| s.0.clone()))
            .bind(order.model_id.as_ref().map(|m| m.0.clone()))
            .bind(order.price)
            .bind(order.stop_price)
            .bind(order.limit_price)
            .bind(&order.rejection_reason)
            .bind(order.commission)
            .bind(order.swap)
            .bind(order.profit)
            .bind(order.broker_order_id.map(|b| b.0))
            .bind(order.retcode)
            .bind(&order.retcode_message)
            .bind(order.opened_at)
            .bind(order.closed_at)
            .fetch_one(&self.pool)
            .await?;
            Self::row_to_order(&row)
        })
        .await
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        expected_version: i64,
        status: OrderStatus,
        update: OrderStatusUpdate,
    ) -> Result<Option<Order>, RepositoryError> {
        with_retry(|| async {
            let row = sqlx::query(
                r#"
                UPDATE orders SET
                    status = $1,
                    filled_quantity = COALESCE($2, filled_quantity),
                    rejection_reason = COALESCE($3, rejection_reason),
                    broker_order_id = COALESCE($4, broker_order_id),
                    retcode = COALESCE($5, retcode),
                    retcode_message = COALESCE($6, retcode_message),
                    opened_at = COALESCE($7, opened_at),
                    closed_at = COALESCE($8, closed_at),
                    version = version + 1,
                    updated_at = now()
                WHERE id = $9 AND version = $10
                RETURNING *
                "#,
            )
            .bind(status.to_string())
            .bind(update.filled_quantity)
            .bind(update.rejection_reason.clone())
            .bind(update.broker_order_id.map(|b| b.0))
            .bind(update.retcode)
            .bind(update.retcode_message.clone())
            .bind(update.opened_at)
            .bind(update.closed_at)
            .bind(id.0)
            .bind(expected_version)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(Self::row_to_order).transpose()
        })
        .await
    }

    async fn get_open_orders(&self, account_id: AccountId) -> Result<Vec<Order>, RepositoryError> {
        with_retry(|| async {
            let rows = sqlx::query(
                "SELECT * FROM orders WHERE account_id = $1 AND status IN ('Pending','Validated','Submitted','Partial')",
            )
            .bind(account_id.0)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(Self::row_to_order).collect()
        })
        .await
    }

    async fn save_trade(&self, trade: &Trade) -> Result<Trade, RepositoryError> {
        with_retry(|| async {
            sqlx::query(
                r#"
                INSERT INTO trades (id, order_id, account_id, symbol, side, quantity, price, commission, executed_at)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                "#,
            )
            .bind(trade.id.0)
            .bind(trade.order_id.0)
            .bind(trade.account_id.0)
            .bind(&trade.symbol)
            .bind(trade.side.to_string())
            .bind(trade.quantity)
            .bind(trade.price)
            .bind(trade.commission)
            .bind(trade.executed_at)
            .execute(&self.pool)
            .await?;
            Ok(trade.clone())
        })
        .await
    }

    async fn get_position(&self, id: PositionId) -> Result<Option<Position>, RepositoryError> {
        with_retry(|| async {
            let row = sqlx::query("SELECT * FROM positions WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(Self::row_to_position).transpose()
        })
        .await
    }

    async fn get_open_position(&self, account_id: AccountId, symbol: &str) -> Result<Option<Position>, RepositoryError> {
        with_retry(|| async {
            let row = sqlx::query(
                "SELECT * FROM positions WHERE account_id = $1 AND symbol = $2 AND closed_at IS NULL",
            )
            .bind(account_id.0)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(Self::row_to_position).transpose()
        })
        .await
    }

    async fn update_position(&self, position: &Position) -> Result<Position, RepositoryError> {
        with_retry(|| async {
            let row = sqlx::query(
                r#"
                INSERT INTO positions (
                    id, account_id, symbol, side, quantity, entry_price, current_price,
                    unrealized_pnl, realized_pnl, opened_at, closed_at, version
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
                ON CONFLICT (id) DO UPDATE SET
                    quantity = EXCLUDED.quantity,
                    current_price = EXCLUDED.current_price,
                    unrealized_pnl = EXCLUDED.unrealized_pnl,
                    realized_pnl = EXCLUDED.realized_pnl,
                    closed_at = EXCLUDED.closed_at,
                    version = positions.version + 1
                RETURNING *
                "#,
            )
            .bind(position.id.0)
            .bind(position.account_id.0)
            .bind(&position.symbol)
            .bind(position.side.to_string())
            .bind(position.quantity)
            .bind(position.entry_price)
            .bind(position.current_price)
            .bind(position.unrealized_pnl)
            .bind(position.realized_pnl)
            .bind(position.opened_at)
            .bind(position.closed_at)
            .bind(position.version)
            .fetch_one(&self.pool)
            .await?;
            Self::row_to_position(&row)
        })
        .await
    }

    async fn close_position(&self, id: PositionId, closed_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        with_retry(|| async {
            let result = sqlx::query("UPDATE positions SET closed_at = $2, version = version + 1 WHERE id = $1")
                .bind(id.0)
                .bind(closed_at)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                Err(RepositoryError::PositionNotFound)
            } else {
                Ok(())
            }
        })
        .await
    }

    async fn get_open_positions(&self, account_id: AccountId) -> Result<Vec<Position>, RepositoryError> {
        with_retry(|| async {
            let rows = sqlx::query("SELECT * FROM positions WHERE account_id = $1 AND closed_at IS NULL")
                .bind(account_id.0)
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(Self::row_to_position).collect()
        })
        .await
    }

    async fn save_risk_incident(&self, incident: &RiskIncident) -> Result<(), RepositoryError> {
        with_retry(|| async {
            sqlx::query(
                r#"
                INSERT INTO risk_incidents (
                    id, account_id, order_id, rule_type, parameters, observed_values,
                    action_taken, severity, triggered_by, created_at
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
                "#,
            )
            .bind(incident.id.0)
            .bind(incident.account_id.0)
            .bind(incident.order_id.map(|o| o.0))
            .bind(incident.rule_type.map(|r| r.to_string()))
            .bind(serde_json::to_value(&incident.parameters).unwrap_or_default())
            .bind(serde_json::to_value(&incident.observed_values).unwrap_or_default())
            .bind(risk_action_to_str(&incident.action_taken))
            .bind(&incident.severity)
            .bind(&incident.triggered_by)
            .bind(incident.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn save_audit_log(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        with_retry(|| async {
            sqlx::query("INSERT INTO audit_log (account_id, action, detail, recorded_at) VALUES ($1,$2,$3,$4)")
                .bind(entry.account_id.0)
                .bind(&entry.action)
                .bind(&entry.detail)
                .bind(entry.recorded_at)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_order_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Validated,
            OrderStatus::Submitted,
            OrderStatus::Partial,
            OrderStatus::Filled,
            OrderStatus::Rejected,
            OrderStatus::Canceled,
            OrderStatus::Expired,
        ] {
            assert_eq!(parse_status(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn rejects_unknown_side_string() {
        assert!(parse_side("Flat").is_err());
    }
}
