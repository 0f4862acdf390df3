//! In-process repository backing tests and the facade's default run mode
//! — no external database required.

use crate::error::RepositoryError;
use crate::traits::{AuditLogEntry, OrderRepository, OrderStatusUpdate};
use async_trait::async_trait;
use dashmap::DashMap;
use mtrader_types::{AccountId, ClientOrderId, Order, OrderId, OrderStatus, Position, PositionId, RiskIncident, Trade};
use parking_lot::Mutex;

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<OrderId, Order>,
    orders_by_client_id: DashMap<ClientOrderId, OrderId>,
    positions: DashMap<PositionId, Position>,
    trades: Mutex<Vec<Trade>>,
    incidents: Mutex<Vec<RiskIncident>>,
    audit_log: Mutex<Vec<AuditLogEntry>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay hook for `mtrader-connector::BrokerConnector::rebuild_idempotency`
    /// at process startup.
    pub fn known_client_order_ids(&self) -> Vec<(ClientOrderId, mtrader_types::BrokerOrderId)> {
        self.orders
            .iter()
            .filter_map(|entry| entry.value().broker_order_id.map(|bid| (entry.key().clone(), bid)))
            .collect()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save_order(&self, order: &Order) -> Result<Order, RepositoryError> {
        if let Some(existing_id) = self.orders_by_client_id.get(&order.client_order_id) {
            if let Some(existing) = self.orders.get(&existing_id) {
                return Ok(existing.clone());
            }
        }
        self.orders_by_client_id.insert(order.client_order_id.clone(), order.id);
        self.orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn update_order(&self, order: &Order) -> Result<Order, RepositoryError> {
        self.orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        expected_version: i64,
        status: OrderStatus,
        update: OrderStatusUpdate,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut entry = match self.orders.get_mut(&id) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.version != expected_version {
            return Ok(None);
        }
        entry
            .transition_to(status)
            .map_err(|err| RepositoryError::Storage(err.to_string()))?;
        if let Some(qty) = update.filled_quantity {
            entry.filled_quantity = qty;
        }
        if let Some(reason) = update.rejection_reason {
            entry.rejection_reason = Some(reason);
        }
        if let Some(broker_id) = update.broker_order_id {
            entry.broker_order_id = Some(broker_id);
        }
        if let Some(retcode) = update.retcode {
            entry.retcode = Some(retcode);
        }
        if let Some(message) = update.retcode_message {
            entry.retcode_message = Some(message);
        }
        if let Some(opened_at) = update.opened_at {
            entry.opened_at = Some(opened_at);
        }
        if let Some(closed_at) = update.closed_at {
            entry.closed_at = Some(closed_at);
        }
        entry.version += 1;
        Ok(Some(entry.clone()))
    }

    async fn get_open_orders(&self, account_id: AccountId) -> Result<Vec<Order>, RepositoryError> {
        Ok(self
            .orders
            .iter()
            .filter(|e| e.account_id == account_id && e.status.is_open())
            .map(|e| e.clone())
            .collect())
    }

    async fn save_trade(&self, trade: &Trade) -> Result<Trade, RepositoryError> {
        self.trades.lock().push(trade.clone());
        Ok(trade.clone())
    }

    async fn get_position(&self, id: PositionId) -> Result<Option<Position>, RepositoryError> {
        Ok(self.positions.get(&id).map(|p| p.clone()))
    }

    async fn get_open_position(&self, account_id: AccountId, symbol: &str) -> Result<Option<Position>, RepositoryError> {
        Ok(self
            .positions
            .iter()
            .find(|e| e.account_id == account_id && e.symbol == symbol && e.is_open())
            .map(|e| e.clone()))
    }

    async fn update_position(&self, position: &Position) -> Result<Position, RepositoryError> {
        self.positions.insert(position.id, position.clone());
        Ok(position.clone())
    }

    async fn close_position(&self, id: PositionId, closed_at: chrono::DateTime<chrono::Utc>) -> Result<(), RepositoryError> {
        match self.positions.get_mut(&id) {
            Some(mut entry) => {
                entry.closed_at = Some(closed_at);
                Ok(())
            }
            None => Err(RepositoryError::PositionNotFound),
        }
    }

    async fn get_open_positions(&self, account_id: AccountId) -> Result<Vec<Position>, RepositoryError> {
        Ok(self
            .positions
            .iter()
            .filter(|e| e.account_id == account_id && e.is_open())
            .map(|e| e.clone())
            .collect())
    }

    async fn save_risk_incident(&self, incident: &RiskIncident) -> Result<(), RepositoryError> {
        self.incidents.lock().push(incident.clone());
        Ok(())
    }

    async fn save_audit_log(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        self.audit_log.lock().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtrader_types::{AccountId, OrderKind, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn sample_order(client_id: &str) -> Order {
        Order::new(
            ClientOrderId::new(client_id),
            AccountId(Uuid::new_v4()),
            "EURUSD",
            Side::Buy,
            OrderKind::Market,
            dec!(0.1),
        )
    }

    #[tokio::test]
    async fn save_order_is_idempotent_on_client_order_id() {
        let repo = InMemoryOrderRepository::new();
        let order = sample_order("dup-1");
        let first = repo.save_order(&order).await.unwrap();
        let mut resubmitted = order.clone();
        resubmitted.id = OrderId::new(); // different internal id, same client id
        let second = repo.save_order(&resubmitted).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn update_order_status_rejects_stale_version() {
        let repo = InMemoryOrderRepository::new();
        let order = sample_order("stale-1");
        repo.save_order(&order).await.unwrap();
        let result = repo
            .update_order_status(order.id, order.version + 1, OrderStatus::Validated, OrderStatusUpdate::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn update_order_status_bumps_version_on_success() {
        let repo = InMemoryOrderRepository::new();
        let order = sample_order("ok-1");
        repo.save_order(&order).await.unwrap();
        let updated = repo
            .update_order_status(order.id, order.version, OrderStatus::Validated, OrderStatusUpdate::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, order.version + 1);
        assert_eq!(updated.status, OrderStatus::Validated);
    }
}
