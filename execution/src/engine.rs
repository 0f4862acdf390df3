//! `ExecutionEngine` — orchestrates risk check, broker submit and
//! persistence, and owns the order lifecycle events.

use crate::events::{EventBus, EventKind};
use crate::ExecutionError;
use async_trait::async_trait;
use chrono::Utc;
use mtrader_connector::BrokerBackend;
use mtrader_connector::BrokerConnector;
use mtrader_repository::{OrderRepository, OrderStatusUpdate};
use mtrader_risk::{OrderCancelingCapability, PreTradeContext, RiskEngine};
use mtrader_types::{AccountId, BrokerOrderId, Order, OrderId, OrderStatus};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Orchestrates a single order's lifecycle from `PENDING` through its
/// terminal state. `Submit` is serialized per-engine-instance by
/// `submit_lock` so the precondition read and the first transition are
/// atomic (spec §4.3 "Serialization guarantee"); coordination across
/// instances is left to the repository's optimistic version.
pub struct ExecutionEngine<B: BrokerBackend + 'static> {
    connector: Arc<BrokerConnector<B>>,
    risk: Arc<RiskEngine>,
    repository: Arc<dyn OrderRepository>,
    events: Arc<EventBus>,
    submit_lock: Mutex<()>,
}

impl<B: BrokerBackend + 'static> ExecutionEngine<B> {
    pub fn new(
        connector: Arc<BrokerConnector<B>>,
        risk: Arc<RiskEngine>,
        repository: Arc<dyn OrderRepository>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            connector,
            risk,
            repository,
            events,
            submit_lock: Mutex::new(()),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Exposed for the reconciliation loop, which re-queries the broker
    /// directly rather than going through `submit`'s state-machine guard.
    pub fn connector(&self) -> &Arc<BrokerConnector<B>> {
        &self.connector
    }

    /// `Submit(order)` (spec §4.3). `order` must arrive in `PENDING` — the
    /// caller (an HTTP handler, out of scope) is responsible for
    /// constructing it that way.
    pub async fn submit(&self, order: Order) -> Result<Order, ExecutionError> {
        let _guard = self.submit_lock.lock().await;

        // Idempotent insert: a resubmit with the same `client_order_id`
        // returns the row already on file, possibly well past PENDING.
        let mut order = self.repository.save_order(&order).await?;
        self.events.emit(EventKind::OrderCreated, order.clone()).await;

        if order.status != OrderStatus::Pending {
            return Ok(order);
        }

        if order.quantity <= Decimal::ZERO {
            return self.reject(order, "quantity must be positive".to_string()).await;
        }

        let account = match self.connector.account_info().await {
            Ok(account) => account,
            Err(err) => {
                warn!(%err, order_id = %order.id, "broker unavailable fetching account info");
                return self.reject(order, "broker unavailable".to_string()).await;
            }
        };
        let positions = match self.connector.positions(&order.symbol).await {
            Ok(positions) => positions,
            Err(err) => {
                warn!(%err, order_id = %order.id, "broker unavailable fetching positions");
                return self.reject(order, "broker unavailable".to_string()).await;
            }
        };

        let ctx = PreTradeContext {
            order: &order,
            account: &account,
            positions: &positions,
            market: None,
            now: Utc::now(),
            last_trade_at: self.risk.last_trade_at(order.account_id),
            daily_loss: Decimal::ZERO,
        };
        let approval = self.risk.pre_trade_check(ctx).await;
        if !approval.approved {
            let reason = approval.reason.unwrap_or_else(|| "risk check failed".to_string());
            return self.reject(order, reason).await;
        }

        order = self
            .apply_transition(&order, OrderStatus::Validated, OrderStatusUpdate::default())
            .await?;

        let outcome = match self.connector.execute_order(&order).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, order_id = %order.id, "broker unavailable executing order");
                return self.reject(order, "broker unavailable".to_string()).await;
            }
        };

        if !outcome.ok {
            let reason = outcome.error.unwrap_or_else(|| "broker rejected order".to_string());
            return self.reject(order, reason).await;
        }

        let submit_update = OrderStatusUpdate {
            broker_order_id: outcome.broker_order_id.map(BrokerOrderId),
            retcode: outcome.retcode,
            retcode_message: outcome.retcode_message.clone(),
            opened_at: Some(Utc::now()),
            ..Default::default()
        };
        order = self.apply_transition(&order, OrderStatus::Submitted, submit_update).await?;

        if outcome.deal.is_some() {
            let fill_update = OrderStatusUpdate {
                filled_quantity: Some(order.quantity),
                closed_at: Some(Utc::now()),
                ..Default::default()
            };
            order = self.apply_transition(&order, OrderStatus::Filled, fill_update).await?;
        }

        Ok(order)
    }

    /// `Cancel(order_id)`: legal only from the still-open statuses.
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, ExecutionError> {
        let order = self
            .repository
            .get_order(order_id)
            .await?
            .ok_or(ExecutionError::OrderNotFound(order_id))?;

        order.status.validate_transition(OrderStatus::Canceled)?;

        if let Some(broker_order_id) = order.broker_order_id {
            if let Err(err) = self.connector.cancel_order(broker_order_id.0).await {
                warn!(%err, order_id = %order.id, "broker cancel failed, canceling locally anyway");
            }
        }

        self.apply_transition(&order, OrderStatus::Canceled, OrderStatusUpdate::default())
            .await
    }

    /// `UpdateStatus(order_id, new_status, **fields)` (spec §4.3), exposed
    /// for fill callbacks the connector delivers out of band.
    pub async fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        update: OrderStatusUpdate,
    ) -> Result<Order, ExecutionError> {
        let order = self
            .repository
            .get_order(order_id)
            .await?
            .ok_or(ExecutionError::OrderNotFound(order_id))?;
        self.apply_transition(&order, new_status, update).await
    }

    async fn reject(&self, order: Order, reason: String) -> Result<Order, ExecutionError> {
        let update = OrderStatusUpdate {
            rejection_reason: Some(reason),
            ..Default::default()
        };
        self.apply_transition(&order, OrderStatus::Rejected, update).await
    }

    /// Validates and performs one transition, persists it under optimistic
    /// concurrency, and emits `order_updated` plus the terminal-specific
    /// event (`order_filled` / `order_rejected` / `order_canceled`).
    async fn apply_transition(
        &self,
        order: &Order,
        next: OrderStatus,
        update: OrderStatusUpdate,
    ) -> Result<Order, ExecutionError> {
        order.status.validate_transition(next)?;
        let updated = self
            .repository
            .update_order_status(order.id, order.version, next, update)
            .await?
            .ok_or(ExecutionError::LostUpdate(order.id))?;
        self.events.emit(EventKind::OrderUpdated, updated.clone()).await;
        match next {
            OrderStatus::Filled => self.events.emit(EventKind::OrderFilled, updated.clone()).await,
            OrderStatus::Rejected => self.events.emit(EventKind::OrderRejected, updated.clone()).await,
            OrderStatus::Canceled => self.events.emit(EventKind::OrderCanceled, updated.clone()).await,
            _ => {}
        }
        Ok(updated)
    }
}

/// Supplied to [`mtrader_risk::RiskEngine`] at construction so the kill
/// switch can cancel every open order for an account without the risk
/// crate depending on this one (design note §9 breaks the Execution
/// Engine ↔ Risk Engine cycle this way).
#[async_trait]
impl<B: BrokerBackend + 'static> OrderCancelingCapability for ExecutionEngine<B> {
    async fn cancel_all_orders(&self, account_id: AccountId) -> Result<(), String> {
        let open_orders = self
            .repository
            .get_open_orders(account_id)
            .await
            .map_err(|err| err.to_string())?;
        for order in open_orders {
            if let Err(err) = self.cancel(order.id).await {
                warn!(order_id = %order.id, %err, "failed to cancel order during kill switch sweep");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtrader_connector::{BrokerCredentials, ConnectorConfig, SimulatedBroker};
    use mtrader_repository::InMemoryOrderRepository;
    use mtrader_risk::NoopCollaborators;
    use mtrader_types::{ClientOrderId, OrderKind, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    async fn engine() -> ExecutionEngine<SimulatedBroker> {
        let connector = Arc::new(BrokerConnector::new(
            SimulatedBroker::new(),
            BrokerCredentials {
                login: "demo".into(),
                password: "demo".into(),
                server: "demo".into(),
            },
            ConnectorConfig::default(),
        ));
        connector.connect().await.unwrap();
        let noop = Arc::new(NoopCollaborators);
        let risk = Arc::new(RiskEngine::new(noop.clone(), noop.clone(), noop.clone(), noop.clone(), noop));
        let repository: Arc<dyn OrderRepository> = Arc::new(InMemoryOrderRepository::new());
        ExecutionEngine::new(connector, risk, repository, EventBus::new())
    }

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
    async fn successful_market_order_reaches_filled() {
        let engine = engine().await;
        let order = sample_order("submit-1");
        let result = engine.submit(order).await.unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.filled_quantity, result.quantity);
        assert!(result.closed_at.is_some());
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_without_touching_the_broker() {
        let engine = engine().await;
        let mut order = sample_order("submit-2");
        order.quantity = Decimal::ZERO;
        let result = engine.submit(order).await.unwrap();
        assert_eq!(result.status, OrderStatus::Rejected);
        assert_eq!(result.rejection_reason.as_deref(), Some("quantity must be positive"));
    }

    #[tokio::test]
    async fn resubmitting_same_client_order_id_short_circuits() {
        let engine = engine().await;
        let order = sample_order("submit-dup");
        let first = engine.submit(order.clone()).await.unwrap();
        let second = engine.submit(order).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, OrderStatus::Filled);
        assert_eq!(first.broker_order_id, second.broker_order_id);
    }

    #[tokio::test]
    async fn cancel_from_pending_transitions_to_canceled() {
        let engine = engine().await;
        let order = sample_order("cancel-1");
        let saved = engine.repository.save_order(&order).await.unwrap();
        let canceled = engine.cancel(saved.id).await.unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn cancel_unknown_order_fails() {
        let engine = engine().await;
        let err = engine.cancel(OrderId::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn kill_switch_capability_cancels_open_orders() {
        let repository: Arc<dyn OrderRepository> = Arc::new(InMemoryOrderRepository::new());
        let account_id = AccountId(Uuid::new_v4());
        let mut pending = Order::new(
            ClientOrderId::new("open-1"),
            account_id,
            "EURUSD",
            Side::Buy,
            OrderKind::Limit,
            dec!(1.0),
        );
        pending.price = Some(dec!(1.1));
        repository.save_order(&pending).await.unwrap();
        let connector = Arc::new(BrokerConnector::new(
            SimulatedBroker::new(),
            BrokerCredentials {
                login: "demo".into(),
                password: "demo".into(),
                server: "demo".into(),
            },
            ConnectorConfig::default(),
        ));
        connector.connect().await.unwrap();
        let noop = Arc::new(NoopCollaborators);
        let risk = Arc::new(RiskEngine::new(noop.clone(), noop.clone(), noop.clone(), noop.clone(), noop));
        let engine = ExecutionEngine::new(connector, risk, repository.clone(), EventBus::new());
        engine.cancel_all_orders(account_id).await.unwrap();
        let open = repository.get_open_orders(account_id).await.unwrap();
        assert!(open.is_empty());
    }
}
