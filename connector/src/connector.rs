//! `BrokerConnector` — the stateful session object the Execution Engine
//! treats as its only portal to the broker.

use crate::backend::{
    BrokerAction, BrokerBackend, BrokerOrderRequest, BrokerOrderType, ConnectorHealth, ExecuteOutcome, FillingMode,
    RetcodeOutcome, TimeInForce, TradeMode, COMMENT_MAX_LEN, DEFAULT_DEVIATION, DEFAULT_MAGIC,
};
use crate::credentials::BrokerCredentials;
use crate::error::ConnectorError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mtrader_types::{AccountSnapshot, BrokerOrderId, ClientOrderId, Order, OrderKind, Position, Side};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Tuning knobs for reconnect backoff and heartbeating.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_multiplier: f64,
    pub request_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_multiplier: 2.0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct SharedState {
    connected: AtomicBool,
    reconnect_count: AtomicU32,
    connected_since: Mutex<Option<DateTime<Utc>>>,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
}

/// Reconnecting, idempotent broker session. Generic over `B` so that tests
/// and the default run mode plug in [`crate::SimulatedBroker`] while a
/// production deployment supplies a real terminal adapter — the same shape
/// as the teacher crate's `Box<dyn ProfitBackend>` seam.
pub struct BrokerConnector<B: BrokerBackend> {
    backend: Arc<B>,
    credentials: BrokerCredentials,
    config: ConnectorConfig,
    /// Serializes every state-changing call (connect/disconnect/reconnect,
    /// execute/modify/cancel/close) so logins and submissions never interleave.
    state_lock: Mutex<()>,
    shared: Arc<SharedState>,
    idempotency: DashMap<ClientOrderId, BrokerOrderId>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl<B: BrokerBackend + 'static> BrokerConnector<B> {
    pub fn new(backend: B, credentials: BrokerCredentials, config: ConnectorConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            credentials,
            config,
            state_lock: Mutex::new(()),
            shared: Arc::new(SharedState {
                connected: AtomicBool::new(false),
                reconnect_count: AtomicU32::new(0),
                connected_since: Mutex::new(None),
                last_heartbeat: Mutex::new(None),
            }),
            idempotency: DashMap::new(),
            heartbeat_task: Mutex::new(None),
        }
    }

    /// Rebuilds the idempotency cache from a durable source at startup —
    /// the in-process map is not itself durable (design note: "the
    /// idempotency cache must be rebuildable from the repository at startup").
    pub fn rebuild_idempotency<I>(&self, known: I)
    where
        I: IntoIterator<Item = (ClientOrderId, BrokerOrderId)>,
    {
        for (client_id, broker_id) in known {
            self.idempotency.insert(client_id, broker_id);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Initializes terminal, login, and starts the heartbeat loop.
    /// Idempotent: calling `connect` while already connected is a no-op.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectorError> {
        let _guard = self.state_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.backend.connect(&self.credentials).await?;
        self.shared.connected.store(true, Ordering::SeqCst);
        *self.shared.connected_since.lock().await = Some(Utc::now());
        *self.shared.last_heartbeat.lock().await = Some(Utc::now());
        self.spawn_heartbeat().await;
        info!("broker connector connected");
        Ok(())
    }

    /// Cancels the heartbeat task and shuts down the terminal session.
    pub async fn disconnect(self: &Arc<Self>) -> Result<(), ConnectorError> {
        let _guard = self.state_lock.lock().await;
        if let Some(handle) = self.heartbeat_task.lock().await.take() {
            handle.abort();
        }
        self.backend.disconnect().await?;
        self.shared.connected.store(false, Ordering::SeqCst);
        info!("broker connector disconnected");
        Ok(())
    }

    /// Up to `reconnect_attempts` attempts with delay `base · multiplier^attempt`.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), ConnectorError> {
        {
            let _guard = self.state_lock.lock().await;
            if let Some(handle) = self.heartbeat_task.lock().await.take() {
                handle.abort();
            }
            self.shared.connected.store(false, Ordering::SeqCst);
        }
        for attempt in 0..self.config.reconnect_attempts {
            let delay = self.config.reconnect_base_delay.mul_f64(self.config.reconnect_multiplier.powi(attempt as i32));
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }
            match self.backend.connect(&self.credentials).await {
                Ok(()) => {
                    let _guard = self.state_lock.lock().await;
                    self.shared.connected.store(true, Ordering::SeqCst);
                    *self.shared.last_heartbeat.lock().await = Some(Utc::now());
                    self.shared.reconnect_count.fetch_add(1, Ordering::SeqCst);
                    self.spawn_heartbeat().await;
                    info!(attempt, "broker connector reconnected");
                    return Ok(());
                }
                Err(err) => warn!(attempt, %err, "reconnect attempt failed"),
            }
        }
        Err(ConnectorError::ReconnectExhausted {
            attempts: self.config.reconnect_attempts,
        })
    }

    async fn spawn_heartbeat(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.heartbeat_interval);
            loop {
                ticker.tick().await;
                match this.backend.ping().await {
                    Ok(()) => {
                        *this.shared.last_heartbeat.lock().await = Some(Utc::now());
                    }
                    Err(err) => {
                        error!(%err, "heartbeat failed, flipping disconnected and reconnecting");
                        this.shared.connected.store(false, Ordering::SeqCst);
                        if let Err(err) = this.reconnect().await {
                            error!(%err, "heartbeat-triggered reconnect exhausted");
                        }
                        break;
                    }
                }
            }
        });
        *self.heartbeat_task.lock().await = Some(handle);
    }

    pub async fn health(&self) -> ConnectorHealth {
        let connected = self.is_connected();
        let since = *self.shared.connected_since.lock().await;
        let uptime_secs = since.map(|t| (Utc::now() - t).num_seconds().max(0) as u64).unwrap_or(0);
        ConnectorHealth {
            connected,
            uptime_secs,
            last_heartbeat: *self.shared.last_heartbeat.lock().await,
            reconnect_count: self.shared.reconnect_count.load(Ordering::SeqCst),
        }
    }

    /// The order validation pipeline (spec §4.1, steps 1–7) followed by
    /// submission (step 8). Each step short-circuits with a specific error.
    async fn build_request(&self, order: &Order) -> Result<BrokerOrderRequest, ConnectorError> {
        // Step 1: symbol exists, tradeable.
        let info = self.backend.symbol_info(&order.symbol).await?;
        if info.trade_mode == TradeMode::Disabled || info.trade_mode == TradeMode::CloseOnly {
            return Err(ConnectorError::InvalidSymbol {
                symbol: order.symbol.clone(),
                reason: "trading disabled or close-only".to_string(),
            });
        }

        // Step 2: volume within bounds and an integer multiple of the step.
        let epsilon = Decimal::new(1, 8);
        if order.quantity < info.volume_min - epsilon || order.quantity > info.volume_max + epsilon {
            return Err(ConnectorError::InvalidVolume {
                symbol: order.symbol.clone(),
                volume: order.quantity,
                min: info.volume_min,
                max: info.volume_max,
                step: info.volume_step,
            });
        }
        if !info.volume_step.is_zero() {
            let steps = (order.quantity / info.volume_step).round();
            let reconstructed = steps * info.volume_step;
            if (order.quantity - reconstructed).abs() > epsilon {
                return Err(ConnectorError::InvalidVolume {
                    symbol: order.symbol.clone(),
                    volume: order.quantity,
                    min: info.volume_min,
                    max: info.volume_max,
                    step: info.volume_step,
                });
            }
        }

        // Step 3: price aligned to the tick size, when a price is present.
        if let Some(price) = order.price {
            if !info.trade_tick_size.is_zero() {
                let ticks = (price / info.trade_tick_size).round();
                let reconstructed = ticks * info.trade_tick_size;
                if (price - reconstructed).abs() > epsilon {
                    return Err(ConnectorError::InvalidPrice {
                        symbol: order.symbol.clone(),
                    });
                }
            }
        }

        // Step 4: stop-loss / take-profit distance from price.
        let reference_price = order.price.unwrap_or_default();
        let min_distance = info.trade_stops_level * info.point;
        for stop in [order.stop_price, order.limit_price].into_iter().flatten() {
            if (stop - reference_price).abs() <= min_distance {
                return Err(ConnectorError::InvalidStops {
                    symbol: order.symbol.clone(),
                });
            }
        }

        // Step 5: symbol selected for market data.
        if !self.backend.select_symbol(&order.symbol).await? {
            return Err(ConnectorError::SymbolSelectFailed(order.symbol.clone()));
        }

        // Step 6: required margin within free margin.
        let account = self.backend.account_info().await?;
        let required = self
            .backend
            .required_margin(&order.symbol, order.quantity, reference_price)
            .await?;
        if required > account.free_margin {
            return Err(ConnectorError::InsufficientMargin {
                required,
                free: account.free_margin,
            });
        }

        // Step 7: deterministic request mapping.
        Ok(build_broker_request(order, &reference_price))
    }

    /// `ExecuteOrder`. Dedupes on `client_order_id`: a duplicate call
    /// returns `{ok:true, duplicate:true, broker_order_id}` without
    /// resubmitting.
    pub async fn execute_order(&self, order: &Order) -> Result<ExecuteOutcome, ConnectorError> {
        let _guard = self.state_lock.lock().await;
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        if let Some(existing) = self.idempotency.get(&order.client_order_id) {
            return Ok(ExecuteOutcome {
                ok: true,
                duplicate: true,
                retcode: None,
                retcode_message: None,
                broker_order_id: Some(existing.0),
                deal: None,
                error: None,
            });
        }

        let request = match self.build_request(order).await {
            Ok(request) => request,
            Err(err) => return Ok(ExecuteOutcome::failure(err.to_string())),
        };

        let outcome = self.backend.execute_order(&request).await?;
        if let Some(broker_order_id) = outcome.broker_order_id {
            self.idempotency
                .insert(order.client_order_id.clone(), BrokerOrderId(broker_order_id));
        }
        Ok(outcome)
    }

    pub async fn modify_order(
        &self,
        broker_order_id: i64,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        limit_price: Option<Decimal>,
        quantity: Option<Decimal>,
    ) -> Result<RetcodeOutcome, ConnectorError> {
        let _guard = self.state_lock.lock().await;
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.backend
            .modify_order(broker_order_id, price, stop_price, limit_price, quantity)
            .await
    }

    pub async fn cancel_order(&self, broker_order_id: i64) -> Result<RetcodeOutcome, ConnectorError> {
        let _guard = self.state_lock.lock().await;
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.backend.cancel_order(broker_order_id).await
    }

    pub async fn close_position(&self, position_id: &str, deviation: u32) -> Result<RetcodeOutcome, ConnectorError> {
        let _guard = self.state_lock.lock().await;
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.backend.close_position(position_id, deviation).await
    }

    pub async fn close_all_positions(&self, symbol: Option<&str>) -> Result<Vec<RetcodeOutcome>, ConnectorError> {
        let _guard = self.state_lock.lock().await;
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.backend.close_all_positions(symbol).await
    }

    /// Queries may run concurrently with each other and with state changes.
    pub async fn account_info(&self) -> Result<AccountSnapshot, ConnectorError> {
        self.backend.account_info().await
    }

    pub async fn positions(&self, symbol: &str) -> Result<Vec<Position>, ConnectorError> {
        self.backend.positions(symbol).await
    }

    pub async fn subscribe_market_data(&self, symbols: &[String]) -> Result<Vec<(String, bool)>, ConnectorError> {
        self.backend.subscribe_market_data(symbols).await
    }

    pub async fn unsubscribe_market_data(&self, symbols: &[String]) -> Result<Vec<(String, bool)>, ConnectorError> {
        self.backend.unsubscribe_market_data(symbols).await
    }
}

fn build_broker_request(order: &Order, reference_price: &Decimal) -> BrokerOrderRequest {
    let action = match order.order_type {
        OrderKind::Market => BrokerAction::Deal,
        OrderKind::Limit | OrderKind::Stop | OrderKind::StopLimit => BrokerAction::Pending,
    };
    let order_type = match order.side {
        Side::Buy => BrokerOrderType::Buy,
        Side::Sell => BrokerOrderType::Sell,
    };
    let mut comment = order.client_order_id.as_str().to_string();
    comment.truncate(COMMENT_MAX_LEN);

    BrokerOrderRequest {
        action,
        symbol: order.symbol.clone(),
        volume: order.quantity,
        order_type,
        price: *reference_price,
        sl: order.stop_price.unwrap_or_default(),
        tp: order.limit_price.unwrap_or_default(),
        deviation: DEFAULT_DEVIATION,
        magic: DEFAULT_MAGIC,
        comment,
        type_time: TimeInForce::Gtc,
        type_filling: FillingMode::Return,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedBroker;
    use mtrader_types::{AccountId, ClientOrderId, OrderKind, Side};
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
    async fn execute_order_succeeds_once_connected() {
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
        let order = sample_order("abc-1");
        let outcome = connector.execute_order(&order).await.unwrap();
        assert!(outcome.ok);
        assert!(!outcome.duplicate);
        assert!(outcome.broker_order_id.is_some());
    }

    #[tokio::test]
    async fn duplicate_client_order_id_does_not_resubmit() {
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
        let order = sample_order("dup-1");
        let first = connector.execute_order(&order).await.unwrap();
        let second = connector.execute_order(&order).await.unwrap();
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.broker_order_id, second.broker_order_id);
    }

    #[tokio::test]
    async fn execute_before_connect_fails() {
        let connector = Arc::new(BrokerConnector::new(
            SimulatedBroker::new(),
            BrokerCredentials {
                login: "demo".into(),
                password: "demo".into(),
                server: "demo".into(),
            },
            ConnectorConfig::default(),
        ));
        let order = sample_order("no-conn-1");
        let err = connector.execute_order(&order).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected));
    }

    #[tokio::test]
    async fn volume_outside_bounds_is_rejected_as_business_outcome() {
        let broker = SimulatedBroker::new();
        let connector = Arc::new(BrokerConnector::new(
            broker,
            BrokerCredentials {
                login: "demo".into(),
                password: "demo".into(),
                server: "demo".into(),
            },
            ConnectorConfig::default(),
        ));
        connector.connect().await.unwrap();
        let mut order = sample_order("vol-1");
        order.quantity = dec!(1000); // above volume_max=100
        let outcome = connector.execute_order(&order).await.unwrap();
        assert!(!outcome.ok);
        assert!(outcome.error.is_some());
    }
}
