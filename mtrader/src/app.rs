//! Process wiring: constructs the broker connector, risk engine,
//! execution engine, repository and fan-out layer and glues them
//! together through the capability traits `mtrader_risk::capability`
//! defines for exactly this purpose.
//!
//! The risk engine needs a handle to the execution engine (to cancel open
//! orders on kill switch) before the execution engine can exist (it needs
//! the already-built risk engine) — the same construction-order cycle
//! `mtrader_risk::capability`'s doc comment calls out. Broken here with
//! [`ExecutionHandle`]: an empty cell handed to `RiskEngine::new`, filled
//! in once the execution engine is actually built.

use async_trait::async_trait;
use mtrader_connector::{BrokerBackend, BrokerConnector, BrokerCredentials, ConnectorConfig, SimulatedBroker};
use mtrader_execution::{spawn_reconciliation, EventBus, ExecutionEngine};
use mtrader_fanout::bus::{InMemorySharedBus, SharedBus};
use mtrader_fanout::redis_bus::RedisSharedBus;
use mtrader_fanout::token::TokenVerifier;
use mtrader_repository::{InMemoryOrderRepository, OrderRepository, PgOrderRepository};
use mtrader_risk::{IncidentSink, Notifier, OrderCancelingCapability, PositionClosingCapability, RiskEngine, RiskEventBroadcaster};
use mtrader_types::{AccountId, RiskIncident};
use rust_decimal::Decimal;
use std::fs;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("broker credentials: {0}")]
    Credentials(#[from] mtrader_connector::ConnectorError),
    #[error("repository: {0}")]
    Repository(#[from] mtrader_repository::RepositoryError),
    #[error("failed to read JWT public key at {path}: {source}")]
    JwtKey { path: String, source: std::io::Error },
    #[error("token verifier: {0}")]
    Token(#[from] mtrader_fanout::error::TokenError),
    #[error("shared bus: {0}")]
    Bus(#[from] mtrader_fanout::bus::BusError),
}

/// Cell handed to the risk engine so it can drive the execution engine's
/// `cancel_all_orders` once the latter exists; see module docs.
struct ExecutionHandle<B: BrokerBackend + 'static> {
    inner: OnceCell<Arc<ExecutionEngine<B>>>,
}

impl<B: BrokerBackend + 'static> ExecutionHandle<B> {
    fn empty() -> Arc<Self> {
        Arc::new(Self { inner: OnceCell::new() })
    }

    fn fill(&self, engine: Arc<ExecutionEngine<B>>) {
        // Construction happens exactly once per process; a second `fill`
        // would indicate the wiring ran twice and is a bug worth surfacing
        // loudly rather than silently keeping the first engine.
        self.inner.set(engine).expect("ExecutionHandle filled twice");
    }
}

#[async_trait]
impl<B: BrokerBackend + 'static> OrderCancelingCapability for ExecutionHandle<B> {
    async fn cancel_all_orders(&self, account_id: AccountId) -> Result<(), String> {
        match self.inner.get() {
            Some(engine) => engine.cancel_all_orders(account_id).await,
            None => Err("execution engine not yet initialized".to_string()),
        }
    }
}

/// Adapts the connector's `close_all_positions` (scoped to the connector's
/// single logged-in account) to the account-parameterized capability trait.
struct ConnectorPositionCloser<B: BrokerBackend + 'static> {
    connector: Arc<BrokerConnector<B>>,
}

#[async_trait]
impl<B: BrokerBackend + 'static> PositionClosingCapability for ConnectorPositionCloser<B> {
    async fn close_all_positions(&self, _account_id: AccountId, symbol: Option<&str>) -> Result<(), String> {
        self.connector.close_all_positions(symbol).await.map(|_| ()).map_err(|e| e.to_string())
    }
}

struct RepositoryIncidentSink {
    repository: Arc<dyn OrderRepository>,
}

#[async_trait]
impl IncidentSink for RepositoryIncidentSink {
    async fn save_incident(&self, incident: &RiskIncident) -> Result<(), String> {
        self.repository.save_risk_incident(incident).await.map_err(|e| e.to_string())
    }
}

/// Publishes risk incidents to the fan-out layer's `risk_events` broadcast
/// channel so clients subscribed to it see kill-switch activity live.
struct FanoutRiskBroadcaster {
    bus: Arc<dyn SharedBus>,
}

#[async_trait]
impl RiskEventBroadcaster for FanoutRiskBroadcaster {
    async fn broadcast_risk_event(&self, incident: &RiskIncident) -> Result<(), String> {
        let payload = serde_json::to_string(incident).map_err(|e| e.to_string())?;
        self.bus.publish("risk_events", &payload).await.map_err(|e| e.to_string())
    }
}

/// Logs daily-loss pings instead of paging an out-of-scope notifier.
struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_daily_loss(&self, account_id: AccountId, daily_loss: Decimal) {
        warn!(%account_id, %daily_loss, "daily loss notification");
    }
}

/// Everything one process needs to serve the HTTP and WebSocket surface.
/// Generic over the broker backend the way `mtrader_connector::BrokerConnector`
/// is; this workspace wires the always-available [`SimulatedBroker`], which
/// satisfies the same contract a real terminal adapter would (spec
/// Non-goal: "the specific broker protocol ... is specified abstractly").
pub struct App<B: BrokerBackend + 'static> {
    pub settings: Settings,
    pub connector: Arc<BrokerConnector<B>>,
    pub risk: Arc<RiskEngine>,
    pub execution: Arc<ExecutionEngine<B>>,
    pub repository: Arc<dyn OrderRepository>,
    pub bus: Arc<dyn SharedBus>,
    pub token_verifier: Arc<TokenVerifier>,
    reconciliation: tokio::sync::Mutex<Option<(JoinHandle<()>, tokio::sync::watch::Sender<bool>)>>,
}

pub type SharedApp<B> = Arc<App<B>>;

impl App<SimulatedBroker> {
    pub async fn build(settings: Settings) -> Result<SharedApp<SimulatedBroker>, AppError> {
        let credentials = BrokerCredentials::from_env()?;
        let connector = Arc::new(BrokerConnector::new(SimulatedBroker::new(), credentials, ConnectorConfig::default()));

        let repository: Arc<dyn OrderRepository> = if settings.postgres.url.is_empty() {
            Arc::new(InMemoryOrderRepository::new())
        } else {
            Arc::new(PgOrderRepository::connect(&settings.postgres).await?)
        };

        let bus: Arc<dyn SharedBus> = match &settings.redis_url {
            Some(url) => Arc::new(RedisSharedBus::connect(url).await?),
            None => InMemorySharedBus::new(),
        };

        let execution_handle = ExecutionHandle::empty();
        let position_closer = Arc::new(ConnectorPositionCloser { connector: connector.clone() });
        let incident_sink = Arc::new(RepositoryIncidentSink { repository: repository.clone() });
        let risk_broadcaster = Arc::new(FanoutRiskBroadcaster { bus: bus.clone() });

        let risk = Arc::new(RiskEngine::new(
            execution_handle.clone(),
            position_closer,
            incident_sink,
            risk_broadcaster,
            Arc::new(TracingNotifier),
        ));

        let events = EventBus::new();
        let execution = Arc::new(ExecutionEngine::new(connector.clone(), risk.clone(), repository.clone(), events));
        execution_handle.fill(execution.clone());

        let pem = fs::read(&settings.jwt_public_key_path)
            .map_err(|source| AppError::JwtKey { path: settings.jwt_public_key_path.clone(), source })?;
        let token_verifier = Arc::new(TokenVerifier::from_rsa_pem(&pem, &settings.jwt_issuer, &settings.jwt_audience)?);

        let reconciliation = settings.reconciliation_enabled.then(|| {
            spawn_reconciliation(execution.clone(), repository.clone(), settings.account_id)
        });

        Ok(Arc::new(Self {
            settings,
            connector,
            risk,
            execution,
            repository,
            bus,
            token_verifier,
            reconciliation: tokio::sync::Mutex::new(reconciliation),
        }))
    }

    /// Cancels background loops (reconciliation, connector heartbeat) and
    /// awaits their termination, the way spec §5 requires shutdown to.
    pub async fn shutdown(&self) {
        if let Some((handle, tx)) = self.reconciliation.lock().await.take() {
            let _ = tx.send(true);
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(%err, "reconciliation task panicked during shutdown");
                }
            }
        }
        if let Err(err) = self.connector.disconnect().await {
            error!(%err, "connector disconnect failed during shutdown");
        }
    }
}
