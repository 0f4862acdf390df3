//! The `BrokerBackend` seam: every concrete broker integration (a real
//! terminal SDK, or the in-process [`crate::SimulatedBroker`] used in tests
//! and default runs) implements this trait. `BrokerConnector` never talks to
//! a backend directly except through this interface.

use crate::credentials::BrokerCredentials;
use crate::error::ConnectorError;
use async_trait::async_trait;
use mtrader_types::{AccountSnapshot, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade-permission state of a symbol as reported by the broker terminal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TradeMode {
    Disabled,
    CloseOnly,
    Full,
}

/// Static trading parameters for a symbol, as returned by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub trade_mode: TradeMode,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    pub trade_tick_size: Decimal,
    pub trade_stops_level: Decimal,
    pub point: Decimal,
}

/// A broker order request, built deterministically by the connector's
/// validation pipeline from an [`mtrader_types::Order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrderRequest {
    pub action: BrokerAction,
    pub symbol: String,
    pub volume: Decimal,
    pub order_type: BrokerOrderType,
    pub price: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub deviation: u32,
    pub magic: u64,
    pub comment: String,
    pub type_time: TimeInForce,
    pub type_filling: FillingMode,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum BrokerAction {
    Deal,
    Pending,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum BrokerOrderType {
    Buy,
    Sell,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum FillingMode {
    Return,
}

/// Default deviation (in points) applied when the caller does not override it.
pub const DEFAULT_DEVIATION: u32 = 10;
/// Fixed magic-number sentinel stamped on every order this connector submits.
pub const DEFAULT_MAGIC: u64 = 20_260_727;
/// `comment` is truncated to this many characters before submission.
pub const COMMENT_MAX_LEN: usize = 31;

/// Outcome of a broker order-submission call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub ok: bool,
    pub duplicate: bool,
    pub retcode: Option<i32>,
    pub retcode_message: Option<String>,
    pub broker_order_id: Option<i64>,
    pub deal: Option<i64>,
    pub error: Option<String>,
}

impl ExecuteOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            duplicate: false,
            retcode: None,
            retcode_message: None,
            broker_order_id: None,
            deal: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of modify/cancel/close calls, which share the same retcode-based
/// success classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetcodeOutcome {
    pub ok: bool,
    pub retcode: i32,
    pub retcode_message: String,
}

/// Health snapshot exposed by `Health()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorHealth {
    pub connected: bool,
    pub uptime_secs: u64,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub reconnect_count: u32,
}

/// Object-safe broker session contract. All state-changing operations are
/// serialized by [`crate::BrokerConnector`]'s mutex before reaching here;
/// implementations may assume single-caller access.
#[async_trait]
pub trait BrokerBackend: Send + Sync {
    async fn connect(&self, credentials: &BrokerCredentials) -> Result<(), ConnectorError>;
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    /// A single liveness probe used by the heartbeat loop; errors trigger
    /// reconnect from the caller side.
    async fn ping(&self) -> Result<(), ConnectorError>;

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ConnectorError>;
    async fn select_symbol(&self, symbol: &str) -> Result<bool, ConnectorError>;

    async fn execute_order(&self, request: &BrokerOrderRequest) -> Result<ExecuteOutcome, ConnectorError>;
    async fn modify_order(
        &self,
        broker_order_id: i64,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        limit_price: Option<Decimal>,
        quantity: Option<Decimal>,
    ) -> Result<RetcodeOutcome, ConnectorError>;
    async fn cancel_order(&self, broker_order_id: i64) -> Result<RetcodeOutcome, ConnectorError>;
    async fn close_position(&self, position_id: &str, deviation: u32) -> Result<RetcodeOutcome, ConnectorError>;
    async fn close_all_positions(&self, symbol: Option<&str>) -> Result<Vec<RetcodeOutcome>, ConnectorError>;

    async fn account_info(&self) -> Result<AccountSnapshot, ConnectorError>;

    /// Open positions the broker currently carries for `symbol`, consulted
    /// by the execution engine's `Submit` precondition step (spec §4.3 step 2).
    async fn positions(&self, symbol: &str) -> Result<Vec<Position>, ConnectorError>;

    /// Broker-computed margin required to open `volume` of `symbol` at
    /// `price`, consulted by the validation pipeline's margin-sufficiency
    /// check (step 6).
    async fn required_margin(&self, symbol: &str, volume: Decimal, price: Decimal) -> Result<Decimal, ConnectorError>;

    async fn subscribe_market_data(&self, symbols: &[String]) -> Result<Vec<(String, bool)>, ConnectorError>;
    async fn unsubscribe_market_data(&self, symbols: &[String]) -> Result<Vec<(String, bool)>, ConnectorError>;
}
