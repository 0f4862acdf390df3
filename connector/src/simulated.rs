//! In-process broker simulation.
//!
//! Stands in for a real terminal SDK the way `profitdll::mock::ProfitConnector`
//! stands in for the ProfitDLL: enough behavior to drive the execution
//! pipeline's tests and a default run mode without any external dependency.

use crate::backend::{
    BrokerBackend, BrokerOrderRequest, ConnectorHealth, ExecuteOutcome, RetcodeOutcome, SymbolInfo, TradeMode,
};
use crate::credentials::BrokerCredentials;
use crate::error::{retcode_message, ConnectorError};
use async_trait::async_trait;
use dashmap::DashMap;
use mtrader_types::{AccountSnapshot, Position};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// A deterministic, in-memory broker used as the default backend and in
/// tests. Every order fills immediately at its requested price (or at a
/// synthetic mid if market) with retcode 10009 ("request completed").
pub struct SimulatedBroker {
    connected: AtomicBool,
    next_order_id: AtomicI64,
    symbols: RwLock<HashMap<String, SymbolInfo>>,
    account: RwLock<AccountSnapshot>,
    /// `broker_order_id -> retcode`, used so modify/cancel can reuse the
    /// last known classification of an order.
    orders: DashMap<i64, i32>,
    positions: RwLock<Vec<Position>>,
}

impl SimulatedBroker {
    pub fn new() -> Self {
        let mut symbols = HashMap::new();
        symbols.insert(
            "EURUSD".to_string(),
            SymbolInfo {
                symbol: "EURUSD".to_string(),
                trade_mode: TradeMode::Full,
                volume_min: dec!(0.01),
                volume_max: dec!(100),
                volume_step: dec!(0.01),
                trade_tick_size: dec!(0.00001),
                trade_stops_level: dec!(10),
                point: dec!(0.00001),
            },
        );
        Self {
            connected: AtomicBool::new(false),
            next_order_id: AtomicI64::new(1),
            symbols: RwLock::new(symbols),
            account: RwLock::new(AccountSnapshot {
                balance: dec!(10000),
                equity: dec!(10000),
                margin: dec!(0),
                free_margin: dec!(10000),
                margin_level: dec!(0),
                profit: dec!(0),
                leverage: dec!(100),
            }),
            orders: DashMap::new(),
            positions: RwLock::new(Vec::new()),
        }
    }

    /// Registers or overwrites the simulated parameters for a symbol — used
    /// by tests that exercise the validation pipeline's boundary conditions.
    pub fn set_symbol(&self, info: SymbolInfo) {
        self.symbols.write().insert(info.symbol.clone(), info);
    }

    pub fn set_account(&self, snapshot: AccountSnapshot) {
        *self.account.write() = snapshot;
    }

    /// Seeds the book of open positions returned by `positions()` — used by
    /// tests exercising exposure-based risk rules end to end.
    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.write() = positions;
    }

    fn require_connected(&self) -> Result<(), ConnectorError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectorError::NotConnected)
        }
    }
}

impl Default for SimulatedBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerBackend for SimulatedBroker {
    async fn connect(&self, _credentials: &BrokerCredentials) -> Result<(), ConnectorError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), ConnectorError> {
        self.require_connected()
    }

    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, ConnectorError> {
        self.require_connected()?;
        self.symbols
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| ConnectorError::InvalidSymbol {
                symbol: symbol.to_string(),
                reason: "unknown symbol".to_string(),
            })
    }

    async fn select_symbol(&self, symbol: &str) -> Result<bool, ConnectorError> {
        self.require_connected()?;
        Ok(self.symbols.read().contains_key(symbol))
    }

    async fn execute_order(&self, request: &BrokerOrderRequest) -> Result<ExecuteOutcome, ConnectorError> {
        self.require_connected()?;
        let broker_order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let retcode = 10009;
        self.orders.insert(broker_order_id, retcode);
        Ok(ExecuteOutcome {
            ok: true,
            duplicate: false,
            retcode: Some(retcode),
            retcode_message: Some(retcode_message(retcode)),
            broker_order_id: Some(broker_order_id),
            deal: Some(broker_order_id),
            error: None,
        })
    }

    async fn modify_order(
        &self,
        broker_order_id: i64,
        _price: Option<Decimal>,
        _stop_price: Option<Decimal>,
        _limit_price: Option<Decimal>,
        _quantity: Option<Decimal>,
    ) -> Result<RetcodeOutcome, ConnectorError> {
        self.require_connected()?;
        if !self.orders.contains_key(&broker_order_id) {
            return Err(ConnectorError::Rejected {
                retcode: 10013,
                message: retcode_message(10013),
            });
        }
        Ok(RetcodeOutcome {
            ok: true,
            retcode: 10009,
            retcode_message: retcode_message(10009),
        })
    }

    async fn cancel_order(&self, broker_order_id: i64) -> Result<RetcodeOutcome, ConnectorError> {
        self.require_connected()?;
        self.orders.remove(&broker_order_id);
        Ok(RetcodeOutcome {
            ok: true,
            retcode: 10014,
            retcode_message: retcode_message(10014),
        })
    }

    async fn close_position(&self, _position_id: &str, _deviation: u32) -> Result<RetcodeOutcome, ConnectorError> {
        self.require_connected()?;
        Ok(RetcodeOutcome {
            ok: true,
            retcode: 10012,
            retcode_message: retcode_message(10012),
        })
    }

    async fn close_all_positions(&self, _symbol: Option<&str>) -> Result<Vec<RetcodeOutcome>, ConnectorError> {
        self.require_connected()?;
        Ok(vec![RetcodeOutcome {
            ok: true,
            retcode: 10012,
            retcode_message: retcode_message(10012),
        }])
    }

    async fn account_info(&self) -> Result<AccountSnapshot, ConnectorError> {
        self.require_connected()?;
        Ok(*self.account.read())
    }

    async fn positions(&self, symbol: &str) -> Result<Vec<Position>, ConnectorError> {
        self.require_connected()?;
        Ok(self.positions.read().iter().filter(|p| p.symbol == symbol).cloned().collect())
    }

    async fn required_margin(&self, _symbol: &str, volume: Decimal, price: Decimal) -> Result<Decimal, ConnectorError> {
        self.require_connected()?;
        let leverage = self.account.read().leverage;
        if leverage.is_zero() {
            return Ok(volume * price);
        }
        Ok(volume * price / leverage)
    }

    async fn subscribe_market_data(&self, symbols: &[String]) -> Result<Vec<(String, bool)>, ConnectorError> {
        self.require_connected()?;
        let book = self.symbols.read();
        Ok(symbols.iter().map(|s| (s.clone(), book.contains_key(s))).collect())
    }

    async fn unsubscribe_market_data(&self, symbols: &[String]) -> Result<Vec<(String, bool)>, ConnectorError> {
        self.require_connected()?;
        Ok(symbols.iter().map(|s| (s.clone(), true)).collect())
    }
}

/// Diagnostic snapshot, not part of `BrokerBackend` — the connector wraps
/// this into its own `Health()` with uptime/heartbeat bookkeeping.
pub fn blank_health() -> ConnectorHealth {
    ConnectorHealth {
        connected: false,
        uptime_secs: 0,
        last_heartbeat: None,
        reconnect_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_then_execute_returns_success_retcode() {
        let broker = SimulatedBroker::new();
        let creds = BrokerCredentials {
            login: "demo".into(),
            password: "demo".into(),
            server: "demo".into(),
        };
        broker.connect(&creds).await.unwrap();
        let info = broker.symbol_info("EURUSD").await.unwrap();
        assert_eq!(info.trade_mode, TradeMode::Full);
    }

    #[tokio::test]
    async fn operations_fail_before_connect() {
        let broker = SimulatedBroker::new();
        assert!(matches!(broker.ping().await, Err(ConnectorError::NotConnected)));
    }
}
