//! Inputs a rule evaluation needs beyond the rule's own parameters.

use chrono::{DateTime, Utc};
use mtrader_types::{AccountSnapshot, Order, Position};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Optional market observations a rule may consult (spread/slippage/
/// correlation rules). Absent when the caller has no live quote for the
/// symbol; such rules are skipped rather than treated as violated.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub spread: Option<Decimal>,
    pub slippage: Option<Decimal>,
    /// Pearson correlation of the candidate symbol against each existing
    /// holding's symbol, precomputed by the caller.
    pub correlations: BTreeMap<String, Decimal>,
}

/// Everything `PreTradeCheck` needs to evaluate the rule catalog against a
/// single candidate order.
#[derive(Debug, Clone)]
pub struct PreTradeContext<'a> {
    pub order: &'a Order,
    pub account: &'a AccountSnapshot,
    pub positions: &'a [Position],
    pub market: Option<&'a MarketSnapshot>,
    pub now: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub daily_loss: Decimal,
}

impl<'a> PreTradeContext<'a> {
    /// Aggregate notional across all currently open positions, at their
    /// recorded mark — used by exposure-based rules.
    pub fn total_exposure(&self) -> Decimal {
        self.positions.iter().filter(|p| p.is_open()).map(|p| p.notional()).sum()
    }

    pub fn symbol_exposure(&self, symbol: &str) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.is_open() && p.symbol == symbol)
            .map(|p| p.notional())
            .sum()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    pub fn candidate_notional(&self) -> Decimal {
        let price = self.order.price.unwrap_or(self.order.limit_price.unwrap_or_default());
        self.order.quantity * price
    }
}
