//! A single fill against an order.

use crate::ids::{AccountId, OrderId, TradeId};
use crate::order::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(
        order_id: OrderId,
        account_id: AccountId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            id: TradeId::new(),
            order_id,
            account_id,
            symbol: symbol.into(),
            side,
            quantity,
            price,
            commission: Decimal::ZERO,
            executed_at: Utc::now(),
        }
    }
}
