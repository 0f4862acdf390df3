//! Open/closed position aggregate.

use crate::ids::{AccountId, PositionId};
use crate::order::Side;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A net position in a single symbol for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Position {
    pub fn new(
        account_id: AccountId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PositionId::new(),
            account_id,
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: now,
            closed_at: None,
            version: 1,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Notional exposure at the current mark, used by exposure-based risk
    /// rules (`MAX_EXPOSURE`, `MAX_SYMBOL_CONCENTRATION`).
    pub fn notional(&self) -> Decimal {
        self.quantity * self.current_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn new_position_is_open_with_zero_pnl() {
        let pos = Position::new(AccountId(Uuid::new_v4()), "EURUSD", Side::Buy, dec!(1.0), dec!(1.1000));
        assert!(pos.is_open());
        assert_eq!(pos.unrealized_pnl, Decimal::ZERO);
        assert_eq!(pos.notional(), dec!(1.1000));
    }
}
