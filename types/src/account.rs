//! Account balance/margin snapshot as returned by the broker connector.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time account state, the input the risk engine evaluates
/// pre-trade rules against (balance/equity/margin ratios).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub margin_level: Decimal,
    pub profit: Decimal,
    pub leverage: Decimal,
}

impl AccountSnapshot {
    pub fn drawdown(&self) -> Decimal {
        if self.balance.is_zero() {
            return Decimal::ZERO;
        }
        (self.balance - self.equity) / self.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn drawdown_is_relative_to_balance() {
        let snapshot = AccountSnapshot {
            balance: dec!(1000),
            equity: dec!(700),
            margin: dec!(0),
            free_margin: dec!(700),
            margin_level: dec!(0),
            profit: dec!(-300),
            leverage: dec!(100),
        };
        assert_eq!(snapshot.drawdown(), dec!(0.3));
    }
}
