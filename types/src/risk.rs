//! Risk rule catalog and incident record.

use crate::ids::{AccountId, IncidentId, OrderId};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// The full pre-trade / monitoring rule catalog.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Display)]
pub enum RiskRuleType {
    MaxPositionSize,
    MaxDrawdown,
    MaxDailyLoss,
    MaxLeverage,
    MinTimeBetweenTrades,
    CorrelationLimit,
    MaxSymbolConcentration,
    MaxOpenPositions,
    MaxOrderCount,
    MaxExposure,
    StopLossRequired,
    TakeProfitRequired,
    MaxSpread,
    MaxSlippage,
    TradingHoursOnly,
}

/// Whether a rule violation rejects the order outright or merely warns.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Display)]
pub enum Severity {
    Hard,
    Soft,
}

/// Free-form parameter bag for a rule instance (e.g. `{"max_percent": 0.1}`),
/// kept as JSON because each rule type has its own parameter shape —
/// mirrors the Python rule map's untyped parameter dict.
pub type RiskParameters = BTreeMap<String, JsonValue>;

/// A configured instance of a rule, as stored in the rule registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub rule_type: RiskRuleType,
    pub parameters: RiskParameters,
    pub severity: Severity,
    pub enabled: bool,
    pub error_message: Option<String>,
}

impl RiskRule {
    pub fn new(rule_type: RiskRuleType, parameters: RiskParameters, severity: Severity) -> Self {
        Self {
            rule_type,
            parameters,
            severity,
            enabled: true,
            error_message: None,
        }
    }
}

/// Terminal action recorded against a risk incident.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum RiskAction {
    Reject,
    Warning,
    KillSwitchEngaged,
    PositionReduced,
    KillSwitchReleased,
}

/// Durable record of a rule evaluation that produced a notable outcome —
/// a rejection, a warning, or a kill-switch event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskIncident {
    pub id: IncidentId,
    pub account_id: AccountId,
    pub order_id: Option<OrderId>,
    pub rule_type: Option<RiskRuleType>,
    pub parameters: RiskParameters,
    pub observed_values: RiskParameters,
    pub action_taken: RiskAction,
    pub severity: Option<String>,
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RiskIncident {
    pub fn new(account_id: AccountId, action_taken: RiskAction) -> Self {
        Self {
            id: IncidentId::new(),
            account_id,
            order_id: None,
            rule_type: None,
            parameters: RiskParameters::new(),
            observed_values: RiskParameters::new(),
            action_taken,
            severity: None,
            triggered_by: None,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of `PreTradeCheck`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeApproval {
    pub approved: bool,
    pub rule_violated: Option<RiskRuleType>,
    pub reason: Option<String>,
}

impl TradeApproval {
    pub fn approved() -> Self {
        Self {
            approved: true,
            rule_violated: None,
            reason: None,
        }
    }

    pub fn denied(rule: RiskRuleType, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            rule_violated: Some(rule),
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_carries_no_rule() {
        let approval = TradeApproval::approved();
        assert!(approval.approved);
        assert!(approval.rule_violated.is_none());
    }

    #[test]
    fn denial_names_the_violated_rule() {
        let approval = TradeApproval::denied(RiskRuleType::MaxDrawdown, "drawdown exceeded");
        assert!(!approval.approved);
        assert_eq!(approval.rule_violated, Some(RiskRuleType::MaxDrawdown));
    }
}
