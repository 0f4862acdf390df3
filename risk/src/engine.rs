//! The risk engine: stateless per-call rule evaluation plus the long-lived
//! kill switch and position monitor.

use crate::capability::{IncidentSink, Notifier, OrderCancelingCapability, PositionClosingCapability, RiskEventBroadcaster};
use crate::context::PreTradeContext;
use crate::rules;
use chrono::Utc;
use dashmap::DashMap;
use mtrader_types::{AccountId, RiskAction, RiskIncident, RiskRule, RiskRuleType, Severity, TradeApproval};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const KILL_SWITCH_RETRIES: u32 = 3;

/// Default rules wired at construction, matching the enabled-by-default
/// subset of the catalog.
pub fn default_rules() -> Vec<RiskRule> {
    use serde_json::json;
    vec![
        RiskRule::new(
            RiskRuleType::MaxPositionSize,
            param("max_percent", json!("0.1")),
            Severity::Hard,
        ),
        RiskRule::new(
            RiskRuleType::MaxDrawdown,
            param("max_drawdown", json!("0.2")),
            Severity::Hard,
        ),
        RiskRule::new(
            RiskRuleType::MaxDailyLoss,
            param("max_daily_loss", json!("0.05")),
            Severity::Hard,
        ),
        RiskRule::new(
            RiskRuleType::MaxLeverage,
            param("max_leverage", json!("10")),
            Severity::Hard,
        ),
        RiskRule::new(
            RiskRuleType::MinTimeBetweenTrades,
            param("seconds", json!(5)),
            Severity::Soft,
        ),
    ]
}

fn param(key: &str, value: serde_json::Value) -> mtrader_types::RiskParameters {
    let mut map = mtrader_types::RiskParameters::new();
    map.insert(key.to_string(), value);
    map
}

/// Evaluates the rule catalog pre-trade, owns the kill switch, and runs the
/// periodic position monitor. One instance per account is typical, though
/// the rule registry and kill switch are shared process-wide state here;
/// a clustered deployment replicates the kill switch onto the shared bus
/// (design note §9) via the supplied [`RiskEventBroadcaster`].
pub struct RiskEngine {
    rules: RwLock<Vec<RiskRule>>,
    kill_switch: AtomicBool,
    last_trade_at: DashMap<AccountId, chrono::DateTime<Utc>>,
    order_canceler: Arc<dyn OrderCancelingCapability>,
    position_closer: Arc<dyn PositionClosingCapability>,
    incident_sink: Arc<dyn IncidentSink>,
    broadcaster: Arc<dyn RiskEventBroadcaster>,
    notifier: Arc<dyn Notifier>,
}

impl RiskEngine {
    pub fn new(
        order_canceler: Arc<dyn OrderCancelingCapability>,
        position_closer: Arc<dyn PositionClosingCapability>,
        incident_sink: Arc<dyn IncidentSink>,
        broadcaster: Arc<dyn RiskEventBroadcaster>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            rules: RwLock::new(default_rules()),
            kill_switch: AtomicBool::new(false),
            last_trade_at: DashMap::new(),
            order_canceler,
            position_closer,
            incident_sink,
            broadcaster,
            notifier,
        }
    }

    pub fn add_rule(&self, rule: RiskRule) {
        self.rules.write().push(rule);
    }

    pub fn remove_rule(&self, rule_type: RiskRuleType) {
        self.rules.write().retain(|r| r.rule_type != rule_type);
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }

    /// `PreTradeCheck(order, account_info, positions, market_data?)`.
    pub async fn pre_trade_check(&self, ctx: PreTradeContext<'_>) -> TradeApproval {
        if self.is_kill_switch_active() {
            return TradeApproval {
                approved: false,
                rule_violated: None,
                reason: Some("Kill switch active".to_string()),
            };
        }

        let account_id = ctx.order.account_id;
        let rule_snapshot = self.rules.read().clone();
        let mut soft_violation: Option<(RiskRuleType, String)> = None;

        for rule in rule_snapshot.iter().filter(|r| r.enabled) {
            let outcome = rules::evaluate(rule, &ctx);
            if !outcome.violated {
                continue;
            }

            let reason = rule
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} violated", rule.rule_type));

            let mut incident = RiskIncident::new(
                account_id,
                if rule.severity == Severity::Hard {
                    RiskAction::Reject
                } else {
                    RiskAction::Warning
                },
            );
            incident.order_id = Some(ctx.order.id);
            incident.rule_type = Some(rule.rule_type);
            incident.parameters = rule.parameters.clone();
            incident.observed_values = outcome.observed;
            if let Err(err) = self.incident_sink.save_incident(&incident).await {
                warn!(%err, "failed to persist risk incident");
            }

            match rule.severity {
                Severity::Hard => {
                    return TradeApproval::denied(rule.rule_type, reason);
                }
                Severity::Soft => {
                    warn!(rule = %rule.rule_type, "soft risk rule violated, continuing");
                    soft_violation.get_or_insert((rule.rule_type, reason));
                }
            }
        }

        self.last_trade_at.insert(account_id, ctx.now);
        let mut approval = TradeApproval::approved();
        if let Some((rule_type, reason)) = soft_violation {
            approval.rule_violated = Some(rule_type);
            approval.reason = Some(reason);
        }
        approval
    }

    pub fn last_trade_at(&self, account_id: AccountId) -> Option<chrono::DateTime<Utc>> {
        self.last_trade_at.get(&account_id).map(|v| *v)
    }

    /// `KillSwitch(reason, triggered_by)`.
    pub async fn kill_switch(&self, account_id: AccountId, reason: &str, triggered_by: &str) {
        self.kill_switch.store(true, Ordering::SeqCst);

        let mut incident = RiskIncident::new(account_id, RiskAction::KillSwitchEngaged);
        incident.severity = Some("CRITICAL".to_string());
        incident.triggered_by = Some(triggered_by.to_string());
        incident
            .observed_values
            .insert("reason".to_string(), serde_json::Value::String(reason.to_string()));
        if let Err(err) = self.incident_sink.save_incident(&incident).await {
            warn!(%err, "failed to persist kill-switch incident");
        }

        retry_best_effort(KILL_SWITCH_RETRIES, || async {
            self.order_canceler.cancel_all_orders(account_id).await
        })
        .await;
        retry_best_effort(KILL_SWITCH_RETRIES, || async {
            self.position_closer.close_all_positions(account_id, None).await
        })
        .await;

        if let Err(err) = self.broadcaster.broadcast_risk_event(&incident).await {
            warn!(%err, "failed to broadcast kill-switch event");
        }
        info!(%account_id, reason, triggered_by, "kill switch engaged");
    }

    /// `ReleaseKillSwitch()`.
    pub async fn release_kill_switch(&self, account_id: AccountId, triggered_by: &str) {
        self.kill_switch.store(false, Ordering::SeqCst);
        let mut incident = RiskIncident::new(account_id, RiskAction::KillSwitchReleased);
        incident.triggered_by = Some(triggered_by.to_string());
        if let Err(err) = self.incident_sink.save_incident(&incident).await {
            warn!(%err, "failed to persist kill-switch release incident");
        }
        info!(%account_id, triggered_by, "kill switch released");
    }

    /// `MonitorPositions(account_id)`: one iteration. The caller drives the
    /// ~2s cadence (see [`crate::monitor::spawn_position_monitor`]) so this
    /// stays unit-testable without a real clock.
    pub async fn monitor_positions_once(&self, ctx: &PreTradeContext<'_>, max_exposure: Option<Decimal>) {
        if !ctx.daily_loss.is_zero() {
            self.notifier
                .notify_daily_loss(ctx.order.account_id, ctx.daily_loss)
                .await;
        }
        let Some(max_exposure) = max_exposure else { return };
        let exposure = ctx.total_exposure();
        if exposure <= max_exposure {
            return;
        }
        warn!(%exposure, %max_exposure, "aggregate exposure breach, flattening account");
        if let Err(err) = self.position_closer.close_all_positions(ctx.order.account_id, None).await {
            warn!(%err, "failed to close positions on exposure breach");
            return;
        }
        let mut incident = RiskIncident::new(ctx.order.account_id, RiskAction::PositionReduced);
        incident.rule_type = Some(RiskRuleType::MaxExposure);
        incident
            .observed_values
            .insert("exposure".to_string(), serde_json::Value::String(exposure.to_string()));
        if let Err(err) = self.incident_sink.save_incident(&incident).await {
            warn!(%err, "failed to persist position-reduced incident");
        }
    }
}

async fn retry_best_effort<F, Fut>(attempts: u32, mut op: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    for attempt in 0..attempts {
        match op().await {
            Ok(()) => return,
            Err(err) => {
                warn!(attempt, %err, "kill-switch compensating action failed, retrying");
                if attempt + 1 < attempts {
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NoopCollaborators;
    use mtrader_types::{AccountSnapshot, ClientOrderId, Order, OrderKind, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn engine() -> RiskEngine {
        let noop = Arc::new(NoopCollaborators);
        RiskEngine::new(noop.clone(), noop.clone(), noop.clone(), noop.clone(), noop)
    }

    fn order() -> Order {
        Order::new(
            ClientOrderId::new("x"),
            AccountId(Uuid::new_v4()),
            "EURUSD",
            Side::Buy,
            OrderKind::Market,
            dec!(0.1),
        )
    }

    #[tokio::test]
    async fn kill_switch_rejects_every_pretrade_check() {
        let engine = engine();
        let order = order();
        let account = AccountSnapshot {
            balance: dec!(1000),
            equity: dec!(1000),
            margin: Decimal::ZERO,
            free_margin: dec!(1000),
            margin_level: Decimal::ZERO,
            profit: Decimal::ZERO,
            leverage: dec!(100),
        };
        engine.kill_switch(order.account_id, "breach", "op1").await;
        let ctx = PreTradeContext {
            order: &order,
            account: &account,
            positions: &[],
            market: None,
            now: Utc::now(),
            last_trade_at: None,
            daily_loss: Decimal::ZERO,
        };
        let approval = engine.pre_trade_check(ctx).await;
        assert!(!approval.approved);
        assert_eq!(approval.reason.as_deref(), Some("Kill switch active"));
    }

    #[tokio::test]
    async fn approval_records_last_trade_timestamp() {
        let engine = engine();
        let order = order();
        let account = AccountSnapshot {
            balance: dec!(100000),
            equity: dec!(100000),
            margin: Decimal::ZERO,
            free_margin: dec!(100000),
            margin_level: Decimal::ZERO,
            profit: Decimal::ZERO,
            leverage: dec!(100),
        };
        let now = Utc::now();
        let ctx = PreTradeContext {
            order: &order,
            account: &account,
            positions: &[],
            market: None,
            now,
            last_trade_at: None,
            daily_loss: Decimal::ZERO,
        };
        let approval = engine.pre_trade_check(ctx).await;
        assert!(approval.approved);
        assert_eq!(engine.last_trade_at(order.account_id), Some(now));
    }
}
