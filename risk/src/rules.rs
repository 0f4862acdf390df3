//! The rule catalog: one evaluator per [`RiskRuleType`], dispatched by a
//! plain `match` rather than a trait-object registry — adding a rule means
//! adding both a variant (in `mtrader-types`) and an arm here, mirroring the
//! "tagged sum + registry of evaluator functions" shape from design note §9.

use crate::context::PreTradeContext;
use mtrader_types::{RiskParameters, RiskRule, RiskRuleType};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

/// Result of evaluating a single rule against a context.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub violated: bool,
    pub observed: RiskParameters,
}

impl RuleOutcome {
    fn ok(observed: RiskParameters) -> Self {
        Self { violated: false, observed }
    }

    fn violation(observed: RiskParameters) -> Self {
        Self { violated: true, observed }
    }
}

fn decimal_param(params: &RiskParameters, key: &str) -> Option<Decimal> {
    match params.get(key)? {
        JsonValue::Number(n) => n.as_f64().and_then(Decimal::from_f64_retain),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn u64_param(params: &RiskParameters, key: &str) -> Option<u64> {
    match params.get(key)? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn observed(key: &str, value: impl Into<JsonValue>) -> RiskParameters {
    let mut map = RiskParameters::new();
    map.insert(key.to_string(), value.into());
    map
}

fn decimal_to_json(value: Decimal) -> JsonValue {
    JsonValue::String(value.to_string())
}

/// Evaluates one rule instance against the supplied context. A rule whose
/// required parameter or market input is missing is treated as satisfied
/// (not violated) rather than guessed — absent data cannot breach a limit.
pub fn evaluate(rule: &RiskRule, ctx: &PreTradeContext<'_>) -> RuleOutcome {
    use RiskRuleType::*;
    match rule.rule_type {
        MaxPositionSize => {
            let Some(max_percent) = decimal_param(&rule.parameters, "max_percent") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            if ctx.account.equity.is_zero() {
                return RuleOutcome::ok(RiskParameters::new());
            }
            let ratio = ctx.candidate_notional() / ctx.account.equity;
            let obs = observed("ratio", decimal_to_json(ratio));
            if ratio > max_percent {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxDrawdown => {
            let Some(max_drawdown) = decimal_param(&rule.parameters, "max_drawdown") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let drawdown = ctx.account.drawdown();
            let obs = observed("drawdown", decimal_to_json(drawdown));
            if drawdown > max_drawdown {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxDailyLoss => {
            let Some(max_daily_loss) = decimal_param(&rule.parameters, "max_daily_loss") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            if ctx.account.balance.is_zero() {
                return RuleOutcome::ok(RiskParameters::new());
            }
            let loss_ratio = ctx.daily_loss.min(Decimal::ZERO).abs() / ctx.account.balance;
            let obs = observed("loss_ratio", decimal_to_json(loss_ratio));
            if loss_ratio > max_daily_loss {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxLeverage => {
            let Some(max_leverage) = decimal_param(&rule.parameters, "max_leverage") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            if ctx.account.equity.is_zero() {
                return RuleOutcome::ok(RiskParameters::new());
            }
            let leverage = (ctx.total_exposure() + ctx.candidate_notional()) / ctx.account.equity;
            let obs = observed("leverage", decimal_to_json(leverage));
            if leverage > max_leverage {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MinTimeBetweenTrades => {
            let Some(seconds) = u64_param(&rule.parameters, "seconds") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let Some(last_trade_at) = ctx.last_trade_at else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let elapsed = (ctx.now - last_trade_at).num_seconds().max(0) as u64;
            let obs = observed("elapsed_seconds", JsonValue::from(elapsed));
            if elapsed < seconds {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        CorrelationLimit => {
            let Some(max_corr) = decimal_param(&rule.parameters, "max_corr") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let Some(market) = ctx.market else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let max_observed = market.correlations.values().copied().max();
            let Some(max_observed) = max_observed else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let obs = observed("max_correlation", decimal_to_json(max_observed));
            if max_observed > max_corr {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxSymbolConcentration => {
            let Some(max_percent) = decimal_param(&rule.parameters, "max_percent") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let total = ctx.total_exposure() + ctx.candidate_notional();
            if total.is_zero() {
                return RuleOutcome::ok(RiskParameters::new());
            }
            let symbol_share =
                (ctx.symbol_exposure(&ctx.order.symbol) + ctx.candidate_notional()) / total;
            let obs = observed("symbol_share", decimal_to_json(symbol_share));
            if symbol_share > max_percent {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxOpenPositions => {
            let Some(cap) = u64_param(&rule.parameters, "max_open_positions") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let count = ctx.open_position_count() as u64;
            let obs = observed("open_positions", JsonValue::from(count));
            if count > cap {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxOrderCount => {
            let Some(cap) = u64_param(&rule.parameters, "max_order_count") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let Some(observed_count) = u64_param(&rule.parameters, "observed_order_count") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let obs = observed("order_count", JsonValue::from(observed_count));
            if observed_count > cap {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxExposure => {
            let Some(max_exposure) = decimal_param(&rule.parameters, "max_exposure") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let exposure = ctx.total_exposure() + ctx.candidate_notional();
            let obs = observed("exposure", decimal_to_json(exposure));
            if exposure > max_exposure {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        StopLossRequired => {
            let present = ctx.order.stop_price.is_some();
            let obs = observed("stop_price_present", JsonValue::from(present));
            if present {
                RuleOutcome::ok(obs)
            } else {
                RuleOutcome::violation(obs)
            }
        }
        TakeProfitRequired => {
            let present = ctx.order.limit_price.is_some();
            let obs = observed("limit_price_present", JsonValue::from(present));
            if present {
                RuleOutcome::ok(obs)
            } else {
                RuleOutcome::violation(obs)
            }
        }
        MaxSpread => {
            let Some(max_spread) = decimal_param(&rule.parameters, "max_spread") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let Some(spread) = ctx.market.and_then(|m| m.spread) else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let obs = observed("spread", decimal_to_json(spread));
            if spread > max_spread {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        MaxSlippage => {
            let Some(max_slippage) = decimal_param(&rule.parameters, "max_slippage") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let Some(slippage) = ctx.market.and_then(|m| m.slippage) else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let obs = observed("slippage", decimal_to_json(slippage));
            if slippage > max_slippage {
                RuleOutcome::violation(obs)
            } else {
                RuleOutcome::ok(obs)
            }
        }
        TradingHoursOnly => {
            let Some(JsonValue::Array(windows)) = rule.parameters.get("windows") else {
                return RuleOutcome::ok(RiskParameters::new());
            };
            let hour = ctx.now.format("%H").to_string().parse::<i64>().unwrap_or(0);
            let in_window = windows.iter().any(|window| {
                let Some(bounds) = window.as_array() else { return false };
                let (Some(start), Some(end)) = (
                    bounds.first().and_then(JsonValue::as_i64),
                    bounds.get(1).and_then(JsonValue::as_i64),
                ) else {
                    return false;
                };
                hour >= start && hour < end
            });
            let obs = observed("hour", JsonValue::from(hour));
            if in_window {
                RuleOutcome::ok(obs)
            } else {
                RuleOutcome::violation(obs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mtrader_types::{AccountId, AccountSnapshot, ClientOrderId, OrderKind, Severity, Side};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn account(balance: Decimal, equity: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            balance,
            equity,
            margin: Decimal::ZERO,
            free_margin: equity,
            margin_level: Decimal::ZERO,
            profit: equity - balance,
            leverage: dec!(100),
        }
    }

    #[test]
    fn max_drawdown_violation_matches_spec_scenario_4() {
        let acc = account(dec!(1000), dec!(700));
        let order = mtrader_types::Order::new(
            ClientOrderId::new("x"),
            AccountId(Uuid::new_v4()),
            "EURUSD",
            Side::Buy,
            OrderKind::Market,
            dec!(0.1),
        );
        let ctx = PreTradeContext {
            order: &order,
            account: &acc,
            positions: &[],
            market: None,
            now: Utc::now(),
            last_trade_at: None,
            daily_loss: Decimal::ZERO,
        };
        let mut params = RiskParameters::new();
        params.insert("max_drawdown".to_string(), JsonValue::from(0.2));
        let rule = RiskRule::new(RiskRuleType::MaxDrawdown, params, Severity::Hard);
        let outcome = evaluate(&rule, &ctx);
        assert!(outcome.violated);
    }

    #[test]
    fn missing_parameter_never_violates() {
        let acc = account(dec!(1000), dec!(1000));
        let order = mtrader_types::Order::new(
            ClientOrderId::new("x"),
            AccountId(Uuid::new_v4()),
            "EURUSD",
            Side::Buy,
            OrderKind::Market,
            dec!(0.1),
        );
        let ctx = PreTradeContext {
            order: &order,
            account: &acc,
            positions: &[],
            market: None,
            now: Utc::now(),
            last_trade_at: None,
            daily_loss: Decimal::ZERO,
        };
        let rule = RiskRule::new(RiskRuleType::MaxDrawdown, RiskParameters::new(), Severity::Hard);
        assert!(!evaluate(&rule, &ctx).violated);
    }
}
