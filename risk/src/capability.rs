//! Interfaces the risk engine is handed at construction, rather than
//! depending on the crates that implement them — breaks the Execution
//! Engine ↔ Risk Engine cycle the kill switch would otherwise create
//! (design note §9) and keeps incident persistence / broadcast pluggable.

use async_trait::async_trait;
use mtrader_types::{AccountId, RiskIncident};
use rust_decimal::Decimal;

/// Supplied by the execution engine so the kill switch can cancel every
/// open order without the risk crate depending on `mtrader-execution`.
#[async_trait]
pub trait OrderCancelingCapability: Send + Sync {
    async fn cancel_all_orders(&self, account_id: AccountId) -> Result<(), String>;
}

/// Supplied by the broker connector so the kill switch and the position
/// monitor can flatten an account without the risk crate depending on
/// `mtrader-connector`.
#[async_trait]
pub trait PositionClosingCapability: Send + Sync {
    async fn close_all_positions(&self, account_id: AccountId, symbol: Option<&str>) -> Result<(), String>;
}

/// Supplied by the repository so incidents are durable without a direct
/// dependency on `mtrader-repository`.
#[async_trait]
pub trait IncidentSink: Send + Sync {
    async fn save_incident(&self, incident: &RiskIncident) -> Result<(), String>;
}

/// Supplied by the fan-out layer so kill-switch events reach subscribed
/// clients (`risk_events` channel) without a dependency on `mtrader-fanout`.
#[async_trait]
pub trait RiskEventBroadcaster: Send + Sync {
    async fn broadcast_risk_event(&self, incident: &RiskIncident) -> Result<(), String>;
}

/// Supplied by the out-of-scope notifier; pings are best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_daily_loss(&self, account_id: AccountId, daily_loss: Decimal);
}

/// No-op implementations used where a deployment has not wired a real
/// collaborator yet (tests, the facade's default run mode).
#[derive(Debug, Default)]
pub struct NoopCollaborators;

#[async_trait]
impl OrderCancelingCapability for NoopCollaborators {
    async fn cancel_all_orders(&self, _account_id: AccountId) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl PositionClosingCapability for NoopCollaborators {
    async fn close_all_positions(&self, _account_id: AccountId, _symbol: Option<&str>) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl IncidentSink for NoopCollaborators {
    async fn save_incident(&self, _incident: &RiskIncident) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl RiskEventBroadcaster for NoopCollaborators {
    async fn broadcast_risk_event(&self, _incident: &RiskIncident) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl Notifier for NoopCollaborators {
    async fn notify_daily_loss(&self, _account_id: AccountId, _daily_loss: Decimal) {}
}
