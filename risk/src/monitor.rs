//! Drives [`RiskEngine::monitor_positions_once`] on a periodic cadence,
//! cancellable the way the teacher's `AsyncShutdown` components are:
//! a watch channel flips to `true` and the loop exits on its next tick.

use crate::context::PreTradeContext;
use crate::engine::RiskEngine;
use mtrader_types::{AccountSnapshot, Order, Position};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Per-tick inputs for the position monitor, supplied by a closure since
/// they must be re-read from the connector/repository on every iteration.
#[async_trait::async_trait]
pub trait MonitorFeed: Send + Sync {
    async fn account_info(&self) -> Result<AccountSnapshot, String>;
    async fn open_positions(&self) -> Result<Vec<Position>, String>;
    async fn daily_loss(&self) -> Result<Decimal, String>;
}

/// Spawns the `~2s` position-monitor loop. Returns a handle plus the
/// sending half of the cancellation switch; drop the sender or send `true`
/// to stop the loop.
pub fn spawn_position_monitor(
    engine: Arc<RiskEngine>,
    feed: Arc<dyn MonitorFeed>,
    account: mtrader_types::AccountId,
    max_exposure: Option<Decimal>,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (tx, mut rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = run_once(&engine, feed.as_ref(), account, max_exposure).await {
                        tracing::warn!(%err, "position monitor tick failed");
                    }
                }
                _ = rx.changed() => {
                    if *rx.borrow() {
                        info!(%account, "position monitor shutting down");
                        break;
                    }
                }
            }
        }
    });
    (handle, tx)
}

async fn run_once(
    engine: &RiskEngine,
    feed: &dyn MonitorFeed,
    account: mtrader_types::AccountId,
    max_exposure: Option<Decimal>,
) -> Result<(), String> {
    let account_info = feed.account_info().await?;
    let positions = feed.open_positions().await?;
    let daily_loss = feed.daily_loss().await?;

    // The monitor has no single candidate order; it uses a zero-quantity
    // placeholder so `PreTradeContext`'s exposure helpers still operate over
    // the live position book.
    let placeholder = Order::new(
        mtrader_types::ClientOrderId::new("__monitor__"),
        account,
        "",
        mtrader_types::Side::Buy,
        mtrader_types::OrderKind::Market,
        Decimal::ZERO,
    );
    let ctx = PreTradeContext {
        order: &placeholder,
        account: &account_info,
        positions: &positions,
        market: None,
        now: chrono::Utc::now(),
        last_trade_at: engine.last_trade_at(account),
        daily_loss,
    };
    engine.monitor_positions_once(&ctx, max_exposure).await;
    Ok(())
}
