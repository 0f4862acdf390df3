//! Periodic reconciliation: resolves the "submit succeeded at broker but
//! persistence failed" partial-failure scenario (spec §7) by replaying the
//! connector's idempotent `ExecuteOrder` for every order still open —
//! since a duplicate call never resubmits and instead reports the broker's
//! existing `broker_order_id`, calling it again is a safe, side-effect-free
//! way to discover state the engine's own write may have lost.

use crate::engine::ExecutionEngine;
use mtrader_connector::BrokerBackend;
use mtrader_repository::{OrderRepository, OrderStatusUpdate};
use mtrader_types::{AccountId, BrokerOrderId, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Spawns the reconciliation loop for `account_id`. Send `true` on the
/// returned sender (or drop it) to stop the loop, mirroring
/// [`mtrader_risk::spawn_position_monitor`]'s cancellation shape.
pub fn spawn_reconciliation<B: BrokerBackend + 'static>(
    engine: Arc<ExecutionEngine<B>>,
    repository: Arc<dyn OrderRepository>,
    account_id: AccountId,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (tx, mut rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = run_once(engine.as_ref(), repository.as_ref(), account_id).await {
                        warn!(%err, %account_id, "reconciliation tick failed");
                    }
                }
                _ = rx.changed() => {
                    if *rx.borrow() {
                        info!(%account_id, "reconciliation loop shutting down");
                        break;
                    }
                }
            }
        }
    });
    (handle, tx)
}

async fn run_once<B: BrokerBackend + 'static>(
    engine: &ExecutionEngine<B>,
    repository: &dyn OrderRepository,
    account_id: AccountId,
) -> Result<(), String> {
    let open_orders = repository.get_open_orders(account_id).await.map_err(|err| err.to_string())?;
    for order in open_orders {
        if order.status != OrderStatus::Validated {
            // SUBMITTED/PARTIAL orders already carry a broker_order_id;
            // nothing short of a fill callback moves them further here.
            continue;
        }
        let outcome = match engine.connector().execute_order(&order).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, order_id = %order.id, "reconciliation could not reach broker");
                continue;
            }
        };
        if !outcome.ok {
            continue;
        }
        let update = OrderStatusUpdate {
            broker_order_id: outcome.broker_order_id.map(BrokerOrderId),
            retcode: outcome.retcode,
            retcode_message: outcome.retcode_message,
            opened_at: Some(chrono::Utc::now()),
            ..Default::default()
        };
        match engine.update_status(order.id, OrderStatus::Submitted, update).await {
            Ok(updated) => info!(order_id = %updated.id, "reconciliation completed missing SUBMITTED transition"),
            Err(err) => warn!(%err, order_id = %order.id, "reconciliation failed to apply transition"),
        }
    }
    Ok(())
}
