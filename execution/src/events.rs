//! Event bus: callbacks keyed by event name, invoked with the serialized
//! order payload. Emission is decoupled from handler latency by a bounded
//! channel and a dedicated dispatch task — a slow or blocking handler
//! cannot stall [`crate::ExecutionEngine::submit`] (design note §9:
//! "Callbacks for events").

use mtrader_types::Order;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::error;

/// The five lifecycle events the execution engine emits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    OrderCreated,
    OrderUpdated,
    OrderFilled,
    OrderRejected,
    OrderCanceled,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::OrderCreated => "order_created",
            EventKind::OrderUpdated => "order_updated",
            EventKind::OrderFilled => "order_filled",
            EventKind::OrderRejected => "order_rejected",
            EventKind::OrderCanceled => "order_canceled",
        };
        f.write_str(name)
    }
}

/// A single emission: the event kind plus the order as it stood at that
/// moment (handlers receive their own clone, decoupled from the engine's
/// live state).
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEvent {
    pub kind: EventKind,
    pub order: Order,
}

pub type Handler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Publish/subscribe facade over a bounded `mpsc` channel. `emit` never
/// blocks on handler execution: it pushes onto the channel and a single
/// background task drains it, invoking every handler registered for that
/// event kind. A handler that panics is caught and logged; it never
/// poisons the bus or the caller.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
    sender: mpsc::Sender<ExecutionEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

const CHANNEL_CAPACITY: usize = 1024;

impl EventBus {
    pub fn new() -> Arc<Self> {
        let (sender, mut receiver) = mpsc::channel::<ExecutionEvent>(CHANNEL_CAPACITY);
        let bus = Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            sender,
        });
        let dispatch_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let handlers = dispatch_bus.handlers.read().await;
                if let Some(registered) = handlers.get(&event.kind) {
                    for handler in registered {
                        let handler = Arc::clone(handler);
                        let event = event.clone();
                        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                            error!(?panic, event = %event.kind, order_id = %event.order.id, "event handler panicked");
                        }
                    }
                }
            }
        });
        bus
    }

    /// Registers a handler for `kind`. Handlers accumulate; there is no
    /// way to unregister, matching the teacher-style "sets of handlers"
    /// wired once at process startup.
    pub async fn on(&self, kind: EventKind, handler: Handler) {
        self.handlers.write().await.entry(kind).or_default().push(handler);
    }

    /// Enqueues `event` for dispatch. Returns immediately; a full channel
    /// (handlers falling behind) applies backpressure to the emitter
    /// rather than dropping the event.
    pub async fn emit(&self, kind: EventKind, order: Order) {
        if self.sender.send(ExecutionEvent { kind, order }).await.is_err() {
            error!("event bus dispatch task is gone, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtrader_types::{AccountId, ClientOrderId, OrderKind, Side};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn sample_order() -> Order {
        Order::new(
            ClientOrderId::new("evt-1"),
            AccountId(Uuid::new_v4()),
            "EURUSD",
            Side::Buy,
            OrderKind::Market,
            dec!(0.1),
        )
    }

    #[tokio::test]
    async fn registered_handler_observes_emitted_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        bus.on(EventKind::OrderCreated, Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .await;
        bus.emit(EventKind::OrderCreated, sample_order()).await;
        // Give the dispatch task a tick to run.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        bus.on(EventKind::OrderCreated, Arc::new(|_event| panic!("boom"))).await;
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        bus.on(EventKind::OrderCreated, Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .await;
        bus.emit(EventKind::OrderCreated, sample_order()).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
