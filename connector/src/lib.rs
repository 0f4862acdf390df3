//! Reconnecting, idempotent broker connector.
//!
//! The only portal the execution engine has to the broker: a
//! [`BrokerConnector`] wraps a [`BrokerBackend`] implementation (a real
//! terminal SDK, or [`SimulatedBroker`] for tests and default runs) with
//! login/heartbeat/reconnect lifecycle, an order validation pipeline, and
//! client-order-id deduplication.

#![forbid(unsafe_code)]
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod backend;
mod connector;
mod credentials;
mod error;
mod simulated;

pub use backend::{
    BrokerAction, BrokerBackend, BrokerOrderRequest, BrokerOrderType, ConnectorHealth, ExecuteOutcome, FillingMode,
    RetcodeOutcome, SymbolInfo, TimeInForce, TradeMode, COMMENT_MAX_LEN, DEFAULT_DEVIATION, DEFAULT_MAGIC,
};
pub use connector::{BrokerConnector, ConnectorConfig};
pub use credentials::BrokerCredentials;
pub use error::{
    is_cancel_success, is_close_success, is_execute_success, is_modify_success, retcode_message, ConnectorError,
};
pub use simulated::SimulatedBroker;
