//! Execution engine error taxonomy.

use mtrader_types::{InvalidStatusTransition, OrderId};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("order must be pending to submit")]
    NotPending,
    #[error(transparent)]
    InvalidTransition(#[from] InvalidStatusTransition),
    #[error("lost update: order {0} was modified concurrently")]
    LostUpdate(OrderId),
    #[error(transparent)]
    Connector(#[from] mtrader_connector::ConnectorError),
    #[error(transparent)]
    Repository(#[from] mtrader_repository::RepositoryError),
}
