//! Broker login credentials, loaded from the process environment.

use crate::error::ConnectorError;
use std::env;

/// Credentials used by [`crate::BrokerBackend::connect`].
///
/// Mirrors the terminal login contract of a typical retail-broker SDK
/// (activation key / account login / password triplet).
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub login: String,
    pub password: String,
    pub server: String,
}

impl BrokerCredentials {
    /// Loads credentials from `MTRADER_BROKER_LOGIN` / `MTRADER_BROKER_PASSWORD`
    /// / `MTRADER_BROKER_SERVER`. All three are required.
    pub fn from_env() -> Result<Self, ConnectorError> {
        let login = env::var("MTRADER_BROKER_LOGIN")
            .map_err(|_| ConnectorError::Credentials("MTRADER_BROKER_LOGIN not set".into()))?;
        let password = env::var("MTRADER_BROKER_PASSWORD")
            .map_err(|_| ConnectorError::Credentials("MTRADER_BROKER_PASSWORD not set".into()))?;
        let server = env::var("MTRADER_BROKER_SERVER")
            .map_err(|_| ConnectorError::Credentials("MTRADER_BROKER_SERVER not set".into()))?;
        Ok(Self { login, password, server })
    }
}
