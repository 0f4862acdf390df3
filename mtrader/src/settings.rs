//! Process configuration, loaded from the environment the way
//! `mtrader_connector::BrokerCredentials::from_env` loads broker login
//! details — one `MTRADER_*` variable per field, required fields fail
//! fast at startup rather than falling back silently (spec §7 "Fatal
//! errors ... raised at startup; process must refuse to serve").

use mtrader_repository::PostgresConfig;
use mtrader_types::AccountId;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} not set")]
    MissingVar(&'static str),
    #[error("{0} is not a valid value: {1}")]
    InvalidVar(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub account_id: AccountId,
    pub http_addr: SocketAddr,
    pub postgres: PostgresConfig,
    pub redis_url: Option<String>,
    pub jwt_public_key_path: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub json_logging: bool,
    pub reconciliation_enabled: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let account_id = AccountId(
            required("MTRADER_ACCOUNT_ID")?
                .parse()
                .map_err(|e: uuid::Error| SettingsError::InvalidVar("MTRADER_ACCOUNT_ID", e.to_string()))?,
        );

        let http_addr = optional("MTRADER_HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| SettingsError::InvalidVar("MTRADER_HTTP_ADDR", e.to_string()))?;

        let postgres = PostgresConfig {
            // Unset means "run against the in-memory repository" (see
            // App::build); only validated as a real DSN once a backend
            // actually tries to connect with it.
            url: optional("MTRADER_DATABASE_URL").unwrap_or_default(),
            min_connections: optional("MTRADER_DB_MIN_CONNECTIONS")
                .map(|v| v.parse())
                .transpose()
                .map_err(|e: std::num::ParseIntError| SettingsError::InvalidVar("MTRADER_DB_MIN_CONNECTIONS", e.to_string()))?
                .unwrap_or(2),
            max_connections: optional("MTRADER_DB_MAX_CONNECTIONS")
                .map(|v| v.parse())
                .transpose()
                .map_err(|e: std::num::ParseIntError| SettingsError::InvalidVar("MTRADER_DB_MAX_CONNECTIONS", e.to_string()))?
                .unwrap_or(20),
            command_timeout: Duration::from_secs(30),
        };

        Ok(Self {
            account_id,
            http_addr,
            postgres,
            redis_url: optional("MTRADER_REDIS_URL"),
            jwt_public_key_path: required("MTRADER_JWT_PUBLIC_KEY_PATH")?,
            jwt_issuer: optional("MTRADER_JWT_ISSUER").unwrap_or_else(|| "mtrader".to_string()),
            jwt_audience: optional("MTRADER_JWT_AUDIENCE").unwrap_or_else(|| "mtrader-clients".to_string()),
            json_logging: optional("MTRADER_JSON_LOGGING").as_deref() == Some("1"),
            reconciliation_enabled: optional("MTRADER_DISABLE_RECONCILIATION").is_none(),
        })
    }
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok()
}

fn required(key: &'static str) -> Result<String, SettingsError> {
    env::var(key).map_err(|_| SettingsError::MissingVar(key))
}
