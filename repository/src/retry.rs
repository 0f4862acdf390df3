//! Transient-failure retry: `0.2 · 2^attempt` seconds backoff, up to 3
//! attempts, matching `PostgresRepository._execute_retry` in the original
//! Python service. Only errors classified [`RepositoryError::is_transient`]
//! are retried; anything else propagates immediately.

use crate::error::RepositoryError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub const MAX_ATTEMPTS: u32 = 3;

pub async fn with_retry<F, Fut, T>(mut op: F) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                let delay = Duration::from_secs_f64(0.2 * 2f64.powi(attempt as i32));
                warn!(attempt, %err, "transient repository error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
