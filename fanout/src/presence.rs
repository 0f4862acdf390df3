//! Connection presence: the per-socket record other instances consult to
//! route cross-instance broadcasts (spec §3 "Connection Presence").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TTL applied to every presence record and subscription set in the bus.
pub const PRESENCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// `ws:connections:{connection_id}` — advertises a live connection to
/// other instances in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPresence {
    pub connection_id: String,
    pub user_id: String,
    pub session_id: String,
    pub instance_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ConnectionPresence {
    pub fn new(connection_id: String, user_id: String, session_id: String, instance_id: String) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            user_id,
            session_id,
            instance_id,
            connected_at: now,
            last_heartbeat: now,
        }
    }

    /// The watchdog closes the socket with 1001 if this is older than 90s
    /// at the 30s inspection cadence (spec §4.5 "Heartbeat watchdog").
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.last_heartbeat > max_age
    }
}
