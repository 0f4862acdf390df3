//! Fan-out layer error taxonomy.

/// WebSocket close codes the fan-out layer applies (spec §6 "Close codes").
pub mod close_code {
    /// Idle connection or lost presence record.
    pub const IDLE_OR_PRESENCE_LOST: u16 = 1001;
    /// Internal error.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Unauthorized: missing token or disallowed topic.
    pub const UNAUTHORIZED: u16 = 4001;
    /// Rate or connection limit breached.
    pub const RATE_LIMITED: u16 = 4002;
    /// Session revoked (periodic revalidation failed).
    pub const SESSION_REVOKED: u16 = 4003;
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("shared bus error: {0}")]
    Bus(String),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("connection limit exceeded for ip {0}")]
    ConnectionLimit(String),
    #[error("topic {topic} is not permitted for subject {subject}")]
    TopicForbidden { topic: String, subject: String },
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("missing token")]
    Missing,
    #[error("malformed or invalid signature: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    #[error("device fingerprint mismatch")]
    FingerprintMismatch,
    #[error("wrong token type, expected {expected}")]
    WrongType { expected: &'static str },
}
