//! Topic ACL (spec §4.5 "Topic ACL"): a subscription's topic must start
//! with one of the user-bound prefixes, parameterized by the token's `sub`.

pub const ALLOWED_PREFIXES: &[&str] = &[
    "user",
    "account_updates",
    "position_updates",
    "order_updates",
    "market_data",
    "calendar_updates",
    "strategy_signals",
];

/// `true` if `topic` starts with `{prefix}:{subject}` for an allowed prefix —
/// matches multi-segment topics like `market_data:{subject}:EURUSD`, not
/// just an exact `{prefix}:{subject}`.
pub fn is_topic_permitted(topic: &str, subject: &str) -> bool {
    ALLOWED_PREFIXES.iter().any(|prefix| {
        topic
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|owner| owner.starts_with(subject))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_prefixed_topics_are_permitted() {
        assert!(is_topic_permitted("user:alice", "alice"));
        assert!(is_topic_permitted("order_updates:alice", "alice"));
        assert!(is_topic_permitted("strategy_signals:alice", "alice"));
    }

    #[test]
    fn multi_segment_topics_under_the_subject_are_permitted() {
        assert!(is_topic_permitted("market_data:alice:EURUSD", "alice"));
    }

    #[test]
    fn other_users_topics_are_forbidden() {
        assert!(!is_topic_permitted("user:bob", "alice"));
        assert!(!is_topic_permitted("account_updates:bob", "alice"));
    }

    #[test]
    fn unknown_prefixes_are_forbidden() {
        assert!(!is_topic_permitted("admin_console:alice", "alice"));
    }

    #[test]
    fn prefix_without_colon_separator_is_forbidden() {
        assert!(!is_topic_permitted("useralice", "alice"));
    }
}
