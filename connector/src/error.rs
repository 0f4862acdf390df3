//! Connector error taxonomy and the broker retcode table.

/// Errors surfaced by [`crate::BrokerConnector`] and [`crate::BrokerBackend`]
/// implementations.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("symbol {symbol} unknown or not tradeable: {reason}")]
    InvalidSymbol { symbol: String, reason: String },
    #[error("volume {volume} outside [{min}, {max}] step {step} for {symbol}")]
    InvalidVolume {
        symbol: String,
        volume: rust_decimal::Decimal,
        min: rust_decimal::Decimal,
        max: rust_decimal::Decimal,
        step: rust_decimal::Decimal,
    },
    #[error("price not aligned to tick size for {symbol}")]
    InvalidPrice { symbol: String },
    #[error("stop distance below minimum stops level for {symbol}")]
    InvalidStops { symbol: String },
    #[error("symbol {0} could not be selected for market data")]
    SymbolSelectFailed(String),
    #[error("insufficient margin: required {required}, free {free}")]
    InsufficientMargin {
        required: rust_decimal::Decimal,
        free: rust_decimal::Decimal,
    },
    #[error("broker rejected request: retcode {retcode} ({message})")]
    Rejected { retcode: i32, message: String },
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Classifies an order-submission retcode against the broker's success set.
/// Unmapped codes are treated as failure (spec: "any unmapped retcode is
/// non-fatal but treated as failure").
pub fn is_execute_success(retcode: i32) -> bool {
    matches!(
        retcode,
        10008 | 10009 | 10010 | 10011 | 10012 | 10013 | 10018 | 10019
    )
}

pub fn is_modify_success(retcode: i32) -> bool {
    matches!(retcode, 10009 | 10016)
}

pub fn is_cancel_success(retcode: i32) -> bool {
    matches!(retcode, 10014 | 10015)
}

pub fn is_close_success(retcode: i32) -> bool {
    matches!(retcode, 10012 | 10013)
}

/// Human-readable message for a known retcode; unknown codes format with
/// their numeric value rather than panicking.
pub fn retcode_message(retcode: i32) -> String {
    match retcode {
        10004 => "requote".to_string(),
        10006 => "request rejected".to_string(),
        10007 => "request canceled by trader".to_string(),
        10008 => "order placed".to_string(),
        10009 => "request completed".to_string(),
        10010 => "only part of request completed".to_string(),
        10011 => "request processing error".to_string(),
        10012 => "request canceled by timeout".to_string(),
        10013 => "invalid request".to_string(),
        10014 => "invalid volume".to_string(),
        10015 => "invalid price".to_string(),
        10016 => "invalid stops".to_string(),
        10017 => "trade disabled".to_string(),
        10018 => "market closed".to_string(),
        10019 => "insufficient funds".to_string(),
        10031 => "no connection with trade server".to_string(),
        other => format!("unknown retcode {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_success_set_matches_spec() {
        for code in [10008, 10009, 10010, 10011, 10012, 10013, 10018, 10019] {
            assert!(is_execute_success(code), "{code} should be a success code");
        }
        assert!(!is_execute_success(10014));
    }

    #[test]
    fn modify_and_cancel_and_close_sets_are_disjoint_subsets() {
        assert!(is_modify_success(10009));
        assert!(is_modify_success(10016));
        assert!(is_cancel_success(10014));
        assert!(is_cancel_success(10015));
        assert!(is_close_success(10012));
        assert!(is_close_success(10013));
    }

    #[test]
    fn unknown_retcode_formats_with_number() {
        assert_eq!(retcode_message(424242), "unknown retcode 424242");
    }
}
