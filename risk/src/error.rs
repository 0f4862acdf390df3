//! Risk-engine error type.

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RiskError {
    #[error("unknown rule type {0}")]
    UnknownRuleType(String),
    #[error("rule {rule_type} missing required parameter {parameter}")]
    MissingParameter {
        rule_type: mtrader_types::RiskRuleType,
        parameter: String,
    },
    #[error("order-canceling capability failed: {0}")]
    CancelCapability(String),
    #[error("position-closing capability failed: {0}")]
    CloseCapability(String),
    #[error("incident persistence failed: {0}")]
    Persistence(String),
}
