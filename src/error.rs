use thiserror::Error;

/// Validation failures raised locally by `make_plan` before any plan
/// state is created.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target_qty must be positive, got {target_qty}")]
    NonPositiveQty { target_qty: i64 },

    #[error("intent_id must not be empty")]
    EmptyIntentId,

    #[error("expire_ts ({expire_ts}) must be after signal_ts ({signal_ts})")]
    ExpiryBeforeSignal { signal_ts: i64, expire_ts: i64 },

    #[error("unknown algorithm for intent {intent_id}")]
    UnknownAlgorithm { intent_id: String },

    #[error("VWAP volume profile cannot allocate target_qty {target_qty} across {buckets} buckets without violating min_slice_qty ({min_slice_qty})")]
    InfeasibleProfile {
        target_qty: i64,
        buckets: usize,
        min_slice_qty: i64,
    },
}

impl ValidationError {
    /// Stable machine-readable code carried on `INTENT_REJECTED` events.
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::NonPositiveQty { .. } => "NON_POSITIVE_QTY",
            ValidationError::EmptyIntentId => "EMPTY_INTENT_ID",
            ValidationError::ExpiryBeforeSignal { .. } => "EXPIRY_BEFORE_SIGNAL",
            ValidationError::UnknownAlgorithm { .. } => "UNKNOWN_ALGORITHM",
            ValidationError::InfeasibleProfile { .. } => "INFEASIBLE_PROFILE",
        }
    }
}

/// Gateway-facing errors, surfaced by an injected `OrderGateway`
/// implementation. The core never constructs these itself;
/// they exist so a driver can report gateway failures in a shape the
/// core's audit trail understands.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("network error talking to gateway: {0}")]
    Network(String),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("gateway timed out")]
    Timeout,
}

/// Top-level error taxonomy for executor operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("risk veto: dispatch blocked by circuit breaker")]
    RiskVeto,

    #[error("plan cancelled: {0}")]
    Cancelled(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ExecutorError {
    pub fn error_code(&self) -> String {
        match self {
            ExecutorError::Validation(e) => e.error_code().to_string(),
            ExecutorError::Gateway(_) => "GATEWAY_ERROR".to_string(),
            ExecutorError::RiskVeto => "RISK_VETO".to_string(),
            ExecutorError::Cancelled(_) => "CANCELLED".to_string(),
            ExecutorError::InvariantViolation(_) => "INVARIANT_VIOLATION".to_string(),
        }
    }
}
