//! Crate-wide error types.

use thiserror::Error;

pub type CallscopeResult<T> = Result<T, CallscopeError>;

#[derive(Debug, Error)]
pub enum CallscopeError {
    #[error("malformed profile: {0}")]
    MalformedProfile(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("unknown metric: {0:?} (expected one of ct, wt, cpu, mu, pmu)")]
    UnknownMetric(String),

    #[error("invalid threshold: {0} (expected a value in [0, 1])")]
    InvalidThreshold(f64),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CallscopeError {
    /// Short machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedProfile(_) => "malformed_profile",
            Self::SymbolNotFound(_) => "symbol_not_found",
            Self::UnknownMetric(_) => "unknown_metric",
            Self::InvalidThreshold(_) => "invalid_threshold",
            Self::RunNotFound(_) => "run_not_found",
            Self::Config(_) => "config",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
        }
    }
}

/// Reject thresholds outside `[0, 1]` before any computation runs.
pub fn validate_threshold(threshold: f64) -> CallscopeResult<f64> {
    if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
        return Err(CallscopeError::InvalidThreshold(threshold));
    }
    Ok(threshold)
}
