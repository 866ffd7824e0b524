use thiserror::Error;

/// Error taxonomy for the gate.
///
/// Every stage converts these into a `Rejected`/`Blocked` decision at its
/// boundary; only configuration errors are fatal.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error at {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("stale data: snapshot is {age_ms}ms old (max {max_age_ms}ms)")]
    StaleData { age_ms: i64, max_age_ms: i64 },

    #[error("unknown trade id: {0}")]
    UnknownTrade(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl GateError {
    pub fn persistence(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        GateError::Persistence {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Lock poisoning means a writer panicked mid-update.
    pub fn poisoned(what: &str) -> Self {
        GateError::Internal(format!("{what} lock poisoned"))
    }
}

pub type GateResult<T> = std::result::Result<T, GateError>;
