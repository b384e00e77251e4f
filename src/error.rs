//! Error taxonomy for the evaluation orchestrator

use thiserror::Error;

/// Result type used across the orchestration pipeline
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Errors raised while submitting, tracking, and merging trials
#[derive(Error, Debug)]
pub enum EvalError {
    /// No adapter family matches the model identifier
    #[error("Unsupported model: {model_id}")]
    UnsupportedModel { model_id: String },

    /// An external provider or blob-store call failed
    #[error("Provider call '{operation}' failed: {message}")]
    ProviderCall { operation: String, message: String },

    /// The job completed but its artifact held nothing usable
    #[error("No result data for job {job_handle}: {reason}")]
    NoResultData { job_handle: String, reason: String },

    /// Run record absent from the record store
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// Slot outside the run's slot universe
    #[error("Unknown slot '{slot}' for run {run_id}")]
    UnknownSlot { run_id: String, slot: String },

    /// Run identifiers key files and blobs, so their alphabet is restricted
    #[error("Invalid run id: {0:?}")]
    InvalidRunId(String),

    #[error("Invalid blob location: {0}")]
    InvalidBlobLocation(String),

    /// Record store read or write failed
    #[error("Storage failed: {0}")]
    Storage(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EvalError {
    pub fn provider(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EvalError::ProviderCall {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn no_result(job_handle: impl Into<String>, reason: impl Into<String>) -> Self {
        EvalError::NoResultData {
            job_handle: job_handle.into(),
            reason: reason.into(),
        }
    }

    /// Whether re-invoking the same step later can succeed.
    ///
    /// Nothing in this crate retries; the scheduling layer reads this.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EvalError::ProviderCall { .. } | EvalError::Storage(_))
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EvalError {
    fn from(err: std::io::Error) -> Self {
        EvalError::Storage(err.to_string())
    }
}
