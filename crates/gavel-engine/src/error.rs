use thiserror::Error;

use gavel_merge::MergeError;
use gavel_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
    #[error("{action} denied: {reason}")]
    Denied { action: &'static str, reason: String },
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// Compensation failed after a partial build approval; requires
    /// operator intervention, never hidden behind a retry.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}

impl EngineError {
    /// Precondition conflicts (ref or status CAS races) are surfaced to the
    /// queue as "retry", everything else as a failure for this run.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_conflict(),
            EngineError::Merge(MergeError::Store(e)) => e.is_conflict(),
            _ => false,
        }
    }
}
