use gavel_core::id::{ChangeId, ObjectId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such ref: {0}")]
    NoSuchRef(String),
    #[error("no such commit: {0}")]
    NoSuchCommit(ObjectId),
    #[error("no such change: {0}")]
    NoSuchChange(ChangeId),
    #[error("no such revision: {0}")]
    NoSuchRevision(ObjectId),
    #[error("ref {name} moved concurrently (expected {expected:?}, found {actual:?})")]
    RefConflict {
        name: String,
        expected: Option<ObjectId>,
        actual: Option<ObjectId>,
    },
    #[error("ref {0} update is not a fast-forward")]
    NotFastForward(String),
    #[error("status precondition failed for change {0}")]
    StatusConflict(ChangeId),
    #[error("core error: {0}")]
    Core(#[from] gavel_core::CoreError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Precondition conflicts are recoverable by re-reading and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::RefConflict { .. } | StoreError::StatusConflict(_)
        )
    }
}
