use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("store error: {0}")]
    Store(#[from] gavel_store::StoreError),
    #[error("core error: {0}")]
    Core(#[from] gavel_core::CoreError),
}
