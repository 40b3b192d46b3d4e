use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid object ID: {0}")]
    InvalidObjectId(String),
    #[error("invalid change status: {0}")]
    InvalidStatus(String),
    #[error("invalid ref name: {0}")]
    InvalidRefName(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}
