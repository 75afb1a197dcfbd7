use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse node info {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid identity in {path}: {reason}")]
    InvalidIdentity { path: String, reason: String },

    #[error("Failed to encode node info: {0}")]
    Encode(String),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;
