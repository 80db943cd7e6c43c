use governance::GovernanceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record under {tree}: {detail}")]
    Corrupt { tree: &'static str, detail: String },
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<StorageError> for GovernanceError {
    fn from(e: StorageError) -> Self {
        GovernanceError::Storage(e.to_string())
    }
}
