use thiserror::Error;

/// Errors surfaced by the store and its write-ahead log.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] std::io::Error),

    #[error("WAL corruption at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    #[error("WAL segment not found: {0}")]
    SegmentNotFound(u64),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("rejected: {0}")]
    ValidationRejected(String),

    #[error("no active staging session")]
    StagingInactive,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        StoreError::ValidationRejected(reason.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
