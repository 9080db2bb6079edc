use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("app id {0} does not fit in a signed 64-bit column")]
    AppIdOutOfRange(u64),

    #[error("amount {0} cannot be recorded")]
    InvalidAmount(f64),

    #[error("corrupt journal row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
