use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
