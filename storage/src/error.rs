use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
}
