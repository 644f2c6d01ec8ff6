use thiserror::Error;

/// Custom error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Invalid order: {0} (expected ASC or DESC)")]
    InvalidOrder(String),

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Background task error: {0}")]
    BackgroundTaskError(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StorageError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
