use std::path::PathBuf;

/// Errors from backing store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying file or mapping.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A window or resize was requested outside the current store size.
    #[error("range {offset}+{length} is outside the store (size {size})")]
    OutOfBounds { offset: u64, length: u64, size: u64 },

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// Another handle holds a conflicting lock on the file.
    #[error("store file {0} is locked by another handle")]
    Locked(PathBuf),

    /// The requested combination of open modes cannot be honoured.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
