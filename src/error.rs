//! Error types for the kvgram library.
//!
//! All fallible operations return [`KvgramError`] through the crate-wide
//! [`Result`] alias. Store-level failures carry enough information for the
//! retry loops in [`crate::storage`] to decide whether a transaction may be
//! re-run.
//!
//! # Examples
//!
//! ```
//! use kvgram::error::{KvgramError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(KvgramError::invalid_argument("context must not be empty"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for kvgram operations.
#[derive(Error, Debug)]
pub enum KvgramError {
    /// I/O errors (snapshot files, CLI input).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage-related errors that are not worth retrying.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Optimistic concurrency conflict detected at commit time.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// The transaction outlived the store's duration limit or its read
    /// version fell out of the conflict history.
    #[error("Transaction too old: {0}")]
    TransactionTooOld(String),

    /// The write set exceeded the store's single-transaction size limit.
    #[error("Transaction too large: {size} bytes (limit {limit})")]
    TransactionTooLarge { size: usize, limit: usize },

    /// The retry budget ran out; holds the last retryable error.
    #[error("Retry limit exceeded after {attempts} attempts: {source}")]
    RetryLimitExceeded {
        attempts: u32,
        #[source]
        source: Box<KvgramError>,
    },

    /// A stored key or value does not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid caller-supplied argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with KvgramError.
pub type Result<T> = std::result::Result<T, KvgramError>;

impl KvgramError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        KvgramError::Storage(msg.into())
    }

    /// Create a new conflict error.
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        KvgramError::Conflict(msg.into())
    }

    /// Create a new transaction-too-old error.
    pub fn too_old<S: Into<String>>(msg: S) -> Self {
        KvgramError::TransactionTooOld(msg.into())
    }

    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        KvgramError::Decode(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        KvgramError::InvalidArgument(msg.into())
    }

    /// Whether re-running the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvgramError::Conflict(_) | KvgramError::TransactionTooOld(_)
        )
    }
}

impl From<bincode::Error> for KvgramError {
    fn from(err: bincode::Error) -> Self {
        KvgramError::storage(format!("snapshot encoding: {err}"))
    }
}
