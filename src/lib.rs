//! # kvgram
//!
//! Per-tenant n-gram full-text search on a transactional ordered key-value
//! store.
//!
//! ## Features
//!
//! - Trigram postings with shortened tail grams, so every substring is findable
//! - Recency ranking by caller-supplied generation order
//! - Resumable searches that keep each read transaction short
//! - Pipelined point reads across query windows
//! - Namespaces and contexts isolated by key prefix
//! - An in-memory store with snapshot isolation, optimistic conflicts and
//!   snapshot files

pub mod analysis;
pub mod cli;
pub mod engine;
pub mod error;
pub mod index;
pub mod storage;
pub mod tuple;

pub mod prelude {
    pub use crate::engine::SearchEngine;
    pub use crate::error::{KvgramError, Result};
    pub use crate::index::{IndexConfig, IndexDocument, SearchHit, SearchResult};
    pub use crate::storage::memory::{MemoryDatabase, MemoryDatabaseConfig};
    pub use crate::storage::{Database, RetryPolicy};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
