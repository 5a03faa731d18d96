//! Index module for kvgram.
//!
//! This module holds the key schema shared by the write and read paths, the
//! index writer that (re)builds a document's postings, and the searcher that
//! matches n-gram windows against them.
//!
//! # Key structures
//!
//! Under a context subspace:
//!
//! - postings, searched by ngram: `"R", ngram, order, doc_id, position`
//! - reverse entries, used to clear a document: `"I", doc_id, order, ngram`

pub mod config;
pub mod keys;
pub mod searcher;
pub mod writer;

// Re-export commonly used types
pub use config::IndexConfig;
pub use keys::{ContextKeys, Posting};
pub use searcher::{SearchHit, SearchResult, Searcher};
pub use writer::{IndexDocument, IndexWriter};
