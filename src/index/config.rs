//! Configuration for the index writer and searcher.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::RetryPolicy;

/// Default ceiling on candidates parked by one search iteration.
pub const DEFAULT_MAX_PENDING_MATCHES: usize = 10_000;

/// Index and search settings.
///
/// All fields have defaults, so a partial JSON document is enough:
///
/// ```
/// use kvgram::index::IndexConfig;
///
/// let config: IndexConfig = serde_json::from_str(r#"{"max_pending_matches": 500}"#).unwrap();
/// assert_eq!(config.max_pending_matches, 500);
/// assert!(!config.atomic_reindex);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Candidates one read transaction may collect before the scan pauses
    /// and resumes in a new transaction.
    pub max_pending_matches: usize,

    /// Clear old postings and write new ones in a single transaction.
    ///
    /// Off by default: clearing and writing are separate transactions, and
    /// readers may briefly observe a document with no postings.
    pub atomic_reindex: bool,

    /// Retry behavior for every transaction issued by the index.
    pub retry: RetryPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            max_pending_matches: DEFAULT_MAX_PENDING_MATCHES,
            atomic_reindex: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl IndexConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
