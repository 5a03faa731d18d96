//! Namespace-aware facade over the index writer and searcher.

use std::sync::Arc;

use tracing::info;

use crate::error::{KvgramError, Result};
use crate::index::{ContextKeys, IndexConfig, IndexDocument, IndexWriter, SearchResult, Searcher};
use crate::storage::Database;
use crate::storage::directory::DirectoryLayer;
use crate::storage::memory::MemoryDatabase;

/// Entry point for indexing and searching.
///
/// A namespace is resolved to a short key prefix through the directory layer;
/// each context is a tuple sub-space of it.
///
/// # Examples
///
/// ```
/// use kvgram::engine::SearchEngine;
///
/// let engine = SearchEngine::in_memory();
/// engine.create_index("app", "user_1", 0, "doc_1", "hello world").unwrap();
///
/// let result = engine.search("app", "user_1", "world").unwrap();
/// assert_eq!(result.count, 1);
/// assert_eq!(result.items[0].id, "doc_1");
/// assert_eq!(result.items[0].pos, 6);
/// ```
#[derive(Debug, Clone)]
pub struct SearchEngine {
    db: Arc<dyn Database>,
    config: IndexConfig,
    directory: DirectoryLayer,
    writer: IndexWriter,
    searcher: Searcher,
}

impl SearchEngine {
    pub fn new(db: Arc<dyn Database>, config: IndexConfig) -> Self {
        SearchEngine {
            writer: IndexWriter::new(db.clone(), config.clone()),
            searcher: Searcher::new(db.clone(), config.clone()),
            directory: DirectoryLayer::new(),
            db,
            config,
        }
    }

    /// An engine over a fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDatabase::new_default()), IndexConfig::default())
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Index `text` as generation `order` of `doc_id`, replacing any earlier
    /// generation.
    pub fn create_index(
        &self,
        namespace: &str,
        context: &str,
        order: i64,
        doc_id: &str,
        text: &str,
    ) -> Result<()> {
        check_non_empty("doc_id", doc_id)?;
        let keys = self.open_keys(namespace, context)?;
        self.writer.create_index(&keys, order, doc_id, text)
    }

    /// Index a batch of documents of one context.
    pub fn create_indexes(
        &self,
        namespace: &str,
        context: &str,
        docs: &[IndexDocument],
    ) -> Result<()> {
        for doc in docs {
            check_non_empty("doc_id", &doc.id)?;
        }
        let keys = self.open_keys(namespace, context)?;
        self.writer.create_indexes(&keys, docs)
    }

    /// Remove `doc_id` from the context. Unknown namespaces and documents
    /// are not an error.
    pub fn clear_index(&self, namespace: &str, context: &str, doc_id: &str) -> Result<()> {
        check_non_empty("doc_id", doc_id)?;
        match self.existing_keys(namespace, context)? {
            Some(keys) => self.writer.clear_index(&keys, doc_id),
            None => Ok(()),
        }
    }

    /// Search the context for `query`.
    pub fn search(&self, namespace: &str, context: &str, query: &str) -> Result<SearchResult> {
        match self.existing_keys(namespace, context)? {
            Some(keys) => self.searcher.search(&keys, query),
            None => Ok(SearchResult::default()),
        }
    }

    /// Drop a namespace with every context in it.
    ///
    /// Returns `false` if it did not exist.
    ///
    /// Writers resolve the namespace prefix in one transaction and write in
    /// another. A write that resolved the prefix before this removal committed
    /// lands under the dropped prefix, where no later call can reach or remove
    /// it. Prefixes are never reallocated, so such keys cannot surface in a
    /// recreated namespace. Stop writers to a namespace before dropping it.
    pub fn remove_namespace(&self, namespace: &str) -> Result<bool> {
        check_non_empty("namespace", namespace)?;
        let removed = self
            .directory
            .remove(self.db.as_ref(), &self.config.retry, &[namespace])?;
        if removed {
            info!(namespace, "removed namespace");
        }
        Ok(removed)
    }

    fn open_keys(&self, namespace: &str, context: &str) -> Result<ContextKeys> {
        check_non_empty("namespace", namespace)?;
        check_non_empty("context", context)?;
        let subspace =
            self.directory
                .create_or_open(self.db.as_ref(), &self.config.retry, &[namespace])?;
        Ok(ContextKeys::new(&subspace, context))
    }

    fn existing_keys(&self, namespace: &str, context: &str) -> Result<Option<ContextKeys>> {
        check_non_empty("namespace", namespace)?;
        check_non_empty("context", context)?;
        let subspace = self
            .directory
            .open(self.db.as_ref(), &self.config.retry, &[namespace])?;
        Ok(subspace.map(|subspace| ContextKeys::new(&subspace, context)))
    }
}

fn check_non_empty(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(KvgramError::invalid_argument(format!(
            "{name} must not be empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_identifiers() {
        let engine = SearchEngine::in_memory();
        for result in [
            engine.create_index("", "ctx", 0, "id", "text"),
            engine.create_index("ns", "", 0, "id", "text"),
            engine.create_index("ns", "ctx", 0, "", "text"),
            engine.clear_index("ns", "ctx", ""),
        ] {
            assert!(matches!(result, Err(KvgramError::InvalidArgument(_))));
        }
        assert!(matches!(
            engine.search("", "ctx", "q"),
            Err(KvgramError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.remove_namespace(""),
            Err(KvgramError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_namespace_is_empty() {
        let engine = SearchEngine::in_memory();
        assert_eq!(engine.search("missing", "ctx", "abc").unwrap().count, 0);
        engine.clear_index("missing", "ctx", "doc").unwrap();
        assert!(!engine.remove_namespace("missing").unwrap());
    }

    #[test]
    fn test_create_indexes_validates_before_writing() {
        let engine = SearchEngine::in_memory();
        let docs = vec![
            IndexDocument {
                id: "ok".into(),
                order: 0,
                text: "first".into(),
            },
            IndexDocument {
                id: String::new(),
                order: 0,
                text: "second".into(),
            },
        ];
        assert!(engine.create_indexes("ns", "ctx", &docs).is_err());
        assert_eq!(engine.search("ns", "ctx", "first").unwrap().count, 0);
    }

    #[test]
    fn test_remove_namespace() {
        let engine = SearchEngine::in_memory();
        engine.create_index("ns", "a", 0, "1", "shared text").unwrap();
        engine.create_index("ns", "b", 0, "2", "shared text").unwrap();
        engine.create_index("other", "a", 0, "3", "shared text").unwrap();

        assert!(engine.remove_namespace("ns").unwrap());
        assert_eq!(engine.search("ns", "a", "shared").unwrap().count, 0);
        assert_eq!(engine.search("ns", "b", "shared").unwrap().count, 0);
        assert_eq!(engine.search("other", "a", "shared").unwrap().ids(), vec!["3"]);

        engine.create_index("ns", "a", 1, "4", "shared again").unwrap();
        assert_eq!(engine.search("ns", "a", "shared").unwrap().ids(), vec!["4"]);
    }

    #[test]
    fn test_write_racing_removal_stays_out_of_recreated_namespace() {
        let engine = SearchEngine::in_memory();
        let stale = engine.open_keys("ns", "ctx").unwrap();

        assert!(engine.remove_namespace("ns").unwrap());
        engine
            .writer
            .create_index(&stale, 0, "late", "orphaned text")
            .unwrap();

        engine.create_index("ns", "ctx", 0, "fresh", "recreated text").unwrap();
        assert_ne!(engine.open_keys("ns", "ctx").unwrap(), stale);
        assert_eq!(engine.search("ns", "ctx", "text").unwrap().ids(), vec!["fresh"]);
        assert_eq!(engine.search("ns", "ctx", "orphaned").unwrap().count, 0);
    }
}
