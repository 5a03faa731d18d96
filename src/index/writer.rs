//! Index writer: builds and destroys the postings of one document generation.
//!
//! Re-indexing a document is two transactions by default: the old postings
//! are cleared first, then the new ones are written. A reader running between
//! the two sees the document as absent, and two writers racing on the same
//! document may leave both generations visible until the next re-index. Set
//! [`IndexConfig::atomic_reindex`] to fold both steps into one transaction.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::ngram::{Gram, NgramTokenizer};
use crate::error::Result;
use crate::index::config::IndexConfig;
use crate::index::keys::{ContextKeys, MARKER};
use crate::storage::{transact, Database, RangeOptions, Transaction};

/// A document to index in bulk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub order: i64,
    pub text: String,
}

/// Writes postings and reverse entries for documents.
#[derive(Debug, Clone)]
pub struct IndexWriter {
    db: Arc<dyn Database>,
    config: IndexConfig,
    tokenizer: NgramTokenizer,
}

impl IndexWriter {
    pub fn new(db: Arc<dyn Database>, config: IndexConfig) -> Self {
        IndexWriter {
            db,
            config,
            tokenizer: NgramTokenizer::trigram(),
        }
    }

    /// Remove every posting and reverse entry of `doc_id`, whatever its
    /// order, in one transaction.
    pub fn clear_index(&self, keys: &ContextKeys, doc_id: &str) -> Result<()> {
        let cleared = transact(self.db.as_ref(), &self.config.retry, |tr| {
            clear_document(tr, keys, doc_id)
        })?;
        debug!(doc_id, cleared, "cleared index");
        Ok(())
    }

    /// Replace the postings of `doc_id` with those of `text` at `order`.
    pub fn create_index(
        &self,
        keys: &ContextKeys,
        order: i64,
        doc_id: &str,
        text: &str,
    ) -> Result<()> {
        let grams = self.tokenizer.index_grams(text);

        if self.config.atomic_reindex {
            transact(self.db.as_ref(), &self.config.retry, |tr| {
                clear_document(tr, keys, doc_id)?;
                write_document(tr, keys, order, doc_id, &grams);
                Ok(())
            })?;
        } else {
            self.clear_index(keys, doc_id)?;
            transact(self.db.as_ref(), &self.config.retry, |tr| {
                write_document(tr, keys, order, doc_id, &grams);
                Ok(())
            })?;
        }

        debug!(doc_id, order, grams = grams.len(), "created index");
        Ok(())
    }

    /// Index a batch of documents in parallel.
    ///
    /// Each document is re-indexed independently; the first failure is
    /// returned, and documents already written stay written.
    pub fn create_indexes(&self, keys: &ContextKeys, docs: &[IndexDocument]) -> Result<()> {
        docs.par_iter()
            .try_for_each(|doc| self.create_index(keys, doc.order, &doc.id, &doc.text))?;
        debug!(documents = docs.len(), "created indexes");
        Ok(())
    }
}

fn clear_document(tr: &mut dyn Transaction, keys: &ContextKeys, doc_id: &str) -> Result<usize> {
    let reverse_range = keys.reverse_doc_range(doc_id);
    let entries = tr
        .get_range(&reverse_range, RangeOptions::default())?
        .map(|kv| kv.and_then(|kv| keys.decode_reverse(doc_id, &kv.key)))
        .collect::<Result<Vec<_>>>()?;

    for (order, ngram) in &entries {
        tr.clear_range(&keys.posting_doc_range(ngram, *order, doc_id));
        tr.clear(&keys.reverse(doc_id, *order, ngram));
    }
    tr.clear_range(&reverse_range);
    Ok(entries.len())
}

fn write_document(
    tr: &mut dyn Transaction,
    keys: &ContextKeys,
    order: i64,
    doc_id: &str,
    grams: &[Gram],
) {
    for gram in grams {
        tr.set(&keys.posting(&gram.text, order, doc_id, gram.position), MARKER);
        tr.set(&keys.reverse(doc_id, order, &gram.text), MARKER);
    }
}
