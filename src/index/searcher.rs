//! N-gram search over postings.
//!
//! A query is split into windows (see
//! [`NgramTokenizer::query_windows`](crate::analysis::ngram::NgramTokenizer::query_windows)).
//! Postings of the first window are scanned in descending key order, which
//! yields the newest document generations first. For every candidate the
//! posting expected for the next window is requested as a deferred point read;
//! all reads of one window are issued before any of them is awaited, and a
//! surviving candidate immediately issues the read for the window after.
//!
//! A scan that parks too many candidates pauses, resolves what it has, and
//! resumes in a fresh read transaction just below the last key it visited.
//! Each pause trades snapshot consistency between the two scans for keeping
//! every read transaction short.

use std::sync::Arc;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::analysis::ngram::{Gram, NgramTokenizer};
use crate::error::Result;
use crate::index::config::IndexConfig;
use crate::index::keys::ContextKeys;
use crate::storage::{read_transact, Database, KeyRange, RangeOptions, ReadFuture, ReadTransaction};

/// One matching document and the rune offset where the match starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub pos: usize,
}

/// Matches in recency order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub items: Vec<SearchHit>,
    pub count: usize,
}

impl SearchResult {
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|hit| hit.id.as_str()).collect()
    }
}

/// A candidate waiting on the read for `window`.
#[derive(Debug)]
struct PendingMatch {
    order: i64,
    doc_id: String,
    start: usize,
    window: usize,
    future: ReadFuture,
}

/// Where the next iteration resumes: the unscanned part of the first
/// window's posting range.
#[derive(Debug, Clone)]
struct SearchCursor {
    range: KeyRange,
}

/// State threaded from one iteration to the next.
#[derive(Debug)]
struct SearchState {
    cursor: Option<SearchCursor>,
    items: Vec<SearchHit>,
    accepted: AHashSet<String>,
    iterations: usize,
}

impl SearchState {
    fn new(range: KeyRange) -> Self {
        SearchState {
            cursor: Some(SearchCursor { range }),
            items: Vec::new(),
            accepted: AHashSet::new(),
            iterations: 0,
        }
    }

    fn absorb(&mut self, cursor: SearchCursor, outcome: StepOutcome) {
        for hit in outcome.hits {
            self.accepted.insert(hit.id.clone());
            self.items.push(hit);
        }
        self.cursor = outcome.resume_below.map(|end| SearchCursor {
            range: KeyRange::new(cursor.range.begin, end),
        });
        self.iterations += 1;
    }

    fn into_result(self) -> SearchResult {
        let count = self.items.len();
        SearchResult {
            items: self.items,
            count,
        }
    }
}

/// What one iteration produced.
#[derive(Debug)]
struct StepOutcome {
    hits: Vec<SearchHit>,
    /// Exclusive upper bound for the next scan; `None` once the range is
    /// exhausted.
    resume_below: Option<Vec<u8>>,
}

/// Accepts at most one hit per document across the whole search.
struct Acceptor<'a> {
    previous: &'a AHashSet<String>,
    current: AHashSet<String>,
    hits: Vec<SearchHit>,
}

impl<'a> Acceptor<'a> {
    fn new(previous: &'a AHashSet<String>) -> Self {
        Acceptor {
            previous,
            current: AHashSet::new(),
            hits: Vec::new(),
        }
    }

    fn is_accepted(&self, doc_id: &str) -> bool {
        self.previous.contains(doc_id) || self.current.contains(doc_id)
    }

    fn accept(&mut self, doc_id: String, pos: usize) {
        if self.is_accepted(&doc_id) {
            return;
        }
        self.current.insert(doc_id.clone());
        self.hits.push(SearchHit { id: doc_id, pos });
    }
}

/// Executes n-gram searches against one store.
#[derive(Debug, Clone)]
pub struct Searcher {
    db: Arc<dyn Database>,
    config: IndexConfig,
    tokenizer: NgramTokenizer,
}

impl Searcher {
    pub fn new(db: Arc<dyn Database>, config: IndexConfig) -> Self {
        Searcher {
            db,
            config,
            tokenizer: NgramTokenizer::trigram(),
        }
    }

    /// Find documents of the context containing `query`, newest order first.
    pub fn search(&self, keys: &ContextKeys, query: &str) -> Result<SearchResult> {
        let windows = self.tokenizer.query_windows(query);
        let Some(first) = windows.first() else {
            return Ok(SearchResult::default());
        };

        let mut state = SearchState::new(keys.posting_prefix_range(&first.text)?);
        while let Some(cursor) = state.cursor.clone() {
            let outcome = read_transact(self.db.as_ref(), &self.config.retry, |tr| {
                self.step(tr, keys, &windows, &cursor, &state.accepted)
            })?;
            trace!(
                iteration = state.iterations,
                hits = outcome.hits.len(),
                paused = outcome.resume_below.is_some(),
                "search iteration"
            );
            state.absorb(cursor, outcome);
        }

        debug!(
            query,
            iterations = state.iterations,
            hits = state.items.len(),
            "search finished"
        );
        Ok(state.into_result())
    }

    /// One iteration: scan part of the first window, then resolve the
    /// remaining windows for the parked candidates.
    fn step(
        &self,
        tr: &dyn ReadTransaction,
        keys: &ContextKeys,
        windows: &[Gram],
        cursor: &SearchCursor,
        accepted: &AHashSet<String>,
    ) -> Result<StepOutcome> {
        let mut acceptor = Acceptor::new(accepted);
        let mut pending: Vec<PendingMatch> = Vec::new();
        let mut candidates = 0usize;
        let mut resume_below = None;

        for kv in tr.get_range(&cursor.range, RangeOptions::reverse())? {
            let kv = kv?;
            let posting = keys.decode_posting(&kv.key)?;
            candidates += 1;

            if windows.len() > 1 {
                pending.push(self.issue(
                    tr,
                    keys,
                    windows,
                    1,
                    posting.order,
                    posting.doc_id,
                    posting.position,
                ));
            } else {
                acceptor.accept(posting.doc_id, posting.position);
            }

            if candidates > self.config.max_pending_matches {
                resume_below = Some(kv.key);
                break;
            }
        }

        for window in 1..windows.len() {
            let mut survivors = Vec::with_capacity(pending.len());
            for candidate in pending {
                debug_assert_eq!(candidate.window, window);
                if acceptor.is_accepted(&candidate.doc_id) {
                    continue;
                }
                let found = candidate.future.wait()?;
                if !found.is_some_and(|value| !value.is_empty()) {
                    continue;
                }

                if window + 1 < windows.len() {
                    survivors.push(self.issue(
                        tr,
                        keys,
                        windows,
                        window + 1,
                        candidate.order,
                        candidate.doc_id,
                        candidate.start,
                    ));
                } else {
                    acceptor.accept(candidate.doc_id, candidate.start);
                }
            }
            pending = survivors;
        }

        Ok(StepOutcome {
            hits: acceptor.hits,
            resume_below,
        })
    }

    /// Request the posting `windows[window]` would need for the candidate
    /// that matched the first window at `start`.
    #[allow(clippy::too_many_arguments)]
    fn issue(
        &self,
        tr: &dyn ReadTransaction,
        keys: &ContextKeys,
        windows: &[Gram],
        window: usize,
        order: i64,
        doc_id: String,
        start: usize,
    ) -> PendingMatch {
        let next = &windows[window];
        let key = keys.posting(&next.text, order, &doc_id, start + next.position);
        PendingMatch {
            order,
            doc_id,
            start,
            window,
            future: tr.get(&key),
        }
    }
}
