//! Transactional ordered key-value store contract.
//!
//! The index and search layers only talk to the store through the traits in
//! this module, so any backend offering snapshot-isolated transactions,
//! ordered byte keys, range scans and deferred point reads can be plugged in.
//!
//! # Architecture
//!
//! - **Database**: hands out read-write and read-only transactions
//! - **ReadTransaction**: point reads returning a [`ReadFuture`] and lazy range scans
//! - **Transaction**: buffered `set` / `clear` / `clear_range` applied atomically on commit
//! - **transact / read_transact**: run a closure in a fresh transaction and retry
//!   it as a unit on retryable errors
//!
//! # Backends
//!
//! - [`memory::MemoryDatabase`]: in-process store with optimistic conflict
//!   detection and snapshot file persistence
//! - [`directory::DirectoryLayer`]: namespace → short prefix allocation on top
//!   of any backend
//!
//! # Example
//!
//! ```
//! use kvgram::storage::memory::MemoryDatabase;
//! use kvgram::storage::{read_transact, transact, RetryPolicy};
//!
//! # fn main() -> kvgram::error::Result<()> {
//! let db = MemoryDatabase::new_default();
//! let policy = RetryPolicy::default();
//!
//! transact(&db, &policy, |tr| {
//!     tr.set(b"hello", b"world");
//!     Ok(())
//! })?;
//!
//! let value = read_transact(&db, &policy, |tr| tr.get(b"hello").wait())?;
//! assert_eq!(value, Some(b"world".to_vec()));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{KvgramError, Result};

pub mod directory;
pub mod memory;

/// Half-open key range `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
}

impl KeyRange {
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        KeyRange {
            begin: begin.into(),
            end: end.into(),
        }
    }

    /// Range holding exactly one key.
    pub fn single(key: &[u8]) -> Self {
        let mut end = key.to_vec();
        end.push(0x00);
        KeyRange::new(key.to_vec(), end)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.begin.as_slice() && key < self.end.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn intersects(&self, other: &KeyRange) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.begin < other.end
            && other.begin < self.end
    }
}

/// A key-value pair returned by a range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Options for [`ReadTransaction::get_range`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Yield keys in descending order.
    pub reverse: bool,
    /// Stop after this many pairs.
    pub limit: Option<usize>,
}

impl RangeOptions {
    pub fn reverse() -> Self {
        RangeOptions {
            reverse: true,
            limit: None,
        }
    }
}

/// Lazy sequence of key-value pairs from a range scan.
pub type RangeIter<'a> = Box<dyn Iterator<Item = Result<KeyValue>> + 'a>;

/// Outcome of a point read.
pub type ReadResult = Result<Option<Vec<u8>>>;

/// Handle to a point read that has been issued but not yet awaited.
///
/// Issuing many reads before resolving any of them lets a backend overlap
/// the round trips. Resolve with [`ReadFuture::wait`] from synchronous code or
/// `.await` it from async code.
pub struct ReadFuture {
    inner: BoxFuture<'static, ReadResult>,
}

impl ReadFuture {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ReadResult> + Send + 'static,
    {
        ReadFuture {
            inner: future.boxed(),
        }
    }

    /// A future that is already resolved.
    pub fn ready(result: ReadResult) -> Self {
        ReadFuture::new(futures::future::ready(result))
    }

    /// Block the current thread until the read completes.
    pub fn wait(self) -> ReadResult {
        futures::executor::block_on(self.inner)
    }
}

impl Future for ReadFuture {
    type Output = ReadResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for ReadFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadFuture").finish_non_exhaustive()
    }
}

/// Read access to one consistent snapshot of the store.
pub trait ReadTransaction: Send {
    /// Issue a point read without blocking.
    fn get(&self, key: &[u8]) -> ReadFuture;

    /// Scan `range`, lazily, in the requested direction.
    fn get_range(&self, range: &KeyRange, options: RangeOptions) -> Result<RangeIter<'_>>;
}

/// A read-write transaction. Writes are buffered and become visible
/// atomically when [`Transaction::commit`] succeeds.
pub trait Transaction: ReadTransaction {
    fn set(&mut self, key: &[u8], value: &[u8]);

    fn clear(&mut self, key: &[u8]);

    fn clear_range(&mut self, range: &KeyRange);

    /// Apply all buffered writes, or fail without applying any.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A handle to a transactional store.
pub trait Database: Send + Sync + fmt::Debug {
    fn create_transaction(&self) -> Result<Box<dyn Transaction>>;

    fn read_transaction(&self) -> Result<Box<dyn ReadTransaction>>;
}

/// How retryable transaction failures are handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Upper bound of the jittered sleep after the first failure.
    pub initial_backoff_ms: u64,
    /// Cap for the exponentially growing backoff.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 2,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Sleep duration after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ceiling = self
            .initial_backoff_ms
            .saturating_mul(1 << shift)
            .min(self.max_backoff_ms);
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling))
    }

    fn on_error(&self, attempt: u32, err: KvgramError) -> Result<()> {
        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= self.max_attempts {
            return Err(KvgramError::RetryLimitExceeded {
                attempts: attempt,
                source: Box::new(err),
            });
        }
        let delay = self.backoff(attempt);
        warn!(attempt, ?delay, error = %err, "retrying transaction");
        thread::sleep(delay);
        Ok(())
    }
}

/// Run `body` in a read-write transaction and commit it, retrying the whole
/// closure on retryable errors.
pub fn transact<T, F>(db: &dyn Database, policy: &RetryPolicy, mut body: F) -> Result<T>
where
    F: FnMut(&mut dyn Transaction) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = db.create_transaction().and_then(|mut tr| {
            let value = body(tr.as_mut())?;
            tr.commit()?;
            Ok(value)
        });
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => policy.on_error(attempt, err)?,
        }
    }
}

/// Run `body` against a fresh read-only snapshot, retrying on retryable
/// errors.
pub fn read_transact<T, F>(db: &dyn Database, policy: &RetryPolicy, mut body: F) -> Result<T>
where
    F: FnMut(&dyn ReadTransaction) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = db.read_transaction().and_then(|tr| body(tr.as_ref()));
        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => policy.on_error(attempt, err)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryDatabase;

    #[test]
    fn test_key_range_intersection() {
        let a = KeyRange::new(b"a".to_vec(), b"c".to_vec());
        let b = KeyRange::new(b"b".to_vec(), b"d".to_vec());
        let c = KeyRange::new(b"c".to_vec(), b"e".to_vec());

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(KeyRange::single(b"b").intersects(&a));
        assert!(!KeyRange::new(b"x".to_vec(), b"x".to_vec()).intersects(&a));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 4,
            max_backoff_ms: 10,
        };
        for attempt in 1..30 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_transact_retries_conflicts() {
        let db = MemoryDatabase::new_default();
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        };

        let mut calls = 0;
        let value = transact(&db, &policy, |tr| {
            calls += 1;
            if calls < 3 {
                return Err(KvgramError::conflict("simulated"));
            }
            tr.set(b"k", b"v");
            Ok(calls)
        })
        .unwrap();
        assert_eq!(value, 3);

        let mut calls = 0;
        let err = transact(&db, &policy, |_tr| -> Result<()> {
            calls += 1;
            Err(KvgramError::conflict("always"))
        })
        .unwrap_err();
        assert_eq!(calls, 3);
        assert!(matches!(
            err,
            KvgramError::RetryLimitExceeded { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_non_retryable_error_is_returned_immediately() {
        let db = MemoryDatabase::new_default();
        let mut calls = 0;
        let err = read_transact(&db, &RetryPolicy::default(), |_tr| -> Result<()> {
            calls += 1;
            Err(KvgramError::decode("bad key"))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, KvgramError::Decode(_)));
    }

    #[test]
    fn test_read_future_can_be_awaited() {
        let future = ReadFuture::ready(Ok(Some(vec![1])));
        let value = futures::executor::block_on(future).unwrap();
        assert_eq!(value, Some(vec![1]));
    }
}
