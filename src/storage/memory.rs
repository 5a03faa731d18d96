//! In-memory transactional store for tests, tooling and single-process use.
//!
//! Every transaction reads from an immutable snapshot of an ordered map taken
//! when it starts. Writes are buffered and applied in order at commit time.
//! Commits are validated optimistically: if any key range the transaction
//! read was written by a transaction that committed after the snapshot was
//! taken, the commit fails with a retryable conflict.
//!
//! Reads observe the snapshot only; a transaction does not see its own
//! buffered writes.

use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KvgramError, Result};
use crate::storage::{
    Database, KeyRange, KeyValue, RangeIter, RangeOptions, ReadFuture, ReadTransaction,
    Transaction,
};

const SNAPSHOT_MAGIC: &[u8; 8] = b"KVGRAM01";

type Snapshot = Arc<BTreeMap<Vec<u8>, Vec<u8>>>;

/// Configuration for [`MemoryDatabase`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDatabaseConfig {
    /// Maximum bytes of keys and values written by one transaction.
    pub max_transaction_bytes: usize,
    /// Lifetime of a transaction; older transactions fail as too old.
    pub max_transaction_duration_ms: u64,
    /// Number of recent commits kept for conflict detection.
    pub conflict_history: usize,
}

impl Default for MemoryDatabaseConfig {
    fn default() -> Self {
        MemoryDatabaseConfig {
            max_transaction_bytes: 10_000_000,
            max_transaction_duration_ms: 5_000,
            conflict_history: 4096,
        }
    }
}

#[derive(Debug)]
struct CommitRecord {
    version: u64,
    writes: Vec<KeyRange>,
}

#[derive(Debug, Default)]
struct Shared {
    data: Snapshot,
    version: u64,
    history: VecDeque<CommitRecord>,
    /// Commits at or below this version are no longer in `history`.
    pruned_through: u64,
}

/// An in-memory, snapshot-isolated ordered key-value store.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    shared: Arc<RwLock<Shared>>,
    config: Arc<MemoryDatabaseConfig>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new(config: MemoryDatabaseConfig) -> Self {
        MemoryDatabase {
            shared: Arc::new(RwLock::new(Shared::default())),
            config: Arc::new(config),
        }
    }

    /// Create an empty database with default limits.
    pub fn new_default() -> Self {
        Self::new(MemoryDatabaseConfig::default())
    }

    /// Open a database from a snapshot file, or start empty if the file does
    /// not exist.
    pub fn open<P: AsRef<Path>>(path: P, config: MemoryDatabaseConfig) -> Result<Self> {
        let path = path.as_ref();
        let db = Self::new(config);
        if !path.exists() {
            debug!(path = %path.display(), "snapshot file missing, starting empty");
            return Ok(db);
        }

        let mut buffer = Vec::new();
        File::open(path)?.read_to_end(&mut buffer)?;
        let data = decode_snapshot(&buffer)?;
        debug!(path = %path.display(), keys = data.len(), "loaded snapshot");
        db.shared.write().data = Arc::new(data);
        Ok(db)
    }

    /// Write the current committed state to `path`.
    ///
    /// The file is written next to the target and renamed into place.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let data = Arc::clone(&self.shared.read().data);
        let payload = bincode::serialize(&*data)?;

        let mut out = Vec::with_capacity(payload.len() + 12);
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.write_u32::<BigEndian>(crc32fast::hash(&payload))?;
        out.extend_from_slice(&payload);

        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&out)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), keys = data.len(), "persisted snapshot");
        Ok(())
    }

    /// Number of keys currently committed.
    pub fn len(&self) -> usize {
        self.shared.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version of the latest commit.
    pub fn version(&self) -> u64 {
        self.shared.read().version
    }

    fn begin(&self) -> MemoryTransaction {
        let shared = self.shared.read();
        MemoryTransaction {
            shared: Arc::clone(&self.shared),
            config: Arc::clone(&self.config),
            snapshot: Arc::clone(&shared.data),
            read_version: shared.version,
            started: Instant::now(),
            read_conflicts: Mutex::new(Vec::new()),
            mutations: Vec::new(),
            write_bytes: 0,
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new_default()
    }
}

impl Database for MemoryDatabase {
    fn create_transaction(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(self.begin()))
    }

    fn read_transaction(&self) -> Result<Box<dyn ReadTransaction>> {
        Ok(Box::new(self.begin()))
    }
}

fn decode_snapshot(buffer: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    if buffer.len() < 12 || &buffer[..8] != SNAPSHOT_MAGIC {
        return Err(KvgramError::storage("not a kvgram snapshot file"));
    }
    let expected = BigEndian::read_u32(&buffer[8..12]);
    let payload = &buffer[12..];
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(KvgramError::storage(format!(
            "snapshot checksum mismatch: expected {expected:08x}, found {actual:08x}"
        )));
    }
    Ok(bincode::deserialize(payload)?)
}

#[derive(Debug)]
enum Mutation {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
    ClearRange(KeyRange),
}

impl Mutation {
    fn conflict_range(&self) -> KeyRange {
        match self {
            Mutation::Set(key, _) | Mutation::Clear(key) => KeyRange::single(key),
            Mutation::ClearRange(range) => range.clone(),
        }
    }

    fn apply(self, data: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        match self {
            Mutation::Set(key, value) => {
                data.insert(key, value);
            }
            Mutation::Clear(key) => {
                data.remove(&key);
            }
            Mutation::ClearRange(range) => {
                if range.is_empty() {
                    return;
                }
                let mut tail = data.split_off(&range.begin);
                let mut rest = tail.split_off(&range.end);
                data.append(&mut rest);
            }
        }
    }
}

/// A transaction against [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<RwLock<Shared>>,
    config: Arc<MemoryDatabaseConfig>,
    snapshot: Snapshot,
    read_version: u64,
    started: Instant,
    read_conflicts: Mutex<Vec<KeyRange>>,
    mutations: Vec<Mutation>,
    write_bytes: usize,
}

impl MemoryTransaction {
    fn deadline(&self) -> Duration {
        Duration::from_millis(self.config.max_transaction_duration_ms)
    }

    fn check_alive(&self) -> Result<()> {
        if self.started.elapsed() > self.deadline() {
            Err(KvgramError::too_old(format!(
                "transaction exceeded {} ms",
                self.config.max_transaction_duration_ms
            )))
        } else {
            Ok(())
        }
    }

    fn push(&mut self, mutation: Mutation, bytes: usize) {
        self.write_bytes += bytes;
        self.mutations.push(mutation);
    }
}

impl ReadTransaction for MemoryTransaction {
    fn get(&self, key: &[u8]) -> ReadFuture {
        if let Err(err) = self.check_alive() {
            return ReadFuture::ready(Err(err));
        }
        self.read_conflicts.lock().push(KeyRange::single(key));

        let snapshot = Arc::clone(&self.snapshot);
        let key = key.to_vec();
        ReadFuture::new(async move { Ok(snapshot.get(&key).cloned()) })
    }

    fn get_range(&self, range: &KeyRange, options: RangeOptions) -> Result<RangeIter<'_>> {
        self.check_alive()?;
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        self.read_conflicts.lock().push(range.clone());

        let started = self.started;
        let deadline = self.deadline();
        let bounds = (
            Bound::Included(range.begin.clone()),
            Bound::Excluded(range.end.clone()),
        );
        let entries = self.snapshot.range::<Vec<u8>, _>(bounds);
        let entries: Box<dyn Iterator<Item = (&Vec<u8>, &Vec<u8>)> + '_> = if options.reverse {
            Box::new(entries.rev())
        } else {
            Box::new(entries)
        };
        let limit = options.limit.unwrap_or(usize::MAX);

        Ok(Box::new(entries.take(limit).map(move |(key, value)| {
            if started.elapsed() > deadline {
                return Err(KvgramError::too_old("transaction expired during range read"));
            }
            Ok(KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
        })))
    }
}

impl Transaction for MemoryTransaction {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        let bytes = key.len() + value.len();
        self.push(Mutation::Set(key.to_vec(), value.to_vec()), bytes);
    }

    fn clear(&mut self, key: &[u8]) {
        let bytes = key.len();
        self.push(Mutation::Clear(key.to_vec()), bytes);
    }

    fn clear_range(&mut self, range: &KeyRange) {
        let bytes = range.begin.len() + range.end.len();
        self.push(Mutation::ClearRange(range.clone()), bytes);
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if self.mutations.is_empty() {
            return Ok(());
        }
        if self.write_bytes > self.config.max_transaction_bytes {
            return Err(KvgramError::TransactionTooLarge {
                size: self.write_bytes,
                limit: self.config.max_transaction_bytes,
            });
        }
        self.check_alive()?;

        let MemoryTransaction {
            shared,
            config,
            snapshot,
            read_version,
            read_conflicts,
            mutations,
            ..
        } = *self;
        // Release our snapshot so make_mut can avoid a copy.
        drop(snapshot);
        let read_conflicts = read_conflicts.into_inner();

        let mut shared = shared.write();
        if read_version < shared.pruned_through {
            return Err(KvgramError::too_old(format!(
                "read version {read_version} is older than conflict history"
            )));
        }
        for record in shared.history.iter().filter(|r| r.version > read_version) {
            let clash = record
                .writes
                .iter()
                .any(|w| read_conflicts.iter().any(|r| r.intersects(w)));
            if clash {
                return Err(KvgramError::conflict(format!(
                    "read set overlaps commit {}",
                    record.version
                )));
            }
        }

        let writes: Vec<KeyRange> = mutations.iter().map(Mutation::conflict_range).collect();
        let data = Arc::make_mut(&mut shared.data);
        for mutation in mutations {
            mutation.apply(data);
        }

        shared.version += 1;
        let version = shared.version;
        shared.history.push_back(CommitRecord { version, writes });
        while shared.history.len() > config.conflict_history {
            if let Some(pruned) = shared.history.pop_front() {
                shared.pruned_through = pruned.version;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_transact, transact, RetryPolicy};
    use tempfile::TempDir;

    fn put(db: &MemoryDatabase, key: &[u8], value: &[u8]) {
        transact(db, &RetryPolicy::default(), |tr| {
            tr.set(key, value);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_snapshot_isolation() {
        let db = MemoryDatabase::new_default();
        put(&db, b"a", b"1");

        let reader = db.read_transaction().unwrap();
        put(&db, b"a", b"2");
        put(&db, b"b", b"3");

        assert_eq!(reader.get(b"a").wait().unwrap(), Some(b"1".to_vec()));
        assert_eq!(reader.get(b"b").wait().unwrap(), None);

        let fresh = db.read_transaction().unwrap();
        assert_eq!(fresh.get(b"a").wait().unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_range_scan_directions_and_limit() {
        let db = MemoryDatabase::new_default();
        for key in [b"k1", b"k2", b"k3", b"k4"] {
            put(&db, key, b"x");
        }
        let tr = db.read_transaction().unwrap();
        let range = KeyRange::new(b"k2".to_vec(), b"k4".to_vec());

        let forward: Vec<Vec<u8>> = tr
            .get_range(&range, RangeOptions::default())
            .unwrap()
            .map(|kv| kv.unwrap().key)
            .collect();
        assert_eq!(forward, vec![b"k2".to_vec(), b"k3".to_vec()]);

        let backward: Vec<Vec<u8>> = tr
            .get_range(&range, RangeOptions::reverse())
            .unwrap()
            .map(|kv| kv.unwrap().key)
            .collect();
        assert_eq!(backward, vec![b"k3".to_vec(), b"k2".to_vec()]);

        let limited = tr
            .get_range(
                &KeyRange::new(b"k".to_vec(), b"l".to_vec()),
                RangeOptions {
                    reverse: true,
                    limit: Some(1),
                },
            )
            .unwrap()
            .count();
        assert_eq!(limited, 1);

        let inverted = KeyRange::new(b"k4".to_vec(), b"k1".to_vec());
        assert_eq!(tr.get_range(&inverted, RangeOptions::default()).unwrap().count(), 0);
    }

    #[test]
    fn test_clear_range_is_half_open() {
        let db = MemoryDatabase::new_default();
        for key in [b"a", b"b", b"c", b"d"] {
            put(&db, key, b"x");
        }
        transact(&db, &RetryPolicy::default(), |tr| {
            tr.clear_range(&KeyRange::new(b"b".to_vec(), b"d".to_vec()));
            Ok(())
        })
        .unwrap();

        let keys = read_transact(&db, &RetryPolicy::default(), |tr| {
            tr.get_range(&KeyRange::new(vec![0x00], vec![0xFF]), RangeOptions::default())?
                .map(|kv| kv.map(|kv| kv.key))
                .collect::<Result<Vec<_>>>()
        })
        .unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_conflicting_commit_is_rejected() {
        let db = MemoryDatabase::new_default();
        put(&db, b"counter", b"0");

        let mut first = db.create_transaction().unwrap();
        let mut second = db.create_transaction().unwrap();
        first.get(b"counter").wait().unwrap();
        second.get(b"counter").wait().unwrap();
        first.set(b"counter", b"1");
        second.set(b"counter", b"2");

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, KvgramError::Conflict(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_disjoint_commits_do_not_conflict() {
        let db = MemoryDatabase::new_default();

        let mut first = db.create_transaction().unwrap();
        let mut second = db.create_transaction().unwrap();
        first
            .get_range(&KeyRange::new(b"a".to_vec(), b"b".to_vec()), RangeOptions::default())
            .unwrap()
            .for_each(drop);
        second
            .get_range(&KeyRange::new(b"x".to_vec(), b"y".to_vec()), RangeOptions::default())
            .unwrap()
            .for_each(drop);
        first.set(b"a1", b"1");
        second.set(b"x1", b"1");

        first.commit().unwrap();
        second.commit().unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.version(), 2);
    }

    #[test]
    fn test_blind_writes_never_conflict() {
        let db = MemoryDatabase::new_default();
        let mut first = db.create_transaction().unwrap();
        let mut second = db.create_transaction().unwrap();
        first.set(b"k", b"1");
        second.set(b"k", b"2");
        first.commit().unwrap();
        second.commit().unwrap();

        let tr = db.read_transaction().unwrap();
        assert_eq!(tr.get(b"k").wait().unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_transaction_too_large() {
        let db = MemoryDatabase::new(MemoryDatabaseConfig {
            max_transaction_bytes: 8,
            ..Default::default()
        });
        let mut tr = db.create_transaction().unwrap();
        tr.set(b"key", b"value-too-long");
        let err = tr.commit().unwrap_err();
        assert!(matches!(err, KvgramError::TransactionTooLarge { limit: 8, .. }));
        assert!(!err.is_retryable());
        assert!(db.is_empty());
    }

    #[test]
    fn test_expired_transaction_is_too_old() {
        let db = MemoryDatabase::new(MemoryDatabaseConfig {
            max_transaction_duration_ms: 0,
            ..Default::default()
        });
        let tr = db.read_transaction().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let err = tr.get(b"k").wait().unwrap_err();
        assert!(matches!(err, KvgramError::TransactionTooOld(_)));
    }

    #[test]
    fn test_pruned_history_reports_too_old() {
        let db = MemoryDatabase::new(MemoryDatabaseConfig {
            conflict_history: 1,
            ..Default::default()
        });
        let mut stale = db.create_transaction().unwrap();
        put(&db, b"a", b"1");
        put(&db, b"b", b"1");
        put(&db, b"c", b"1");

        stale.set(b"d", b"1");
        let err = stale.commit().unwrap_err();
        assert!(matches!(err, KvgramError::TransactionTooOld(_)));
    }

    #[test]
    fn test_persist_and_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.kvg");

        let db = MemoryDatabase::new_default();
        put(&db, b"alpha", b"1");
        put(&db, b"beta", b"\x00\x01");
        db.persist(&path).unwrap();

        let reopened = MemoryDatabase::open(&path, MemoryDatabaseConfig::default()).unwrap();
        assert_eq!(reopened.len(), 2);
        let tr = reopened.read_transaction().unwrap();
        assert_eq!(tr.get(b"beta").wait().unwrap(), Some(b"\x00\x01".to_vec()));

        let missing = MemoryDatabase::open(temp_dir.path().join("none"), Default::default()).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_open_rejects_corrupt_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.kvg");

        let db = MemoryDatabase::new_default();
        put(&db, b"alpha", b"1");
        db.persist(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = MemoryDatabase::open(&path, MemoryDatabaseConfig::default()).unwrap_err();
        assert!(err.to_string().contains("checksum"));

        fs::write(&path, b"garbage").unwrap();
        assert!(MemoryDatabase::open(&path, MemoryDatabaseConfig::default()).is_err());
    }
}
