//! Namespace → key prefix allocation.
//!
//! A namespace path such as `["gyazo"]` is mapped to a short, allocated byte
//! prefix so that every key in that namespace stays compact no matter how
//! long the namespace name is. The mapping lives under the reserved `0xFE`
//! node prefix; allocated prefixes are packed integers and therefore always
//! sort below it.

use tracing::debug;

use crate::error::{KvgramError, Result};
use crate::storage::{read_transact, transact, Database, KeyRange, RetryPolicy};
use crate::tuple::{self, Element, Subspace};

const NODE_PREFIX: u8 = 0xFE;

/// Allocates and resolves namespace prefixes.
#[derive(Debug, Clone)]
pub struct DirectoryLayer {
    node: Subspace,
}

impl Default for DirectoryLayer {
    fn default() -> Self {
        DirectoryLayer {
            node: Subspace::from_bytes(vec![NODE_PREFIX]),
        }
    }
}

impl DirectoryLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn path_key(&self, path: &[&str]) -> Result<Vec<u8>> {
        if path.is_empty() || path.iter().any(|p| p.is_empty()) {
            return Err(KvgramError::invalid_argument(
                "directory path components must not be empty",
            ));
        }
        let mut elements = vec![Element::from("path")];
        elements.extend(path.iter().map(|p| Element::from(*p)));
        Ok(self.node.pack(&elements))
    }

    fn counter_key(&self) -> Vec<u8> {
        self.node.pack(&["counter".into()])
    }

    /// Resolve `path`, allocating a fresh prefix the first time it is seen.
    pub fn create_or_open(
        &self,
        db: &dyn Database,
        policy: &RetryPolicy,
        path: &[&str],
    ) -> Result<Subspace> {
        let path_key = self.path_key(path)?;
        let counter_key = self.counter_key();

        transact(db, policy, |tr| {
            let existing = tr.get(&path_key);
            let counter = tr.get(&counter_key);
            if let Some(prefix) = existing.wait()? {
                return Ok(Subspace::from_bytes(prefix));
            }

            let next = match counter.wait()? {
                Some(raw) => decode_counter(&raw)? + 1,
                None => 1,
            };
            let prefix = tuple::pack(&[Element::Int(next)]);
            tr.set(&counter_key, &tuple::pack(&[Element::Int(next)]));
            tr.set(&path_key, &prefix);
            debug!(?path, allocated = next, "created directory");
            Ok(Subspace::from_bytes(prefix))
        })
    }

    /// Resolve `path` without creating it.
    pub fn open(
        &self,
        db: &dyn Database,
        policy: &RetryPolicy,
        path: &[&str],
    ) -> Result<Option<Subspace>> {
        let path_key = self.path_key(path)?;
        let prefix = read_transact(db, policy, |tr| tr.get(&path_key).wait())?;
        Ok(prefix.map(Subspace::from_bytes))
    }

    /// Delete every key under `path` along with the directory entry.
    ///
    /// Returns `false` if the directory did not exist.
    pub fn remove(&self, db: &dyn Database, policy: &RetryPolicy, path: &[&str]) -> Result<bool> {
        let path_key = self.path_key(path)?;

        transact(db, policy, |tr| {
            let Some(prefix) = tr.get(&path_key).wait()? else {
                return Ok(false);
            };
            tr.clear_range(&KeyRange::new(prefix.clone(), tuple::strinc(&prefix)?));
            tr.clear(&path_key);
            debug!(?path, "removed directory");
            Ok(true)
        })
    }
}

fn decode_counter(raw: &[u8]) -> Result<i64> {
    match tuple::unpack(raw)?.as_slice() {
        [Element::Int(value)] => Ok(*value),
        other => Err(KvgramError::decode(format!(
            "directory counter has unexpected shape: {other:?}"
        ))),
    }
}
