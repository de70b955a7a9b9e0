//! Pending-insert map.
//!
//! Inserts of new rows are appended to the unordered insert log by the
//! write path. At the start of a sweep the GC collects them into this map,
//! ordered by `(key_hash, key)`; during the sweep, matching entries are
//! folded into compacted records (a reinsert after a delete) and whatever
//! remains is materialized into fill pages at the end. Consumed keys are
//! erased as the sweep proceeds.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use rill_common::{RecordKey, Version};
use rill_log::UnorderedLog;

use crate::delta::{EntryKind, InsertEntry};
use crate::error::GcResult;

/// One pending insert for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInsert {
    /// Commit version of the insert.
    pub version: Version,
    /// Row data; `None` when the inserted row was deleted again before it
    /// ever reached a main page.
    pub data: Option<Bytes>,
}

/// Map key: hash first, so iteration order spreads keys the way the
/// primary hash index does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct InsertKey {
    hash: u64,
    key: u64,
}

impl InsertKey {
    fn new(key: RecordKey) -> Self {
        let mut hasher = DefaultHasher::new();
        key.as_u64().hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            key: key.as_u64(),
        }
    }
}

/// Pending inserts keyed by `(key_hash, key)`, version-descending per key.
#[derive(Debug, Default)]
pub struct InsertMap {
    map: BTreeMap<InsertKey, Vec<PendingInsert>>,
}

impl InsertMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects every sealed insert entry of `log`.
    pub fn from_log(log: &UnorderedLog) -> GcResult<Self> {
        let mut map = Self::new();
        for entry in log.iter() {
            if !entry.is_sealed() {
                continue;
            }
            if EntryKind::from_u32(entry.entry_type()) != Some(EntryKind::Insert) {
                continue;
            }
            let decoded = InsertEntry::decode(entry.payload())?;
            map.push(
                decoded.key,
                PendingInsert {
                    version: decoded.version,
                    data: decoded.data.map(Bytes::copy_from_slice),
                },
            );
        }
        Ok(map)
    }

    /// Adds a pending insert, keeping the per-key list version-descending.
    pub fn push(&mut self, key: RecordKey, pending: PendingInsert) {
        let list = self.map.entry(InsertKey::new(key)).or_default();
        let at = list
            .binary_search_by(|probe| pending.version.cmp(&probe.version))
            .unwrap_or_else(|i| i);
        list.insert(at, pending);
    }

    /// True when inserts are pending for `key`.
    #[must_use]
    pub fn contains(&self, key: RecordKey) -> bool {
        self.map.contains_key(&InsertKey::new(key))
    }

    /// The pending inserts for `key`, newest first.
    #[must_use]
    pub fn peek(&self, key: RecordKey) -> Option<&[PendingInsert]> {
        self.map.get(&InsertKey::new(key)).map(Vec::as_slice)
    }

    /// Removes and returns the pending inserts for `key`.
    pub fn remove(&mut self, key: RecordKey) -> Option<Vec<PendingInsert>> {
        self.map.remove(&InsertKey::new(key))
    }

    /// The first key in map order, if any.
    #[must_use]
    pub fn first_key(&self) -> Option<RecordKey> {
        self.map.keys().next().map(|k| RecordKey::new(k.key))
    }

    /// Number of keys with pending inserts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
