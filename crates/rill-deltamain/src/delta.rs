//! Wire formats of the delta and insert log payloads.
//!
//! Updates to existing rows are appended to the ordered delta log; each
//! record links its pending updates through their `prev` addresses, newest
//! first, anchored at the record's `newest` pointer. Inserts of new rows go
//! to the unordered insert log and are collected into the
//! [`InsertMap`](crate::InsertMap) at the start of a GC sweep.

use bytes::{Buf, BufMut};

use rill_common::{RecordKey, Version};
use rill_log::{LogResult, OrderedLog, UnorderedLog};

use crate::error::{GcError, GcResult};

/// Tombstone marker in the entry flag word.
const FLAG_TOMBSTONE: u32 = 0x1;

/// Discriminants carried in the log entry type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EntryKind {
    /// An update (or delete) of an existing row, in the delta log.
    Update = 1,
    /// An insert of a new row, in the insert log.
    Insert = 2,
}

impl EntryKind {
    /// Returns the raw discriminant.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decodes a raw discriminant.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Update),
            2 => Some(Self::Insert),
            _ => None,
        }
    }
}

/// Header size of an update entry:
/// `key (8) | version (8) | prev (8) | flags (4) | data_len (4)`.
pub const UPDATE_HEADER_SIZE: usize = 32;

/// Header size of an insert entry:
/// `key (8) | version (8) | flags (4) | data_len (4)`.
pub const INSERT_HEADER_SIZE: usize = 24;

/// A decoded update entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateEntry<'a> {
    /// Row key the update applies to.
    pub key: RecordKey,
    /// Commit version of the update.
    pub version: Version,
    /// Address of the next older pending update, 0 = none.
    pub prev: u64,
    /// New row data; `None` deletes the row.
    pub data: Option<&'a [u8]>,
}

impl<'a> UpdateEntry<'a> {
    /// Encoded size for a payload of `data`.
    #[inline]
    #[must_use]
    pub fn encoded_len(data: Option<&[u8]>) -> usize {
        UPDATE_HEADER_SIZE + data.map_or(0, <[u8]>::len)
    }

    /// Serializes an update entry.
    pub fn encode(
        buf: &mut impl BufMut,
        key: RecordKey,
        version: Version,
        prev: u64,
        data: Option<&[u8]>,
    ) {
        buf.put_u64_le(key.as_u64());
        buf.put_u64_le(version.as_u64());
        buf.put_u64_le(prev);
        match data {
            Some(data) => {
                buf.put_u32_le(0);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            None => {
                buf.put_u32_le(FLAG_TOMBSTONE);
                buf.put_u32_le(0);
            }
        }
    }

    /// Deserializes an update entry from a log payload.
    pub fn decode(mut payload: &'a [u8]) -> GcResult<Self> {
        if payload.len() < UPDATE_HEADER_SIZE {
            return Err(GcError::malformed(
                "update",
                format!("payload of {} bytes is shorter than the header", payload.len()),
            ));
        }
        let key = RecordKey::new(payload.get_u64_le());
        let version = Version::new(payload.get_u64_le());
        let prev = payload.get_u64_le();
        let flags = payload.get_u32_le();
        let len = payload.get_u32_le() as usize;
        let data = if flags & FLAG_TOMBSTONE != 0 {
            None
        } else {
            if payload.len() < len {
                return Err(GcError::malformed("update", "data length exceeds payload"));
            }
            Some(&payload[..len])
        };
        Ok(Self {
            key,
            version,
            prev,
            data,
        })
    }

    /// Reads an update entry directly from a chain address.
    ///
    /// # Safety
    ///
    /// `addr` must point at the payload of a sealed update entry whose log
    /// page stays reachable for `'a`.
    #[must_use]
    pub unsafe fn from_addr(addr: u64) -> Self {
        let base = addr as *const u8;
        // SAFETY: per contract, the header bytes are valid.
        let header = std::slice::from_raw_parts(base, UPDATE_HEADER_SIZE);
        let mut buf = header;
        let key = RecordKey::new(buf.get_u64_le());
        let version = Version::new(buf.get_u64_le());
        let prev = buf.get_u64_le();
        let flags = buf.get_u32_le();
        let len = buf.get_u32_le() as usize;
        let data = if flags & FLAG_TOMBSTONE != 0 {
            None
        } else {
            // SAFETY: the payload holds `len` data bytes after the header.
            Some(std::slice::from_raw_parts(base.add(UPDATE_HEADER_SIZE), len))
        };
        Self {
            key,
            version,
            prev,
            data,
        }
    }

    /// Appends a sealed update entry to the delta log and returns its
    /// payload address for chaining.
    pub fn append(
        log: &OrderedLog,
        key: RecordKey,
        version: Version,
        prev: u64,
        data: Option<&[u8]>,
    ) -> LogResult<u64> {
        let len = Self::encoded_len(data) as u32;
        let mut entry = log.append(len, EntryKind::Update.as_u32())?;
        let mut payload = entry.payload_mut();
        Self::encode(&mut payload, key, version, prev, data);
        log.seal(&entry);
        Ok(entry.payload_addr())
    }
}

/// A decoded insert entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertEntry<'a> {
    /// Key of the inserted row.
    pub key: RecordKey,
    /// Commit version of the insert.
    pub version: Version,
    /// Row data; `None` for an insert that was deleted in place.
    pub data: Option<&'a [u8]>,
}

impl<'a> InsertEntry<'a> {
    /// Encoded size for a payload of `data`.
    #[inline]
    #[must_use]
    pub fn encoded_len(data: Option<&[u8]>) -> usize {
        INSERT_HEADER_SIZE + data.map_or(0, <[u8]>::len)
    }

    /// Serializes an insert entry.
    pub fn encode(buf: &mut impl BufMut, key: RecordKey, version: Version, data: Option<&[u8]>) {
        buf.put_u64_le(key.as_u64());
        buf.put_u64_le(version.as_u64());
        match data {
            Some(data) => {
                buf.put_u32_le(0);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            None => {
                buf.put_u32_le(FLAG_TOMBSTONE);
                buf.put_u32_le(0);
            }
        }
    }

    /// Deserializes an insert entry from a log payload.
    pub fn decode(mut payload: &'a [u8]) -> GcResult<Self> {
        if payload.len() < INSERT_HEADER_SIZE {
            return Err(GcError::malformed(
                "insert",
                format!("payload of {} bytes is shorter than the header", payload.len()),
            ));
        }
        let key = RecordKey::new(payload.get_u64_le());
        let version = Version::new(payload.get_u64_le());
        let flags = payload.get_u32_le();
        let len = payload.get_u32_le() as usize;
        let data = if flags & FLAG_TOMBSTONE != 0 {
            None
        } else {
            if payload.len() < len {
                return Err(GcError::malformed("insert", "data length exceeds payload"));
            }
            Some(&payload[..len])
        };
        Ok(Self { key, version, data })
    }

    /// Appends a sealed insert entry to the insert log.
    pub fn append(
        log: &UnorderedLog,
        key: RecordKey,
        version: Version,
        data: Option<&[u8]>,
    ) -> LogResult<()> {
        let len = Self::encoded_len(data) as u32;
        let mut entry = log.append(len, EntryKind::Insert.as_u32())?;
        let mut payload = entry.payload_mut();
        Self::encode(&mut payload, key, version, data);
        entry.seal();
        Ok(())
    }
}
