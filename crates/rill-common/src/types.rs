//! Core identifier types.
//!
//! Type-safe wrappers around the raw integers the engine passes around,
//! preventing a page index from being confused with a commit version or a
//! record key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a page slot in the arena.
///
/// Pages are addressed by their index into the [`PageManager`] arena rather
/// than by raw pointer, which lets a `(page, offset)` position pack into a
/// single atomic word.
///
/// [`PageManager`]: https://docs.rs/rill-page
///
/// # Example
///
/// ```rust
/// use rill_common::types::PageId;
///
/// let page = PageId::new(42);
/// assert_eq!(page.as_u32(), 42);
/// assert!(page.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PageId(u32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: Self = Self(u32::MAX);

    /// Creates a page id from a raw slot index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the slot index as a `usize` for arena arithmetic.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Checks whether this id refers to an actual slot.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "PageId(INVALID)")
        } else {
            write!(f, "PageId({})", self.0)
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A commit version number.
///
/// Versions are assigned by the commit manager and are monotonically
/// non-decreasing. The GC consults the *lowest active version*: the smallest
/// version any live reader may still request. Versions at or below that
/// floor collapse to a single snapshot during compaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Version(u64);

impl Version {
    /// The zero version, older than any commit.
    pub const ZERO: Self = Self(0);

    /// Creates a version from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A row key.
///
/// Keys in the core are opaque 64-bit values; schema-level key encoding
/// happens in the layers above.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RecordKey(u64);

impl RecordKey {
    /// Creates a key from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({})", self.0)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordKey {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// The in-memory address of a record.
///
/// Reported to the primary index when the GC relocates a record into a fill
/// page. Valid for as long as the page holding the record is reachable.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RecordAddr(u64);

impl RecordAddr {
    /// Creates an address from a raw pointer value.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw pointer value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address as a const pointer.
    #[inline]
    #[must_use]
    pub const fn as_ptr(self) -> *const u8 {
        self.0 as *const u8
    }
}

impl fmt::Debug for RecordAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordAddr({:#x})", self.0)
    }
}
