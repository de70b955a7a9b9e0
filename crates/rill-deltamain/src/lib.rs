//! # rill-deltamain
//!
//! The delta-main row store: pages of multi-version records, the pending
//! insert map, and the generational garbage collector that compacts both
//! into fresh fill pages.
//!
//! Writes land in two logs (`rill-log`): updates to existing rows go to the
//! ordered delta log and hang off their record's `newest` chain; inserts of
//! new rows go to the unordered insert log. A GC sweep walks the row-store
//! main pages, collapses version chains down to what the *lowest active
//! version* still requires, folds pending inserts in, writes the survivors
//! into newly allocated fill pages and reports every relocation to the
//! primary index. Superseded pages are retired through the deferred
//! reclamation contract.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod delta;
mod error;
mod gc;
mod insert_map;
mod page;
mod record;

pub use delta::{EntryKind, InsertEntry, UpdateEntry, INSERT_HEADER_SIZE, UPDATE_HEADER_SIZE};
pub use error::{GcError, GcResult};
pub use gc::{Compactor, GarbageCollector, GcStep, HashIndex, IndexModifier};
pub use insert_map::{InsertMap, PendingInsert};
pub use page::{RecordIter, RowStorePage};
pub use record::{
    build_record, record_size, MultiVersionRecord, VersionEntry, VersionIter,
    RECORD_TYPE_MULTI_VERSION,
};
