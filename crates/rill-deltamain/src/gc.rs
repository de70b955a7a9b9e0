//! Generational garbage collection.
//!
//! A sweep is serialized per table: one [`Compactor`] walks the table's
//! main pages, rewrites everything that needs cleaning into fill pages and
//! reports relocations to the primary index through [`IndexModifier`].
//! Input pages are retired through the deferred-reclamation contract the
//! moment they are known to be superseded; their memory stays readable
//! until concurrent readers quiesce.

use std::collections::HashMap;
use std::sync::Arc;

use rill_common::constants::ROW_PAGE_HEADER_SIZE;
use rill_common::{PageId, RecordAddr, RecordKey, Reclaimer, Version, PAGE_SIZE};
use rill_log::UnorderedLog;
use rill_page::PageManager;

use crate::error::{GcError, GcResult};
use crate::insert_map::InsertMap;
use crate::page::RowStorePage;
use crate::record::{MultiVersionRecord, RECORD_TYPE_MULTI_VERSION};

/// Mutating access to the primary hash index.
///
/// `insert` with `relocation = true` replaces the existing canonical
/// location of `key`; with `relocation = false` it first-publishes a key
/// that the index did not resolve before (a folded insert).
pub trait IndexModifier {
    /// Records `addr` as the canonical location of `key`.
    fn insert(&mut self, key: RecordKey, addr: RecordAddr, relocation: bool);

    /// Resolves the canonical location of `key`.
    fn get(&self, key: RecordKey) -> Option<RecordAddr>;
}

/// A plain in-memory index, sufficient for single-threaded sweeps and
/// tests. Production tables plug their concurrent index in through
/// [`IndexModifier`] instead.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: HashMap<u64, RecordAddr>,
}

impl HashIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no key is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IndexModifier for HashIndex {
    fn insert(&mut self, key: RecordKey, addr: RecordAddr, relocation: bool) {
        let previous = self.entries.insert(key.as_u64(), addr);
        debug_assert!(
            !relocation || previous.is_some(),
            "relocation of a key the index never resolved"
        );
    }

    fn get(&self, key: RecordKey) -> Option<RecordAddr> {
        self.entries.get(&key.as_u64()).copied()
    }
}

/// Outcome of one [`Compactor::gc`] call on an input page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcStep {
    /// The first-visit scan found nothing to clean; the input page stays.
    Clean,
    /// The fill page ran full and was finalized; call again with the same
    /// input page to continue where the scan stopped.
    FillFull(PageId),
    /// The input page is fully relocated (and already retired); the open
    /// fill page carries over to the next input page.
    Drained,
}

/// The relocation vehicle for insert folding: a record with one deleted
/// version (version 0, empty data region) whose key is rewritten per fold.
#[repr(align(8))]
struct VehicleRecord([u8; 40]);

impl VehicleRecord {
    fn new() -> Self {
        let mut buf = [0u8; 40];
        buf[0] = RECORD_TYPE_MULTI_VERSION;
        buf[4..8].copy_from_slice(&1u32.to_le_bytes());
        // Bytes 8..16 hold the key, rewritten per use; 16..24 stay zero (no
        // pending updates); 24..32 hold version 0, the deleted floor.
        buf[32..36].copy_from_slice(&40u32.to_le_bytes());
        buf[36..40].copy_from_slice(&40u32.to_le_bytes());
        Self(buf)
    }

    fn set_key(&mut self, key: RecordKey) {
        self.0[8..16].copy_from_slice(&key.as_u64().to_le_bytes());
    }

    fn record(&self) -> MultiVersionRecord<'_> {
        MultiVersionRecord::from_slice(&self.0)
    }
}

/// Compacts input pages into fill pages.
///
/// One compactor runs one sweep; GC over a table is serialized by
/// contract, so nothing here is synchronized. The fill cursor survives
/// across input pages: a half-filled fill page keeps accepting survivors
/// from the next page until it runs full.
pub struct Compactor {
    pages: Arc<PageManager>,
    reclaimer: Arc<dyn Reclaimer>,
    fill_page: Option<PageId>,
    fill_offset: usize,
}

impl Compactor {
    /// Creates a compactor drawing fill pages from `pages`.
    #[must_use]
    pub fn new(pages: Arc<PageManager>, reclaimer: Arc<dyn Reclaimer>) -> Self {
        Self {
            pages,
            reclaimer,
            fill_page: None,
            fill_offset: ROW_PAGE_HEADER_SIZE,
        }
    }

    /// True while a fill page is open.
    #[must_use]
    pub fn has_open_fill(&self) -> bool {
        self.fill_page.is_some()
    }

    fn ensure_fill_page(&mut self) -> GcResult<()> {
        if self.fill_page.is_none() {
            let id = self.pages.alloc().ok_or_else(|| {
                tracing::error!("page arena exhausted while constructing a fill page");
                GcError::OutOfSpace
            })?;
            self.fill_page = Some(id);
            self.fill_offset = ROW_PAGE_HEADER_SIZE;
        }
        Ok(())
    }

    fn fill_cursor_addr(&self) -> u64 {
        let id = self.fill_page.expect("no open fill page");
        self.pages.page_ptr(id).as_ptr() as u64 + self.fill_offset as u64
    }

    fn remaining_space(&mut self) -> &mut [u8] {
        let id = self.fill_page.expect("no open fill page");
        let base = self.pages.page_ptr(id).as_ptr();
        // SAFETY: the compactor owns the fill page; the region is inside it.
        unsafe {
            std::slice::from_raw_parts_mut(
                base.add(self.fill_offset),
                PAGE_SIZE - self.fill_offset,
            )
        }
    }

    /// Writes the used-bytes header and hands the fill page over.
    fn finalize_fill(&mut self) -> PageId {
        let id = self.fill_page.take().expect("no open fill page");
        let base = self.pages.page_ptr(id).as_ptr();
        // SAFETY: the page base is valid and 8-byte aligned.
        unsafe {
            base.cast::<u64>().write((self.fill_offset as u64).to_le());
        }
        tracing::debug!(page = %id, used = self.fill_offset, "fill page finalized");
        self.fill_offset = ROW_PAGE_HEADER_SIZE;
        id
    }

    /// Schedules the release of a superseded input page.
    fn retire_input_page(&self, id: PageId) {
        tracing::debug!(page = %id, "input page marked for deletion");
        let pages = Arc::clone(&self.pages);
        self.reclaimer.defer(Box::new(move || pages.free(id)));
    }

    /// Runs one GC step over `page`.
    ///
    /// On the first visit the page is scanned; if no record needs cleaning
    /// it is left untouched. Otherwise the page is retired and its records
    /// are compacted into the fill page, each surviving record being
    /// reported to `index` as a relocation. When the fill page runs full
    /// it is finalized and returned; the input page remembers the resume
    /// offset for the next call.
    pub fn gc(
        &mut self,
        page: &mut RowStorePage<'_>,
        lowest: Version,
        insert_map: &mut InsertMap,
        index: &mut dyn IndexModifier,
    ) -> GcResult<GcStep> {
        let size = page.used_bytes();

        if page.start_offset() == ROW_PAGE_HEADER_SIZE {
            // First visit: decide whether this page needs any work.
            let mut has_to_clean = false;
            let mut offset = ROW_PAGE_HEADER_SIZE;
            while offset < size {
                let record = page.record_at(offset);
                if record.needs_cleaning(lowest, insert_map) {
                    has_to_clean = true;
                    break;
                }
                offset += record.size();
            }
            if !has_to_clean {
                return Ok(GcStep::Clean);
            }
            self.retire_input_page(page.id());
        }

        self.ensure_fill_page()?;

        let mut offset = page.start_offset();
        while offset < size {
            let record = page.record_at(offset);
            let mut could_relocate = false;
            let addr = RecordAddr::new(self.fill_cursor_addr());
            let written =
                record.copy_and_compact(lowest, insert_map, self.remaining_space(), &mut could_relocate);
            if !could_relocate {
                // Fill page full: hand it out and resume here next call.
                page.set_start_offset(offset);
                return Ok(GcStep::FillFull(self.finalize_fill()));
            }
            self.fill_offset += written;
            if written > 0 {
                index.insert(record.key(), addr, true);
            }
            offset += record.size();
        }

        page.set_start_offset(size);
        Ok(GcStep::Drained)
    }

    /// Folds the remaining pending inserts into the fill page.
    ///
    /// Keys the index already resolves were consumed by an earlier cycle
    /// (the insert log truncates at page granularity) and are dropped.
    /// Each folded key is reported to `index` as a fresh location, not a
    /// relocation. The fill page is finalized and returned; when pending
    /// inserts remain, the caller invokes this again and a new fill page
    /// is constructed.
    pub fn fill_with_inserts(
        &mut self,
        lowest: Version,
        insert_map: &mut InsertMap,
        index: &mut dyn IndexModifier,
    ) -> GcResult<Option<PageId>> {
        if insert_map.is_empty() && self.fill_page.is_none() {
            return Ok(None);
        }
        self.ensure_fill_page()?;

        let mut vehicle = VehicleRecord::new();
        while let Some(key) = insert_map.first_key() {
            if index.get(key).is_some() {
                insert_map.remove(key);
                continue;
            }

            vehicle.set_key(key);
            let record = vehicle.record();
            let mut could_relocate = false;
            let addr = RecordAddr::new(self.fill_cursor_addr());
            let written =
                record.copy_and_compact(lowest, insert_map, self.remaining_space(), &mut could_relocate);
            if !could_relocate {
                if self.fill_offset == ROW_PAGE_HEADER_SIZE {
                    // Does not fit even in an empty page; rotating fill
                    // pages forever would not help.
                    tracing::warn!(
                        key = key.as_u64(),
                        "pending insert larger than an empty fill page, dropping"
                    );
                    insert_map.remove(key);
                    continue;
                }
                break;
            }
            self.fill_offset += written;
            if written > 0 {
                index.insert(key, addr, false);
            }
            // The fold consumed the key; stale keys were erased above.
            insert_map.remove(key);
        }

        Ok(Some(self.finalize_fill()))
    }
}

/// Table-level sweep driver.
///
/// Builds the [`InsertMap`] from the insert log, compacts every input
/// page, folds the remaining inserts, and returns the surviving page set
/// (kept clean pages plus finalized fill pages, in sweep order).
pub struct GarbageCollector {
    pages: Arc<PageManager>,
    reclaimer: Arc<dyn Reclaimer>,
}

impl GarbageCollector {
    /// Creates a sweep driver.
    #[must_use]
    pub fn new(pages: Arc<PageManager>, reclaimer: Arc<dyn Reclaimer>) -> Self {
        Self { pages, reclaimer }
    }

    /// Runs one full sweep.
    pub fn run(
        &self,
        input_pages: &[PageId],
        lowest: Version,
        insert_log: &UnorderedLog,
        index: &mut dyn IndexModifier,
    ) -> GcResult<Vec<PageId>> {
        let mut insert_map = InsertMap::from_log(insert_log)?;
        let mut compactor = Compactor::new(Arc::clone(&self.pages), Arc::clone(&self.reclaimer));
        let mut survivors = Vec::new();

        for &id in input_pages {
            let mut page = RowStorePage::new(&self.pages, id);
            loop {
                match compactor.gc(&mut page, lowest, &mut insert_map, index)? {
                    GcStep::Clean => {
                        survivors.push(id);
                        break;
                    }
                    GcStep::FillFull(full) => survivors.push(full),
                    GcStep::Drained => break,
                }
            }
        }

        while !insert_map.is_empty() || compactor.has_open_fill() {
            match compactor.fill_with_inserts(lowest, &mut insert_map, index)? {
                Some(page) => survivors.push(page),
                None => break,
            }
        }

        tracing::debug!(
            inputs = input_pages.len(),
            outputs = survivors.len(),
            lowest = lowest.as_u64(),
            "gc sweep complete"
        );
        Ok(survivors)
    }
}
