//! The ordered log.
//!
//! A singly linked chain of log pages with three cursors:
//!
//! - `head`: the page accepting appends,
//! - `sealed_head`: the first position whose entry is not yet sealed; every
//!   position before it holds a sealed entry or lies past a sealed page's
//!   frozen watermark,
//! - `tail`: the oldest retained position, where consumers start.
//!
//! Producers append lock-free and seal their entries when the payload is
//! complete. Acquisition order and seal order may differ; the sealed head
//! only advances past contiguous sealed entries, so iterating
//! `[tail, sealed_head)` yields a stable prefix of the seal-completion
//! order and never exposes an unsealed entry.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rill_common::memory::CacheLineAligned;
use rill_common::{PageId, Reclaimer};
use rill_page::PageManager;

use crate::error::{LogError, LogResult};
use crate::page::{entry_size_from_size, LogEntry, LogPage, MAX_ENTRY_SIZE};

/// A position in the log chain: a page and a byte offset into its entry
/// area.
///
/// Positions pack into a single atomic word, which keeps the compound
/// `(page, offset)` read atomic without a double-width CAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    /// The page this position refers to.
    pub page: PageId,
    /// Byte offset into the page's entry area.
    pub offset: u32,
}

impl LogPosition {
    #[inline]
    pub(crate) const fn pack(self) -> u64 {
        ((self.page.as_u32() as u64) << 32) | self.offset as u64
    }

    #[inline]
    pub(crate) const fn unpack(word: u64) -> Self {
        Self {
            page: PageId::new((word >> 32) as u32),
            offset: word as u32,
        }
    }
}

/// The tail-anchored, in-order-consumable log.
pub struct OrderedLog {
    pages: Arc<PageManager>,
    reclaimer: Arc<dyn Reclaimer>,
    /// Page currently accepting appends.
    head: CacheLineAligned<AtomicU32>,
    /// Packed [`LogPosition`] of the first unsealed entry.
    sealed_head: CacheLineAligned<AtomicU64>,
    /// Packed [`LogPosition`] of the oldest retained entry.
    tail: CacheLineAligned<AtomicU64>,
    page_count: AtomicUsize,
}

impl OrderedLog {
    /// Creates a log with one empty page.
    ///
    /// Returns [`LogError::OutOfSpace`] if the arena cannot supply the
    /// initial page.
    pub fn new(pages: Arc<PageManager>, reclaimer: Arc<dyn Reclaimer>) -> LogResult<Self> {
        let first = pages.alloc().ok_or_else(|| {
            tracing::error!("page arena exhausted while creating a log");
            LogError::OutOfSpace
        })?;
        LogPage::format(&pages, first);

        let start = LogPosition {
            page: first,
            offset: 0,
        }
        .pack();

        Ok(Self {
            head: CacheLineAligned::new(AtomicU32::new(first.as_u32())),
            sealed_head: CacheLineAligned::new(AtomicU64::new(start)),
            tail: CacheLineAligned::new(AtomicU64::new(start)),
            page_count: AtomicUsize::new(1),
            pages,
            reclaimer,
        })
    }

    #[inline]
    fn view(&self, id: PageId) -> LogPage<'_> {
        LogPage::from_manager(&self.pages, id)
    }

    /// Acquires an entry of `size` payload bytes.
    ///
    /// The returned entry is *acquired*: the caller writes the payload and
    /// then calls [`seal`](Self::seal). Oversize payloads are rejected at
    /// this boundary; arena exhaustion surfaces as
    /// [`LogError::OutOfSpace`].
    pub fn append(&self, size: u32, entry_type: u32) -> LogResult<LogEntry<'_>> {
        let entry_size = entry_size_from_size(size);
        if entry_size > MAX_ENTRY_SIZE {
            return Err(LogError::entry_too_large(size));
        }

        let mut head = PageId::new(self.head.load(Ordering::SeqCst));
        loop {
            if let Some(entry) = self.view(head).append_entry(size, entry_size, entry_type) {
                return Ok(entry);
            }
            head = self.create_page(head)?;
        }
    }

    /// Appends, copies `payload` in and seals, in one call.
    pub fn append_sealed(&self, payload: &[u8], entry_type: u32) -> LogResult<LogEntry<'_>> {
        let mut entry = self.append(payload.len() as u32, entry_type)?;
        entry.payload_mut().copy_from_slice(payload);
        self.seal(&entry);
        Ok(entry)
    }

    /// Seals `entry` and, when it sits exactly at the sealed-head cursor,
    /// advances the cursor past every contiguously sealed entry.
    pub fn seal(&self, entry: &LogEntry<'_>) {
        entry.seal();

        let packed = self.sealed_head.load(Ordering::SeqCst);
        let cursor = LogPosition::unpack(packed);
        let cursor_addr = self.view(cursor.page).data_ptr() as usize + cursor.offset as usize;
        if cursor_addr != entry.header_addr() {
            return;
        }
        self.advance_sealed_head(packed);
    }

    /// Grows the chain past a full `old_head` page.
    fn create_page(&self, old_head: PageId) -> LogResult<PageId> {
        let old = self.view(old_head);

        // Another thread may already have linked a successor; just help the
        // head pointer along.
        if let Some(next) = old.next() {
            return Ok(
                match self.head.compare_exchange(
                    old_head.as_u32(),
                    next.as_u32(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => next,
                    Err(current) => PageId::new(current),
                },
            );
        }

        // Freeze the old head so stragglers cannot publish into it anymore.
        old.seal();

        let new_page = self.pages.alloc().ok_or_else(|| {
            tracing::error!("page arena exhausted while growing the log");
            LogError::OutOfSpace
        })?;
        LogPage::format(&self.pages, new_page);

        if let Err(linked) = old.cas_next(new_page) {
            // Lost the race; the speculative page never became reachable and
            // can be returned to the arena immediately.
            self.pages.free(new_page);
            return Ok(linked);
        }

        self.page_count.fetch_add(1, Ordering::Relaxed);

        // Move the head. Failure means another thread moved it for us.
        let _ = self.head.compare_exchange(
            old_head.as_u32(),
            new_page.as_u32(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        // If the sealed head is pinned at the end of the page we just
        // sealed, it must be helped across to the new page.
        let packed = self.sealed_head.load(Ordering::SeqCst);
        let cursor = LogPosition::unpack(packed);
        let (old_bytes, _) = old.offset_and_sealed();
        if cursor.page == old_head && cursor.offset == old_bytes {
            self.advance_sealed_head(packed);
        }

        Ok(new_page)
    }

    /// Walks the sealed-head cursor forward from `from` (a packed position)
    /// and publishes the furthest reachable position.
    fn advance_sealed_head(&self, from: u64) {
        let mut current = from;
        loop {
            let target = self.scan_sealed(current);
            if target == current {
                return;
            }
            match self.sealed_head.compare_exchange(
                current,
                target,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                // Another thread advanced the cursor; it owns the rest.
                Err(_) => return,
                // The entry at the new cursor may have been sealed between
                // the scan and the publish, in which case its sealer saw the
                // stale cursor and skipped the advance. Re-scan.
                Ok(_) => current = target,
            }
        }
    }

    /// Scans forward from a packed position over contiguously sealed
    /// entries, crossing sealed pages at their frozen watermark. Stops at
    /// the first unsealed entry, at the watermark of an active page, or
    /// when the next page is not yet linked.
    fn scan_sealed(&self, from: u64) -> u64 {
        let LogPosition { mut page, mut offset } = LogPosition::unpack(from);

        loop {
            let view = self.view(page);
            let (used, sealed) = view.offset_and_sealed();

            if offset >= used {
                // Nothing published at or past the cursor. On an active page
                // an append may still land here; on a sealed page any
                // acquired bytes past the watermark are abandoned garbage
                // and the chain continues on the next page, if it exists.
                if !sealed {
                    break;
                }
                match view.next() {
                    None => break,
                    Some(next) => {
                        page = next;
                        offset = 0;
                        continue;
                    }
                }
            }

            let entry = view.entry_at(offset);
            let (size, entry_sealed) = entry.size_and_sealed();
            debug_assert!(size != 0, "unacquired entry below the published watermark");
            if !entry_sealed {
                break;
            }
            offset += entry_size_from_size(size);
        }

        LogPosition { page, offset }.pack()
    }

    /// Moves the tail from `old` to `new`, releasing the pages in between
    /// through the reclaimer.
    ///
    /// Fails (returns `false`) if the tail is no longer `old`. The caller
    /// must guarantee `new` does not lie past the sealed head and that any
    /// reader still inside the truncated range is covered by the
    /// reclamation grace period.
    pub fn truncate(&self, old: LogPosition, new: LogPosition) -> bool {
        if self
            .tail
            .compare_exchange(old.pack(), new.pack(), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if old.page != new.page {
            let mut released = 0usize;
            let mut cursor = Some(old.page);
            while let Some(p) = cursor {
                if p == new.page {
                    break;
                }
                released += 1;
                cursor = self.view(p).next();
            }
            self.page_count.fetch_sub(released, Ordering::Relaxed);
            free_chain_deferred(
                &self.pages,
                self.reclaimer.as_ref(),
                old.page,
                Some(new.page),
            );
        }

        true
    }

    /// The oldest retained position.
    #[must_use]
    pub fn tail(&self) -> LogPosition {
        LogPosition::unpack(self.tail.load(Ordering::SeqCst))
    }

    /// The first unsealed position; iteration ends here.
    #[must_use]
    pub fn sealed_head(&self) -> LogPosition {
        LogPosition::unpack(self.sealed_head.load(Ordering::SeqCst))
    }

    /// Number of pages currently chained.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count.load(Ordering::Relaxed)
    }

    /// Iterates the sealed prefix `[tail, sealed_head)` in append order.
    #[must_use]
    pub fn iter(&self) -> OrderedLogIter<'_> {
        let tail = self.tail();
        let end = self.sealed_head();
        OrderedLogIter {
            log: self,
            page: tail.page,
            offset: tail.offset,
            end,
        }
    }
}

impl Drop for OrderedLog {
    fn drop(&mut self) {
        // The reclamation contract guarantees nobody references the log by
        // the time it drops, so the chain can go straight back to the arena.
        let mut cursor = Some(self.tail().page);
        while let Some(page) = cursor {
            cursor = self.view(page).next();
            self.pages.free(page);
        }
    }
}

impl fmt::Debug for OrderedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedLog")
            .field("pages", &self.page_count())
            .field("tail", &self.tail())
            .field("sealed_head", &self.sealed_head())
            .finish()
    }
}

/// Frees the chain `[begin, end)` once the reclamation grace period ends.
pub(crate) fn free_chain_deferred(
    pages: &Arc<PageManager>,
    reclaimer: &dyn Reclaimer,
    begin: PageId,
    end: Option<PageId>,
) {
    let pages = Arc::clone(pages);
    reclaimer.defer(Box::new(move || {
        let mut cursor = Some(begin);
        while let Some(page) = cursor {
            if Some(page) == end {
                break;
            }
            // Read the link before freeing: free zeroes the page.
            cursor = LogPage::from_manager(&pages, page).next();
            pages.free(page);
        }
    }));
}

/// Iterator over the sealed prefix of an [`OrderedLog`].
pub struct OrderedLogIter<'a> {
    log: &'a OrderedLog,
    page: PageId,
    offset: u32,
    end: LogPosition,
}

impl<'a> OrderedLogIter<'a> {
    /// The position of the next entry this iterator would yield.
    ///
    /// Snapshots taken here are valid arguments to
    /// [`OrderedLog::truncate`].
    #[must_use]
    pub fn position(&self) -> LogPosition {
        LogPosition {
            page: self.page,
            offset: self.offset,
        }
    }
}

impl<'a> Iterator for OrderedLogIter<'a> {
    type Item = LogEntry<'a>;

    fn next(&mut self) -> Option<LogEntry<'a>> {
        loop {
            if self.page == self.end.page && self.offset == self.end.offset {
                return None;
            }

            let view = self.log.view(self.page);
            let (used, sealed) = view.offset_and_sealed();
            if self.offset >= used {
                debug_assert!(sealed, "iterating past the watermark of an active page");
                match view.next() {
                    Some(next) => {
                        self.page = next;
                        self.offset = 0;
                        continue;
                    }
                    None => return None,
                }
            }

            let entry = view.entry_at(self.offset);
            let (size, entry_sealed) = entry.size_and_sealed();
            debug_assert!(size != 0 && entry_sealed, "unsealed entry below the sealed head");
            self.offset += entry_size_from_size(size);
            return Some(entry);
        }
    }
}
