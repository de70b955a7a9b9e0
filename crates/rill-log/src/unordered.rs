//! The unordered log.
//!
//! A multi-producer sink without ordering semantics. The log keeps two
//! heads in one atomic word:
//!
//! - the *write head*, where single-entry appends land,
//! - the *append head*, which receives whole spliced sublists.
//!
//! Spliced sublists sit in front of the write head in chain order, so a
//! traversal from the append head reaches every page. The tail marks the
//! oldest retained page; [`erase`](UnorderedLog::erase) detaches a chain
//! segment and hands it to the reclaimer.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rill_common::memory::CacheLineAligned;
use rill_common::{PageId, Reclaimer};
use rill_page::PageManager;

use crate::error::{LogError, LogResult};
use crate::ordered::free_chain_deferred;
use crate::page::{entry_size_from_size, LogEntry, LogPage, MAX_ENTRY_SIZE};

/// The two chain heads, packed into one atomic word as `PageId + 1` codes
/// (`0` = none) so the compound read stays atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogHead {
    write: Option<PageId>,
    append: Option<PageId>,
}

impl LogHead {
    #[inline]
    const fn code(page: Option<PageId>) -> u64 {
        match page {
            Some(id) => id.as_u32() as u64 + 1,
            None => 0,
        }
    }

    #[inline]
    fn decode(code: u32) -> Option<PageId> {
        if code == 0 {
            None
        } else {
            Some(PageId::new(code - 1))
        }
    }

    #[inline]
    const fn pack(self) -> u64 {
        (Self::code(self.write) << 32) | Self::code(self.append)
    }

    #[inline]
    fn unpack(word: u64) -> Self {
        Self {
            write: Self::decode((word >> 32) as u32),
            append: Self::decode(word as u32),
        }
    }
}

/// The two-headed, unordered log.
pub struct UnorderedLog {
    pages: Arc<PageManager>,
    reclaimer: Arc<dyn Reclaimer>,
    /// Packed [`LogHead`].
    head: CacheLineAligned<AtomicU64>,
    /// Oldest retained page.
    tail: CacheLineAligned<AtomicU32>,
    page_count: AtomicUsize,
}

impl UnorderedLog {
    /// Creates a log with one empty page.
    pub fn new(pages: Arc<PageManager>, reclaimer: Arc<dyn Reclaimer>) -> LogResult<Self> {
        let first = pages.alloc().ok_or_else(|| {
            tracing::error!("page arena exhausted while creating a log");
            LogError::OutOfSpace
        })?;
        LogPage::format(&pages, first);

        let head = LogHead {
            write: Some(first),
            append: None,
        };

        Ok(Self {
            head: CacheLineAligned::new(AtomicU64::new(head.pack())),
            tail: CacheLineAligned::new(AtomicU32::new(first.as_u32())),
            page_count: AtomicUsize::new(1),
            pages,
            reclaimer,
        })
    }

    #[inline]
    fn view(&self, id: PageId) -> LogPage<'_> {
        LogPage::from_manager(&self.pages, id)
    }

    /// Acquires an entry of `size` payload bytes on the write head.
    ///
    /// The caller writes the payload and seals the entry directly via
    /// [`LogEntry::seal`]; this log has no ordering cursor to maintain.
    pub fn append(&self, size: u32, entry_type: u32) -> LogResult<LogEntry<'_>> {
        let entry_size = entry_size_from_size(size);
        if entry_size > MAX_ENTRY_SIZE {
            return Err(LogError::entry_too_large(size));
        }

        let mut head = LogHead::unpack(self.head.load(Ordering::SeqCst));
        loop {
            let write = head.write.ok_or(LogError::OutOfSpace)?;
            if let Some(entry) = self.view(write).append_entry(size, entry_size, entry_type) {
                return Ok(entry);
            }
            head = self.create_page(head)?;
        }
    }

    /// Appends, copies `payload` in and seals, in one call.
    pub fn append_sealed(&self, payload: &[u8], entry_type: u32) -> LogResult<LogEntry<'_>> {
        let mut entry = self.append(payload.len() as u32, entry_type)?;
        entry.payload_mut().copy_from_slice(payload);
        entry.seal();
        Ok(entry)
    }

    /// Rotates past a full write head.
    fn create_page(&self, mut old: LogHead) -> LogResult<LogHead> {
        let stale_write = old.write.expect("rotating a log without a write head");

        // Freeze the old write head so no one can append to it anymore.
        self.view(stale_write).seal();

        loop {
            // A waiting spliced sublist becomes the new write head; only
            // when none is waiting does a fresh page get allocated.
            let mut new_head = LogHead {
                write: old.append,
                append: None,
            };

            let mut speculative = None;
            if old.append.is_none() {
                let id = self.pages.alloc().ok_or_else(|| {
                    tracing::error!("page arena exhausted while growing the log");
                    LogError::OutOfSpace
                })?;
                let page = LogPage::format(&self.pages, id);
                page.set_next(stale_write);
                self.page_count.fetch_add(1, Ordering::Relaxed);
                new_head.write = Some(id);
                speculative = Some(id);
            }

            match self.head.compare_exchange(
                old.pack(),
                new_head.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(new_head),
                Err(current) => {
                    let current = LogHead::unpack(current);
                    if let Some(id) = speculative {
                        // The page never became reachable; free it now.
                        self.page_count.fetch_sub(1, Ordering::Relaxed);
                        self.pages.free(id);
                    }
                    if current.write == old.write {
                        // Only the append head changed; retry the rotation.
                        old = current;
                        continue;
                    }
                    // Another thread rotated the write head for us.
                    return Ok(current);
                }
            }
        }
    }

    /// Splices the externally built chain `begin ..= end` into the append
    /// head.
    ///
    /// The chain must be linked `begin → … → end` through its `next`
    /// pointers; `end`'s link is overwritten to attach the chain in front
    /// of the existing pages.
    pub fn append_page(&self, begin: PageId, end: PageId) {
        let mut spliced = 1usize;
        let mut cursor = begin;
        while cursor != end {
            spliced += 1;
            cursor = self
                .view(cursor)
                .next()
                .expect("spliced chain must reach its end page");
        }
        self.page_count.fetch_add(spliced, Ordering::Relaxed);

        let mut old = LogHead::unpack(self.head.load(Ordering::SeqCst));
        loop {
            // The chain goes in front of the waiting sublist, or in front of
            // the write head if none is waiting.
            let link = old
                .append
                .or(old.write)
                .expect("log must have a head page");
            self.view(end).set_next(link);

            // The previous append head can no longer take direct appends.
            if let Some(append) = old.append {
                self.view(append).seal();
            }

            let new_head = LogHead {
                write: old.write,
                append: Some(begin),
            };
            match self.head.compare_exchange(
                old.pack(),
                new_head.pack(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(current) => old = LogHead::unpack(current),
            }
        }
    }

    /// Detaches the segment strictly between `begin` and `end` and defers
    /// its release. Passing `end = None` detaches everything behind
    /// `begin` and makes `begin` the new tail.
    pub fn erase(&self, begin: PageId, end: Option<PageId>) {
        if Some(begin) == end {
            return;
        }

        if end.is_none() {
            self.tail.store(begin.as_u32(), Ordering::SeqCst);
        }

        let detached = self.view(begin).exchange_next(end);
        if detached == end {
            return;
        }
        let Some(first) = detached else {
            return;
        };

        let mut removed = 0usize;
        let mut cursor = Some(first);
        while let Some(page) = cursor {
            if Some(page) == end {
                break;
            }
            removed += 1;
            cursor = self.view(page).next();
        }
        self.page_count.fetch_sub(removed, Ordering::Relaxed);

        free_chain_deferred(&self.pages, self.reclaimer.as_ref(), first, end);
    }

    /// The oldest retained page.
    #[must_use]
    pub fn tail_page(&self) -> PageId {
        PageId::new(self.tail.load(Ordering::SeqCst))
    }

    /// The page currently accepting single-entry appends.
    ///
    /// Useful as the `begin` argument of [`erase`](Self::erase) when
    /// truncating everything older than the active page.
    #[must_use]
    pub fn write_head_page(&self) -> PageId {
        LogHead::unpack(self.head.load(Ordering::SeqCst))
            .write
            .expect("log must have a write head")
    }

    /// Number of pages currently chained.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count.load(Ordering::Relaxed)
    }

    /// Iterates every entry reachable from the heads, newest page first.
    ///
    /// Entries may still be mid-write; consumers check
    /// [`LogEntry::is_sealed`] before interpreting payloads.
    #[must_use]
    pub fn iter(&self) -> UnorderedLogIter<'_> {
        let head = LogHead::unpack(self.head.load(Ordering::SeqCst));
        let start = head.append.or(head.write);
        let used = start.map_or(0, |p| self.view(p).offset_and_sealed().0);
        UnorderedLogIter {
            log: self,
            page: start,
            offset: 0,
            used,
        }
    }
}

impl Drop for UnorderedLog {
    fn drop(&mut self) {
        let head = LogHead::unpack(self.head.load(Ordering::SeqCst));
        let mut cursor = head.append.or(head.write);
        while let Some(page) = cursor {
            cursor = self.view(page).next();
            self.pages.free(page);
        }
    }
}

impl fmt::Debug for UnorderedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnorderedLog")
            .field("pages", &self.page_count())
            .field("tail", &self.tail_page())
            .finish()
    }
}

/// Iterator over every published entry of an [`UnorderedLog`].
pub struct UnorderedLogIter<'a> {
    log: &'a UnorderedLog,
    page: Option<PageId>,
    offset: u32,
    /// Watermark of the current page, snapshotted when the page is entered.
    used: u32,
}

impl<'a> Iterator for UnorderedLogIter<'a> {
    type Item = LogEntry<'a>;

    fn next(&mut self) -> Option<LogEntry<'a>> {
        loop {
            let page = self.page?;
            let view = self.log.view(page);

            if self.offset >= self.used {
                self.page = view.next();
                self.offset = 0;
                self.used = self
                    .page
                    .map_or(0, |p| self.log.view(p).offset_and_sealed().0);
                continue;
            }

            let entry = view.entry_at(self.offset);
            let (size, _) = entry.size_and_sealed();
            debug_assert!(size != 0, "unacquired entry below the published watermark");
            self.offset += entry_size_from_size(size);
            return Some(entry);
        }
    }
}
