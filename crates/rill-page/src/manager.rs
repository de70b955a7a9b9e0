//! The page arena.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use rill_common::memory::ArenaBuffer;
use rill_common::{ConfigResult, PageId, StorageConfig, PAGE_SIZE};

use crate::PageStack;

/// Owns the page arena and its free list.
///
/// A single contiguous region of `N * PAGE_SIZE` bytes is allocated at
/// construction, aligned to `PAGE_SIZE`, and every page is pushed onto a
/// lock-free free stack. `alloc` and `free` are safe to call from any number
/// of threads. The arena never grows or shrinks.
///
/// # Example
///
/// ```rust
/// use rill_common::PAGE_SIZE;
/// use rill_page::PageManager;
///
/// let manager = PageManager::new(4 * PAGE_SIZE);
/// let page = manager.alloc().expect("arena not exhausted");
/// assert!(page.is_valid());
/// manager.free(page);
/// ```
pub struct PageManager {
    arena: ArenaBuffer,
    page_count: usize,
    free: PageStack,
    allocated: AtomicUsize,
}

impl PageManager {
    /// Creates an arena of `size_bytes`, which must be a nonzero multiple of
    /// [`PAGE_SIZE`].
    ///
    /// # Panics
    ///
    /// Panics if `size_bytes` is zero or not page-aligned, or if the
    /// allocation itself fails.
    #[must_use]
    pub fn new(size_bytes: usize) -> Self {
        assert!(size_bytes > 0, "arena size must be greater than 0");
        assert!(
            size_bytes % PAGE_SIZE == 0,
            "arena size must be a multiple of the page size"
        );

        let page_count = size_bytes / PAGE_SIZE;
        let arena = ArenaBuffer::zeroed(size_bytes, PAGE_SIZE);
        let free = PageStack::new(page_count);
        // Push in reverse so low indices pop first; allocation order is
        // unspecified either way.
        for index in (0..page_count).rev() {
            let pushed = free.push(index as u32);
            debug_assert!(pushed);
        }

        tracing::debug!(pages = page_count, "page arena initialized");

        Self {
            arena,
            page_count,
            free,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Creates an arena from a validated configuration.
    pub fn from_config(config: &StorageConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::new(config.arena_bytes))
    }

    /// Allocates a page. Returns `None` when the arena is exhausted.
    ///
    /// The returned page is zeroed: pages come zeroed out of the initial
    /// arena allocation and are re-zeroed on [`free`](Self::free).
    #[must_use]
    pub fn alloc(&self) -> Option<PageId> {
        let index = self.free.pop()?;
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Some(PageId::new(index))
    }

    /// Returns a page to the free list.
    ///
    /// The page is zeroed before it becomes available again, so the next
    /// `alloc` hands out clean memory.
    pub fn free(&self, page: PageId) {
        debug_assert!(page.index() < self.page_count, "page out of range");

        // SAFETY: the page base is inside the arena and exclusively owned by
        // the caller at this point.
        unsafe {
            std::ptr::write_bytes(self.page_ptr(page).as_ptr(), 0, PAGE_SIZE);
        }

        self.allocated.fetch_sub(1, Ordering::Relaxed);
        let pushed = self.free.push(page.as_u32());
        debug_assert!(pushed, "free list overflow");
    }

    /// Resolves a page id to its base address.
    ///
    /// The pointer stays valid for the lifetime of the manager; whether the
    /// memory may be read or written is governed by who owns the page.
    #[inline]
    #[must_use]
    pub fn page_ptr(&self, page: PageId) -> NonNull<u8> {
        debug_assert!(page.index() < self.page_count, "page out of range");
        // SAFETY: the offset stays within the arena allocation.
        unsafe {
            NonNull::new_unchecked(self.arena.as_ptr().add(page.index() * PAGE_SIZE))
        }
    }

    /// Maps an address inside the arena back to its page and in-page offset.
    ///
    /// Returns `None` for addresses outside the arena.
    #[must_use]
    pub fn locate(&self, addr: usize) -> Option<(PageId, usize)> {
        if !self.arena.contains(addr) {
            return None;
        }
        let delta = addr - self.arena.base_addr();
        Some((PageId::new((delta / PAGE_SIZE) as u32), delta % PAGE_SIZE))
    }

    /// Total number of pages in the arena.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.page_count
    }

    /// Number of pages currently allocated.
    #[inline]
    #[must_use]
    pub fn allocated_pages(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of pages available for allocation.
    #[inline]
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.free.len()
    }
}

impl fmt::Debug for PageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageManager")
            .field("page_count", &self.page_count)
            .field("allocated", &self.allocated_pages())
            .finish()
    }
}
