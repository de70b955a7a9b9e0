//! System-wide constants.

// =============================================================================
// Page and arena constants
// =============================================================================

/// Size of a page in bytes (2 MiB).
///
/// Every structure in the engine works in units of this page: the log chains,
/// the row-store main pages and the GC fill pages. The arena is aligned to
/// `PAGE_SIZE`, so a page base address always has the low 21 bits clear.
pub const PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Cache line size on the CPUs we care about.
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Row-store constants
// =============================================================================

/// Leading bytes of a row-store page holding its used-byte count (`u64`).
pub const ROW_PAGE_HEADER_SIZE: usize = 8;

/// Alignment of multi-version records within a row-store page.
pub const RECORD_ALIGNMENT: usize = 8;
