//! # rill-common
//!
//! Foundation crate for RillDB: typed identifiers, system constants,
//! configuration, aligned memory and the deferred-reclamation contract.
//!
//! Everything here is shared by the page arena (`rill-page`), the log
//! substrate (`rill-log`) and the delta-main row store (`rill-deltamain`):
//!
//! - **Types**: `PageId`, `Version`, `RecordKey`, `RecordAddr`
//! - **Config**: `StorageConfig` with validation
//! - **Memory**: `ArenaBuffer` (aligned, zeroed) and `CacheLineAligned<T>`
//! - **Reclaim**: the `Reclaimer` trait consumed by every structure that
//!   retires shared pages

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod memory;
pub mod reclaim;
pub mod types;

pub use config::StorageConfig;
pub use constants::PAGE_SIZE;
pub use error::{ConfigError, ConfigResult};
pub use reclaim::Reclaimer;
pub use types::{PageId, RecordAddr, RecordKey, Version};
