//! Deferred reclamation contract.
//!
//! The engine never frees a page that a concurrent reader might still
//! observe. Instead, destructive work is handed to a [`Reclaimer`], which
//! runs it once every thread that could hold a reference acquired before the
//! handoff has quiesced. The epoch machinery that decides *when* that is
//! lives outside this repository; the structures here only consume the
//! contract.
//!
//! Two implementations are provided for composition and tests:
//!
//! - [`ImmediateReclaimer`] runs closures inline. Only correct when no
//!   concurrent reader can exist (single-threaded tests, teardown).
//! - [`QueuedReclaimer`] queues closures until an explicit [`drain`]
//!   simulates the grace period expiring.
//!
//! [`drain`]: QueuedReclaimer::drain

use std::fmt;

use parking_lot::Mutex;

/// A deferred-destruction service.
pub trait Reclaimer: Send + Sync {
    /// Schedules `f` to run once no thread retains a reference acquired
    /// before this call returned.
    fn defer(&self, f: Box<dyn FnOnce() + Send>);
}

/// Runs deferred closures immediately.
///
/// Correct only when the caller can prove no concurrent reader exists; the
/// deferred closure frees memory the "grace period" would otherwise protect.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateReclaimer;

impl Reclaimer for ImmediateReclaimer {
    fn defer(&self, f: Box<dyn FnOnce() + Send>) {
        f();
    }
}

/// Queues deferred closures until drained.
///
/// `drain` stands in for the end of the grace period; dropping the reclaimer
/// drains whatever is still pending.
#[derive(Default)]
pub struct QueuedReclaimer {
    pending: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl QueuedReclaimer {
    /// Creates an empty reclaimer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of closures waiting for the grace period.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs every queued closure. Returns how many ran.
    pub fn drain(&self) -> usize {
        let batch = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        let count = batch.len();
        for f in batch {
            f();
        }
        count
    }
}

impl Reclaimer for QueuedReclaimer {
    fn defer(&self, f: Box<dyn FnOnce() + Send>) {
        self.pending.lock().push(f);
    }
}

impl Drop for QueuedReclaimer {
    fn drop(&mut self) {
        self.drain();
    }
}

impl fmt::Debug for QueuedReclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedReclaimer")
            .field("pending", &self.pending())
            .finish()
    }
}
