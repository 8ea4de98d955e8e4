//! Single-pass lease.
//!
//! A scheduler may invoke a pass while the previous one is still running.
//! The overlapping invocation must be skipped, not queued: each pipeline owns
//! a `PassLease` and a pass only runs while it holds the `LeaseGuard`.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// An exclusive, non-blocking lease on one kind of pass.
#[derive(Debug, Default)]
pub struct PassLease {
    held: AtomicBool,
}

impl PassLease {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease, or return `None` if a pass already holds it.
    pub fn try_acquire(&self) -> Option<LeaseGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LeaseGuard { lease: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the lease when dropped, including on early return or error.
#[derive(Debug)]
pub struct LeaseGuard<'a> {
    lease: &'a PassLease,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.lease.held.store(false, Ordering::Release);
    }
}

/// What a scan or replay pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassOutcome {
    /// Another pass held the lease; nothing was done.
    Skipped,
    Completed(PassStats),
}

/// Progress counters for one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    /// Blocks covered (scan) or raw events consumed (replay).
    pub units: u64,
    /// Raw events appended (scan) or tile mutations applied (replay).
    pub applied: u64,
    /// Duplicates skipped.
    pub duplicates: u64,
    /// Cursor position at the end of the pass.
    pub cursor: u64,
}
