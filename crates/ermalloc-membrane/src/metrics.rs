//! Atomic counters for heap observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-heap operation counters.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Successful `malloc`/`calloc`/`reallocarray`-as-alloc calls.
    pub allocations: AtomicU64,
    pub frees: AtomicU64,
    pub reallocs: AtomicU64,
    pub policy_changes: AtomicU64,
    /// Successful `setup_policies` calls.
    pub setups: AtomicU64,
    /// `correct_buffer` calls.
    pub corrections: AtomicU64,
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    /// Units repaired (copies or symbols) across all operations.
    pub corrected_errors: AtomicU64,
    /// Operations that met at least one unrepairable granule.
    pub uncorrectable_events: AtomicU64,
    pub out_of_memory: AtomicU64,
}

impl EngineMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            reallocs: AtomicU64::new(0),
            policy_changes: AtomicU64::new(0),
            setups: AtomicU64::new(0),
            corrections: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            corrected_errors: AtomicU64::new(0),
            uncorrectable_events: AtomicU64::new(0),
            out_of_memory: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            allocations: Self::get(&self.allocations),
            frees: Self::get(&self.frees),
            reallocs: Self::get(&self.reallocs),
            policy_changes: Self::get(&self.policy_changes),
            setups: Self::get(&self.setups),
            corrections: Self::get(&self.corrections),
            reads: Self::get(&self.reads),
            writes: Self::get(&self.writes),
            corrected_errors: Self::get(&self.corrected_errors),
            uncorrectable_events: Self::get(&self.uncorrectable_events),
            out_of_memory: Self::get(&self.out_of_memory),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub allocations: u64,
    pub frees: u64,
    pub reallocs: u64,
    pub policy_changes: u64,
    pub setups: u64,
    pub corrections: u64,
    pub reads: u64,
    pub writes: u64,
    pub corrected_errors: u64,
    pub uncorrectable_events: u64,
    pub out_of_memory: u64,
}
