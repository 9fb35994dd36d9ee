//! Allocation facade.
//!
//! [`ResilientHeap`] owns the metadata store, the engine configuration and a
//! raw allocator. Handles are the addresses of the physical storage, so a
//! C caller can write its plain data straight into a fresh allocation before
//! calling `setup_policies`.
//!
//! Every operation appends a lifecycle record and bumps the heap metrics.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::EngineConfig;
use crate::engine::{self, Correction};
use crate::error::EngineError;
use crate::log::{LifecycleLog, LogEvent, LogLevel};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::policy::{Policy, PolicyChain};
use crate::raw::{RawAllocator, SystemAllocator};
use crate::registry::{AllocationRecord, MetadataStore};

/// Fault-tolerant heap over a raw allocator.
pub struct ResilientHeap<A: RawAllocator = SystemAllocator> {
    raw: A,
    store: MetadataStore,
    config: EngineConfig,
    metrics: EngineMetrics,
    log: LifecycleLog,
    next_nonce: AtomicU64,
}

impl ResilientHeap<SystemAllocator> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_allocator(SystemAllocator, config)
    }
}

impl Default for ResilientHeap<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

/// Physical bytes of a live record.
///
/// # Safety
///
/// `record` must describe a block owned by this heap, and the caller must
/// hold its shard lock (or have detached it) for the lifetime of the slice.
unsafe fn region_of<'a>(record: &AllocationRecord) -> &'a mut [u8] {
    // SAFETY: upheld by the caller; the block is valid for `physical_size`
    // bytes and zero-initialized at allocation.
    unsafe { std::slice::from_raw_parts_mut(record.handle as *mut u8, record.physical_size) }
}

fn block_of(handle: usize) -> Result<NonNull<u8>, EngineError> {
    NonNull::new(handle as *mut u8).ok_or(EngineError::NotFound { handle })
}

impl<A: RawAllocator> ResilientHeap<A> {
    pub fn with_allocator(raw: A, config: EngineConfig) -> Self {
        let log = LifecycleLog::new(config.log_level, config.log_capacity);
        Self {
            raw,
            store: MetadataStore::new(),
            config,
            metrics: EngineMetrics::new(),
            log,
            next_nonce: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn log(&self) -> &LifecycleLog {
        &self.log
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.store.len()
    }

    // ------------------------------------------------------------------
    // Allocation lifecycle
    // ------------------------------------------------------------------

    /// Allocate `size` logical bytes guarded by `policies`. The storage starts
    /// zeroed and in plain form; write the data, then call
    /// [`ResilientHeap::setup_policies`].
    pub fn malloc(&self, size: usize, policies: &[Policy]) -> Result<usize, EngineError> {
        self.allocate("er_malloc", size, policies)
    }

    pub fn calloc(
        &self,
        nmemb: usize,
        size: usize,
        policies: &[Policy],
    ) -> Result<usize, EngineError> {
        match nmemb.checked_mul(size) {
            Some(total) => self.allocate("er_calloc", total, policies),
            None => self.fail("er_calloc", "alloc", None, EngineError::SizeOverflow),
        }
    }

    /// Resize an allocation and move it to `policies`.
    ///
    /// `None` allocates; a zero `size` frees and returns `None`. Policy-bearing
    /// data is decoded under the old chain first, so a region that cannot be
    /// recovered fails with [`EngineError::Uncorrectable`] and is left as is.
    pub fn realloc(
        &self,
        handle: Option<usize>,
        size: usize,
        policies: &[Policy],
    ) -> Result<Option<usize>, EngineError> {
        match handle {
            None => self.allocate("er_realloc", size, policies).map(Some),
            Some(handle) if size == 0 => self.release("er_realloc", handle).map(|()| None),
            Some(handle) => self
                .reshape("er_realloc", handle, Some(size), policies)
                .map(Some),
        }
    }

    pub fn reallocarray(
        &self,
        handle: Option<usize>,
        nmemb: usize,
        size: usize,
        policies: &[Policy],
    ) -> Result<Option<usize>, EngineError> {
        let Some(total) = nmemb.checked_mul(size) else {
            return self.fail("er_reallocarray", "realloc", handle, EngineError::SizeOverflow);
        };
        match handle {
            None => self.allocate("er_reallocarray", total, policies).map(Some),
            Some(handle) if total == 0 => self.release("er_reallocarray", handle).map(|()| None),
            Some(handle) => self
                .reshape("er_reallocarray", handle, Some(total), policies)
                .map(Some),
        }
    }

    pub fn free(&self, handle: usize) -> Result<(), EngineError> {
        self.release("er_free", handle)
    }

    /// Re-encode an allocation under a new chain, keeping its contents.
    /// Returns the handle, which moves when the physical size changes.
    pub fn change_policies(&self, handle: usize, policies: &[Policy]) -> Result<usize, EngineError> {
        self.reshape("er_change_policies", handle, None, policies)
    }

    // ------------------------------------------------------------------
    // Engine operations
    // ------------------------------------------------------------------

    /// Encode the plain bytes written so far and activate the policies.
    pub fn setup_policies(&self, handle: usize) -> Result<(), EngineError> {
        let result = self.with_region(handle, |record, region| {
            engine::setup(record, region, &self.config)?;
            Ok(*record)
        });
        match result {
            Ok(record) => {
                EngineMetrics::inc(&self.metrics.setups);
                self.emit(
                    LogEvent::new(LogLevel::Debug, "er_setup_policies", "setup")
                        .handle(handle)
                        .sizes(record.logical_size, record.physical_size)
                        .details(format!("chain={}", record.chain.describe())),
                );
                Ok(())
            }
            Err(err) => self.fail("er_setup_policies", "setup", Some(handle), err),
        }
    }

    /// Repair the whole region.
    pub fn correct_buffer(&self, handle: usize) -> Result<Correction, EngineError> {
        EngineMetrics::inc(&self.metrics.corrections);
        let result = self.with_region(handle, |record, region| {
            engine::correct(record, region, &self.config).map(|c| (c, *record))
        });
        self.finish("er_correct_buffer", "correct", handle, result)
    }

    /// Read `dest.len()` logical bytes at `offset`, repairing what they touch.
    pub fn read_buf(
        &self,
        handle: usize,
        dest: &mut [u8],
        offset: usize,
    ) -> Result<Correction, EngineError> {
        EngineMetrics::inc(&self.metrics.reads);
        let result = self.with_region(handle, |record, region| {
            engine::read(record, region, &self.config, dest, offset).map(|c| (c, *record))
        });
        self.finish("er_read_buf", "read", handle, result)
    }

    /// Write `src` at logical `offset`. The status reflects damage found in
    /// the touched granules before they were overwritten.
    pub fn write_buf(
        &self,
        handle: usize,
        src: &[u8],
        offset: usize,
    ) -> Result<Correction, EngineError> {
        EngineMetrics::inc(&self.metrics.writes);
        let result = self.with_region(handle, |record, region| {
            engine::write(record, region, &self.config, src, offset).map(|c| (c, *record))
        });
        self.finish("er_write_buf", "write", handle, result)
    }

    /// True when some granule would need repair, or cannot be repaired.
    /// Nothing is written back.
    pub fn is_corrupted(&self, handle: usize) -> Result<bool, EngineError> {
        let result = self.with_region(handle, |record, region| {
            engine::inspect(record, region, &self.config)
        });
        match result {
            Ok(status) => {
                self.emit(
                    LogEvent::new(LogLevel::Trace, "er_is_corrupted", "inspect")
                        .handle(handle)
                        .outcome(if status.is_clean() { "clean" } else { "corrupted" }),
                );
                Ok(!status.is_clean())
            }
            Err(err) => self.fail("er_is_corrupted", "inspect", Some(handle), err),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn record(&self, handle: usize) -> Result<AllocationRecord, EngineError> {
        self.store.lookup(handle)
    }

    /// Copy of the raw physical representation.
    pub fn physical_bytes(&self, handle: usize) -> Result<Vec<u8>, EngineError> {
        self.with_region(handle, |_, region| Ok(region.to_vec()))
    }

    /// Store bytes directly into the physical representation, bypassing the
    /// codecs. Before setup this is how plain data gets in; afterwards it
    /// simulates memory upsets.
    pub fn write_physical(&self, handle: usize, offset: usize, bytes: &[u8]) -> Result<(), EngineError> {
        self.with_region(handle, |record, region| {
            let end = offset
                .checked_add(bytes.len())
                .filter(|&end| end <= region.len())
                .ok_or(EngineError::OutOfBounds {
                    offset,
                    len: bytes.len(),
                    logical_size: record.physical_size,
                })?;
            region[offset..end].copy_from_slice(bytes);
            Ok(())
        })
    }

    /// Flip one bit of the physical representation.
    pub fn flip_bit(&self, handle: usize, bit: usize) -> Result<(), EngineError> {
        self.with_region(handle, |record, region| {
            let byte = region.get_mut(bit / 8).ok_or(EngineError::OutOfBounds {
                offset: bit / 8,
                len: 1,
                logical_size: record.physical_size,
            })?;
            *byte ^= 1 << (bit % 8);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn with_region<R>(
        &self,
        handle: usize,
        f: impl FnOnce(&mut AllocationRecord, &mut [u8]) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        self.store
            .with_record(handle, |record| {
                // SAFETY: the record is registered, so its block is live, and
                // the shard lock is held until the closure returns.
                let region = unsafe { region_of(record) };
                f(record, region)
            })
            .and_then(std::convert::identity)
    }

    fn allocate(
        &self,
        symbol: &'static str,
        size: usize,
        policies: &[Policy],
    ) -> Result<usize, EngineError> {
        match self.try_allocate(size, policies) {
            Ok(record) => {
                EngineMetrics::inc(&self.metrics.allocations);
                self.emit(
                    LogEvent::new(LogLevel::Debug, symbol, "alloc")
                        .handle(record.handle)
                        .sizes(record.logical_size, record.physical_size)
                        .details(format!(
                            "chain={};nonce={}",
                            record.chain.describe(),
                            record.nonce
                        )),
                );
                Ok(record.handle)
            }
            Err(err) => self.fail(symbol, "alloc", None, err),
        }
    }

    fn try_allocate(&self, size: usize, policies: &[Policy]) -> Result<AllocationRecord, EngineError> {
        let chain = PolicyChain::normalize(policies)?;
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let mut record = AllocationRecord::new(0, size, chain, nonce, &self.config.key)?;
        // Zeroed so the codecs never observe uninitialized bytes.
        let block = self.raw.alloc_zeroed(record.physical_size)?;
        record.handle = block.as_ptr() as usize;
        self.store.register(record);
        Ok(record)
    }

    fn release(&self, symbol: &'static str, handle: usize) -> Result<(), EngineError> {
        let record = match self.store.unregister(handle) {
            Ok(record) => record,
            Err(err) => return self.fail(symbol, "free", Some(handle), err),
        };
        // SAFETY: the block was allocated by `self.raw` with this size and is
        // no longer reachable through the store.
        unsafe { self.raw.free(block_of(handle)?, record.physical_size) };
        EngineMetrics::inc(&self.metrics.frees);
        self.emit(
            LogEvent::new(LogLevel::Debug, symbol, "free")
                .handle(handle)
                .sizes(record.logical_size, record.physical_size),
        );
        Ok(())
    }

    fn reshape(
        &self,
        symbol: &'static str,
        handle: usize,
        new_size: Option<usize>,
        policies: &[Policy],
    ) -> Result<usize, EngineError> {
        let event = if new_size.is_some() { "realloc" } else { "change_policies" };
        match self.try_reshape(handle, new_size, policies) {
            Ok((old, next)) => {
                if new_size.is_some() {
                    EngineMetrics::inc(&self.metrics.reallocs);
                } else {
                    EngineMetrics::inc(&self.metrics.policy_changes);
                }
                self.emit(
                    LogEvent::new(LogLevel::Debug, symbol, event)
                        .handle(next.handle)
                        .sizes(next.logical_size, next.physical_size)
                        .details(format!(
                            "from={:#x};chain={}->{};moved={}",
                            old.handle,
                            old.chain.describe(),
                            next.chain.describe(),
                            old.handle != next.handle
                        )),
                );
                Ok(next.handle)
            }
            Err(err) => self.fail(symbol, event, Some(handle), err),
        }
    }

    fn try_reshape(
        &self,
        handle: usize,
        new_size: Option<usize>,
        policies: &[Policy],
    ) -> Result<(AllocationRecord, AllocationRecord), EngineError> {
        let chain = PolicyChain::normalize(policies)?;
        let (old, mut logical) = self.with_region(handle, |record, region| {
            Ok((*record, engine::decode_all(record, region, &self.config)?))
        })?;
        let size = new_size.unwrap_or(old.logical_size);
        logical.resize(size, 0);

        let mut next = AllocationRecord::new(handle, size, chain, old.nonce, &self.config.key)?;
        // An empty chain needs no setup, so its data is already live and
        // must be encoded under the new chain.
        next.active = old.active || (old.chain.is_empty() && !next.chain.is_empty());

        // SAFETY: the block came from `self.raw` with `old.physical_size`
        // bytes; callers serialize operations on one handle.
        let block =
            unsafe { self.raw.realloc(block_of(handle)?, old.physical_size, next.physical_size)? };
        next.handle = block.as_ptr() as usize;

        // SAFETY: `block` is valid for `next.physical_size` bytes and not yet
        // visible through the store.
        let region = unsafe { region_of(&next) };
        region.fill(0);
        engine::encode_all(&next, region, &self.config, &logical)?;
        self.store.relocate(handle, next)?;
        Ok((old, next))
    }

    fn finish(
        &self,
        symbol: &'static str,
        event: &'static str,
        handle: usize,
        result: Result<(Correction, AllocationRecord), EngineError>,
    ) -> Result<Correction, EngineError> {
        let (status, record) = match result {
            Ok(done) => done,
            Err(err) => return self.fail(symbol, event, Some(handle), err),
        };
        EngineMetrics::add(&self.metrics.corrected_errors, status.corrected as u64);
        let (level, outcome) = if status.uncorrectable > 0 {
            EngineMetrics::inc(&self.metrics.uncorrectable_events);
            (LogLevel::Error, "uncorrectable")
        } else if status.corrected > 0 {
            (LogLevel::Warn, "corrected")
        } else {
            (LogLevel::Trace, "clean")
        };
        self.emit(
            LogEvent::new(level, symbol, event)
                .handle(handle)
                .sizes(record.logical_size, record.physical_size)
                .outcome(outcome)
                .details(format!(
                    "corrected={};uncorrectable={}",
                    status.corrected, status.uncorrectable
                )),
        );
        Ok(status)
    }

    fn fail<T>(
        &self,
        symbol: &'static str,
        event: &'static str,
        handle: Option<usize>,
        err: EngineError,
    ) -> Result<T, EngineError> {
        if matches!(err, EngineError::OutOfMemory { .. }) {
            EngineMetrics::inc(&self.metrics.out_of_memory);
        }
        if matches!(err, EngineError::Uncorrectable { .. }) {
            EngineMetrics::inc(&self.metrics.uncorrectable_events);
        }
        let mut entry = LogEvent::new(LogLevel::Warn, symbol, event)
            .outcome(err.label())
            .details(err.to_string());
        entry.handle = handle;
        self.emit(entry);
        Err(err)
    }

    fn emit(&self, event: LogEvent) {
        self.log.emit(event);
    }
}

impl<A: RawAllocator> Drop for ResilientHeap<A> {
    fn drop(&mut self) {
        for record in self.store.drain() {
            if let Ok(block) = block_of(record.handle) {
                // SAFETY: every registered block came from `self.raw` and the
                // store no longer refers to it.
                unsafe { self.raw.free(block, record.physical_size) };
            }
        }
    }
}
