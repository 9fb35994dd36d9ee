//! Allocation metadata store.
//!
//! Records live out of band, keyed by the address of the physical storage,
//! in a table sharded behind `parking_lot::Mutex`es. Engine operations on one
//! handle run inside [`MetadataStore::with_record`], so they are serialized by
//! that handle's shard lock while unrelated handles proceed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::codec::CipherKey;
use crate::error::EngineError;
use crate::layout::Layout;
use crate::policy::PolicyChain;

/// Number of shards for store locks (power of 2).
const NUM_SHARDS: usize = 16;

/// Metadata for one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Address of the physical storage; also the caller-visible handle.
    pub handle: usize,
    pub logical_size: usize,
    pub physical_size: usize,
    pub chain: PolicyChain,
    /// Keystream nonce, fixed for the lifetime of the allocation.
    pub nonce: u64,
    /// Set once `setup` has encoded the region.
    pub active: bool,
}

impl AllocationRecord {
    /// Build a fresh, inactive record; derives the physical size from the chain.
    pub fn new(
        handle: usize,
        logical_size: usize,
        chain: PolicyChain,
        nonce: u64,
        key: &CipherKey,
    ) -> Result<Self, EngineError> {
        let layout = Layout::new(logical_size, &chain, key, nonce)?;
        Ok(Self {
            handle,
            logical_size,
            physical_size: layout.physical_size(),
            chain,
            nonce,
            active: false,
        })
    }

    /// True when the region still holds plain bytes that policies would guard.
    #[must_use]
    pub fn needs_setup(&self) -> bool {
        !self.chain.is_empty() && !self.active
    }

    /// True when accesses must go through the codecs.
    #[must_use]
    pub fn is_encoded(&self) -> bool {
        !self.chain.is_empty() && self.active
    }

    pub fn layout(&self, key: &CipherKey) -> Result<Layout, EngineError> {
        Layout::new(self.logical_size, &self.chain, key, self.nonce)
    }
}

/// Sharded handle -> record table.
pub struct MetadataStore {
    shards: Box<[Mutex<HashMap<usize, AllocationRecord>>]>,
    live: AtomicUsize,
}

impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        let shards: Vec<Mutex<HashMap<usize, AllocationRecord>>> = (0..NUM_SHARDS)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards: shards.into_boxed_slice(),
            live: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, addr: usize) -> usize {
        // Heap blocks are at least 16-byte aligned; skip the always-zero bits.
        (addr >> 4) % NUM_SHARDS
    }

    /// Insert a record, returning whatever was registered at that handle.
    pub fn register(&self, record: AllocationRecord) -> Option<AllocationRecord> {
        let previous = self.shards[self.shard_for(record.handle)]
            .lock()
            .insert(record.handle, record);
        if previous.is_none() {
            self.live.fetch_add(1, Ordering::Relaxed);
        }
        previous
    }

    pub fn lookup(&self, handle: usize) -> Result<AllocationRecord, EngineError> {
        self.shards[self.shard_for(handle)]
            .lock()
            .get(&handle)
            .copied()
            .ok_or(EngineError::NotFound { handle })
    }

    #[must_use]
    pub fn contains(&self, handle: usize) -> bool {
        self.shards[self.shard_for(handle)].lock().contains_key(&handle)
    }

    /// Overwrite the record registered at `record.handle`.
    pub fn update(&self, record: AllocationRecord) -> Result<(), EngineError> {
        let mut shard = self.shards[self.shard_for(record.handle)].lock();
        let slot = shard.get_mut(&record.handle).ok_or(EngineError::NotFound {
            handle: record.handle,
        })?;
        *slot = record;
        Ok(())
    }

    pub fn unregister(&self, handle: usize) -> Result<AllocationRecord, EngineError> {
        let removed = self.shards[self.shard_for(handle)]
            .lock()
            .remove(&handle)
            .ok_or(EngineError::NotFound { handle })?;
        self.live.fetch_sub(1, Ordering::Relaxed);
        Ok(removed)
    }

    /// Replace the record at `old_handle` with `record`, which may live at a
    /// new address after its storage moved.
    pub fn relocate(&self, old_handle: usize, record: AllocationRecord) -> Result<(), EngineError> {
        if old_handle == record.handle {
            return self.update(record);
        }
        self.unregister(old_handle)?;
        self.register(record);
        Ok(())
    }

    /// Run `f` on the record while holding its shard lock.
    pub fn with_record<R>(
        &self,
        handle: usize,
        f: impl FnOnce(&mut AllocationRecord) -> R,
    ) -> Result<R, EngineError> {
        let mut shard = self.shards[self.shard_for(handle)].lock();
        let record = shard
            .get_mut(&handle)
            .ok_or(EngineError::NotFound { handle })?;
        Ok(f(record))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every record.
    pub fn drain(&self) -> Vec<AllocationRecord> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            self.live.fetch_sub(shard.len(), Ordering::Relaxed);
            out.extend(shard.drain().map(|(_, record)| record));
        }
        out
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use std::sync::Arc;

    fn record(handle: usize, size: usize) -> AllocationRecord {
        let chain = PolicyChain::normalize(&[Policy::Redundancy(3)]).unwrap();
        AllocationRecord::new(handle, size, chain, 0, &CipherKey::from_material(b"r")).unwrap()
    }

    #[test]
    fn physical_size_follows_the_chain() {
        let r = record(0x1000, 4);
        assert_eq!(r.physical_size, 12);
        assert!(r.needs_setup());
        assert!(!r.is_encoded());
        let plain = AllocationRecord::new(
            0x2000,
            4,
            PolicyChain::empty(),
            0,
            &CipherKey::from_material(b"r"),
        )
        .unwrap();
        assert_eq!(plain.physical_size, 4);
        assert!(!plain.needs_setup());
    }

    #[test]
    fn register_lookup_unregister() {
        let store = MetadataStore::new();
        assert!(store.register(record(0x1000, 4)).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(0x1000).unwrap().logical_size, 4);
        assert_eq!(
            store.lookup(0x2000),
            Err(EngineError::NotFound { handle: 0x2000 })
        );
        assert!(store.register(record(0x1000, 8)).is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.unregister(0x1000).unwrap().logical_size, 8);
        assert!(store.is_empty());
        assert!(store.unregister(0x1000).is_err());
    }

    #[test]
    fn update_and_with_record_mutate_in_place() {
        let store = MetadataStore::new();
        store.register(record(0x40, 4));
        let mut r = store.lookup(0x40).unwrap();
        r.active = true;
        store.update(r).unwrap();
        assert!(store.lookup(0x40).unwrap().active);
        let size = store
            .with_record(0x40, |r| {
                r.logical_size = 5;
                r.logical_size
            })
            .unwrap();
        assert_eq!(size, 5);
        assert_eq!(store.lookup(0x40).unwrap().logical_size, 5);
        assert!(store.update(record(0x80, 1)).is_err());
    }

    #[test]
    fn relocate_moves_the_key() {
        let store = MetadataStore::new();
        store.register(record(0x100, 4));
        let mut moved = store.lookup(0x100).unwrap();
        moved.handle = 0x9990;
        store.relocate(0x100, moved).unwrap();
        assert!(!store.contains(0x100));
        assert_eq!(store.lookup(0x9990).unwrap().handle, 0x9990);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn drain_empties_every_shard() {
        let store = MetadataStore::new();
        for i in 0..100 {
            store.register(record(0x1000 + i * 16, i));
        }
        assert_eq!(store.len(), 100);
        let drained = store.drain();
        assert_eq!(drained.len(), 100);
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_registration_across_shards() {
        let store = Arc::new(MetadataStore::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let handle = 0x10_0000 + (t * 250 + i) * 16;
                        store.register(record(handle, 1));
                        store
                            .with_record(handle, |r| r.active = true)
                            .unwrap();
                        if i % 2 == 0 {
                            store.unregister(handle).unwrap();
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(store.len(), 8 * 125);
        assert!(store.drain().iter().all(|r| r.active));
    }
}
