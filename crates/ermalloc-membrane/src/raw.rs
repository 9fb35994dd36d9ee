//! Raw storage supplier.
//!
//! The heap never manages free lists itself; it asks a [`RawAllocator`] for
//! physical storage and hands it back on free.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::error::EngineError;

/// Alignment of every block handed out by [`SystemAllocator`].
pub const RAW_ALIGN: usize = 16;

/// Source of physical storage.
///
/// # Safety
///
/// Implementations must return blocks valid for reads and writes of `size`
/// bytes, aligned to at least [`RAW_ALIGN`], and distinct from every other
/// live block.
pub unsafe trait RawAllocator: Send + Sync {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, EngineError>;

    fn alloc_zeroed(&self, size: usize) -> Result<NonNull<u8>, EngineError> {
        let ptr = self.alloc(size)?;
        // SAFETY: `alloc` returned a block valid for `size` bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Ok(ptr)
    }

    /// # Safety
    ///
    /// `ptr` must come from this allocator with the same `size`, and must not
    /// be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);

    /// Resize a block, preserving `min(old_size, new_size)` leading bytes. On
    /// failure the old block is untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator with size `old_size`.
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, EngineError>;
}

/// `std::alloc` with 16-byte alignment. Zero-sized requests get one byte so
/// that every allocation has a unique address.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

fn block_layout(size: usize) -> Result<Layout, EngineError> {
    Layout::from_size_align(size.max(1), RAW_ALIGN).map_err(|_| EngineError::SizeOverflow)
}

// SAFETY: every block comes from `std::alloc` with a non-zero size and
// RAW_ALIGN alignment.
unsafe impl RawAllocator for SystemAllocator {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, EngineError> {
        let layout = block_layout(size)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(EngineError::OutOfMemory { requested: size })
    }

    fn alloc_zeroed(&self, size: usize) -> Result<NonNull<u8>, EngineError> {
        let layout = block_layout(size)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or(EngineError::OutOfMemory { requested: size })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Ok(layout) = block_layout(size) {
            // SAFETY: caller guarantees `ptr` was allocated here with `size`.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, EngineError> {
        let old = block_layout(old_size)?;
        block_layout(new_size)?;
        // SAFETY: caller guarantees `ptr`/`old`; the new size is non-zero and
        // was validated against the alignment above.
        let moved = unsafe { std::alloc::realloc(ptr.as_ptr(), old, new_size.max(1)) };
        NonNull::new(moved).ok_or(EngineError::OutOfMemory {
            requested: new_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_aligned_and_distinct() {
        let a = SystemAllocator.alloc(0).unwrap();
        let b = SystemAllocator.alloc(0).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_ptr() as usize % RAW_ALIGN, 0);
        unsafe {
            SystemAllocator.free(a, 0);
            SystemAllocator.free(b, 0);
        }
    }

    #[test]
    fn zeroed_blocks_are_zero() {
        let p = SystemAllocator.alloc_zeroed(64).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { SystemAllocator.free(p, 64) };
    }

    #[test]
    fn realloc_preserves_prefix() {
        let p = SystemAllocator.alloc(8).unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping([1u8, 2, 3, 4, 5, 6, 7, 8].as_ptr(), p.as_ptr(), 8);
            let q = SystemAllocator.realloc(p, 8, 4096).unwrap();
            let bytes = std::slice::from_raw_parts(q.as_ptr(), 8);
            assert_eq!(bytes, &[1, 2, 3, 4, 5, 6, 7, 8]);
            SystemAllocator.free(q, 4096);
        }
    }

    #[test]
    fn impossible_sizes_fail_cleanly() {
        assert_eq!(
            SystemAllocator.alloc(usize::MAX),
            Err(EngineError::SizeOverflow)
        );
    }
}
