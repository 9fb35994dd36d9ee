//! `er_*` entry points.
//!
//! Pointers handed out here are the physical storage of the allocation: a C
//! caller writes plain data through them, calls `er_setup_policies`, and from
//! then on goes through `er_read_buf` / `er_write_buf`.
//!
//! Status-returning calls yield `0` when clean, the number of repaired units
//! when positive, and minus the number of lost granules when negative. Lost
//! data also sets `errno` to `EIO`, which is how a caller tells a `-1` status
//! apart from a rejected call (`EINVAL` / `ENOMEM`).

use std::ffi::{c_int, c_void};

use ermalloc_membrane::{Correction, EngineError, Policy};

use crate::global_heap;
use crate::policy_ffi::{ErPolicyList, chain_from_list};

#[inline]
unsafe fn set_abi_errno(val: c_int) {
    // SAFETY: __errno_location returns the calling thread's errno slot.
    unsafe { *libc::__errno_location() = val };
}

fn errno_for(err: &EngineError) -> c_int {
    match err {
        EngineError::OutOfMemory { .. } | EngineError::SizeOverflow => libc::ENOMEM,
        EngineError::Uncorrectable { .. } => libc::EIO,
        EngineError::InvalidPolicyChain(_)
        | EngineError::PolicyState(_)
        | EngineError::NotFound { .. }
        | EngineError::OutOfBounds { .. } => libc::EINVAL,
    }
}

fn reject(err: &EngineError) {
    // SAFETY: writes only this thread's errno.
    unsafe { set_abi_errno(errno_for(err)) };
}

fn to_ptr(handle: Option<usize>) -> *mut c_void {
    handle.map_or(std::ptr::null_mut(), |h| h as *mut c_void)
}

fn pointer_result(result: Result<Option<usize>, EngineError>) -> *mut c_void {
    match result {
        Ok(handle) => to_ptr(handle),
        Err(err) => {
            reject(&err);
            std::ptr::null_mut()
        }
    }
}

fn status_result(result: Result<Correction, EngineError>) -> c_int {
    match result {
        Ok(status) => {
            if status.uncorrectable > 0 {
                // SAFETY: writes only this thread's errno.
                unsafe { set_abi_errno(libc::EIO) };
            }
            status.status_code()
        }
        Err(err) => {
            reject(&err);
            -1
        }
    }
}

unsafe fn decode_chain(policies: *const ErPolicyList) -> Result<Vec<Policy>, EngineError> {
    // SAFETY: forwarded caller contract on `policies`.
    let chain = unsafe { chain_from_list(policies) }?;
    Ok(chain.iter().collect())
}

// ---------------------------------------------------------------------------
// allocation
// ---------------------------------------------------------------------------

/// Allocate `size` bytes guarded by `policies` (null for none). The memory is
/// zeroed; write the data, then call `er_setup_policies`.
///
/// Returns null for a zero size.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_malloc(size: usize, policies: *const ErPolicyList) -> *mut c_void {
    if size == 0 {
        return std::ptr::null_mut();
    }
    // SAFETY: caller provides a valid list or null.
    let result = unsafe { decode_chain(policies) }
        .and_then(|chain| global_heap().malloc(size, &chain))
        .map(Some);
    pointer_result(result)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_calloc(
    nmemb: usize,
    size: usize,
    policies: *const ErPolicyList,
) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        reject(&EngineError::SizeOverflow);
        return std::ptr::null_mut();
    };
    if total == 0 {
        return std::ptr::null_mut();
    }
    // SAFETY: caller provides a valid list or null.
    let result = unsafe { decode_chain(policies) }
        .and_then(|chain| global_heap().calloc(nmemb, size, &chain))
        .map(Some);
    pointer_result(result)
}

/// Resize `ptr` and move it under `policies`. Data guarded by the old
/// policies is recovered first; if it cannot be, null is returned with
/// `errno = EIO` and `ptr` stays valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_realloc(
    ptr: *mut c_void,
    size: usize,
    policies: *const ErPolicyList,
) -> *mut c_void {
    if ptr.is_null() {
        // SAFETY: forwarded.
        return unsafe { er_malloc(size, policies) };
    }
    // SAFETY: caller provides a valid list or null.
    let result = unsafe { decode_chain(policies) }
        .and_then(|chain| global_heap().realloc(Some(ptr as usize), size, &chain));
    pointer_result(result)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_reallocarray(
    ptr: *mut c_void,
    nmemb: usize,
    size: usize,
    policies: *const ErPolicyList,
) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        reject(&EngineError::SizeOverflow);
        return std::ptr::null_mut();
    };
    // SAFETY: forwarded.
    unsafe { er_realloc(ptr, total, policies) }
}

/// Release an allocation. Null is a no-op; an unknown pointer sets
/// `errno = EINVAL` and is otherwise ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    if let Err(err) = global_heap().free(ptr as usize) {
        reject(&err);
    }
}

/// Re-encode an allocation under new policies. Returns the (possibly moved)
/// pointer, or null with `errno` set and the allocation untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_change_policies(
    ptr: *mut c_void,
    policies: *const ErPolicyList,
) -> *mut c_void {
    // SAFETY: caller provides a valid list or null.
    let result = unsafe { decode_chain(policies) }
        .and_then(|chain| global_heap().change_policies(ptr as usize, &chain))
        .map(Some);
    pointer_result(result)
}

// ---------------------------------------------------------------------------
// policy engine
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_setup_policies(ptr: *const c_void) -> c_int {
    match global_heap().setup_policies(ptr as usize) {
        Ok(()) => 0,
        Err(err) => {
            reject(&err);
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_correct_buffer(ptr: *mut c_void) -> c_int {
    status_result(global_heap().correct_buffer(ptr as usize))
}

/// Copy `len` logical bytes at `offset` into `dest`, repairing the touched
/// granules on the way.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_read_buf(
    base: *mut c_void,
    dest: *mut c_void,
    offset: usize,
    len: usize,
) -> c_int {
    if len == 0 {
        return status_result(global_heap().read_buf(base as usize, &mut [], offset));
    }
    if dest.is_null() {
        // SAFETY: writes only this thread's errno.
        unsafe { set_abi_errno(libc::EINVAL) };
        return -1;
    }
    // SAFETY: caller guarantees `dest` is writable for `len` bytes and does
    // not overlap the allocation.
    let dest = unsafe { std::slice::from_raw_parts_mut(dest.cast::<u8>(), len) };
    status_result(global_heap().read_buf(base as usize, dest, offset))
}

/// Store `len` bytes from `src` at logical `offset` and re-encode them.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_write_buf(
    base: *mut c_void,
    src: *const c_void,
    offset: usize,
    len: usize,
) -> c_int {
    if len == 0 {
        return status_result(global_heap().write_buf(base as usize, &[], offset));
    }
    if src.is_null() {
        // SAFETY: writes only this thread's errno.
        unsafe { set_abi_errno(libc::EINVAL) };
        return -1;
    }
    // SAFETY: caller guarantees `src` is readable for `len` bytes and does
    // not overlap the allocation.
    let src = unsafe { std::slice::from_raw_parts(src.cast::<u8>(), len) };
    status_result(global_heap().write_buf(base as usize, src, offset))
}

/// `1` when some granule needs repair or is lost, `0` when clean, `-1` with
/// `errno` on error. Never writes to the allocation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn er_is_corrupted(ptr: *const c_void) -> c_int {
    match global_heap().is_corrupted(ptr as usize) {
        Ok(corrupted) => c_int::from(corrupted),
        Err(err) => {
            reject(&err);
            -1
        }
    }
}
