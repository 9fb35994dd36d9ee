//! Policy-free `malloc` family.
//!
//! These symbols forward straight to glibc's internal allocator entry points,
//! so a program linked against this library keeps its ordinary heap and opts
//! into resilience per allocation through `er_*`. Blocks from here carry no
//! metadata and are unknown to `er_free`.

use std::ffi::c_void;

unsafe extern "C" {
    #[link_name = "__libc_malloc"]
    fn libc_malloc(size: usize) -> *mut c_void;
    #[link_name = "__libc_calloc"]
    fn libc_calloc(nmemb: usize, size: usize) -> *mut c_void;
    #[link_name = "__libc_realloc"]
    fn libc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
    #[link_name = "__libc_free"]
    fn libc_free(ptr: *mut c_void);
}

/// # Safety
///
/// Caller must eventually `free` the returned pointer exactly once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    // SAFETY: plain forwarding.
    unsafe { libc_malloc(size) }
}

/// # Safety
///
/// `ptr` must be null or come from this family and not be freed already.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    // SAFETY: plain forwarding.
    unsafe { libc_free(ptr) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    // SAFETY: plain forwarding; the callee checks the product.
    unsafe { libc_calloc(nmemb, size) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: plain forwarding.
    unsafe { libc_realloc(ptr, size) }
}

/// `realloc` of `nmemb * size` bytes, failing with `ENOMEM` on overflow.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reallocarray(ptr: *mut c_void, nmemb: usize, size: usize) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        // SAFETY: __errno_location returns the calling thread's errno slot.
        unsafe { *libc::__errno_location() = libc::ENOMEM };
        return std::ptr::null_mut();
    };
    // SAFETY: plain forwarding.
    unsafe { libc_realloc(ptr, total) }
}

