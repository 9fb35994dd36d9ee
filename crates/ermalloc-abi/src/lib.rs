// Every extern "C" export takes raw pointers from C callers and checks them
// against the heap's metadata store before touching memory.
#![allow(clippy::missing_safety_doc)]
//! # ermalloc-abi
//!
//! extern "C" boundary for ermalloc.
//!
//! This crate produces a `cdylib` exposing the `er_*` allocation entry points
//! declared in `include/ermalloc.h`, plus pass-through `malloc`-family
//! symbols that carry no policies.
//!
//! ```text
//! C caller -> er_* entry (this crate) -> policy list decode -> ResilientHeap -> status / errno
//! ```
//!
//! Failures surface the POSIX way: a null pointer or `-1`, with `errno` set to
//! `ENOMEM`, `EINVAL` or `EIO` (data that could not be recovered).

mod heap_state;

pub mod er_abi;
pub mod policy_ffi;

// The pass-through symbols would replace the system allocator inside this
// crate's own unit-test binary.
#[cfg(not(test))]
pub mod malloc_abi;

pub use heap_state::global_heap;
