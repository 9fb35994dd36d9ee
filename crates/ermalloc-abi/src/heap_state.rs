//! Process-wide heap behind the `er_*` symbols.
//!
//! Created on first use from the `ERMALLOC_*` environment. The heap's own
//! metadata lives in ordinary Rust collections, which allocate through the
//! pass-through `malloc`, so initialization never re-enters an `er_*` call.

use std::sync::OnceLock;

use ermalloc_membrane::{EngineConfig, ResilientHeap};

/// The shared heap used by every ABI entry point.
pub fn global_heap() -> &'static ResilientHeap {
    static HEAP: OnceLock<ResilientHeap> = OnceLock::new();
    HEAP.get_or_init(|| ResilientHeap::with_config(EngineConfig::from_env()))
}
