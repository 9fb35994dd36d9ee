//! Fault-tolerant policy membrane for ermalloc.
//!
//! This crate sits between an ordinary raw heap allocator and the caller. Each
//! allocation may carry a short chain of integrity policies; the membrane
//! expands the logical bytes into a larger physical representation, and later
//! detects and repairs bit flips in that representation on every access.
//!
//! # Architecture
//!
//! - **Galois field** (`gf`): GF(2^8) log/antilog arithmetic for Reed-Solomon
//! - **Policies** (`policy`): descriptors and the canonicalizing chain normalizer
//! - **Codecs** (`codec`): redundancy voting, Reed-Solomon, keystream encryption
//! - **Layout** (`layout`): composition of a chain into granules and physical spans
//! - **Registry** (`registry`): sharded allocation metadata store
//! - **Engine** (`engine`): setup / correct / read / write over physical windows
//! - **Heap** (`heap`): the allocation facade tying everything to a raw allocator
//! - **Configuration** (`config`), **metrics** (`metrics`), **lifecycle log** (`log`)
//!
//! # Physical layout
//!
//! Encoding runs innermost first: the keystream is applied to the logical
//! bytes, Reed-Solomon splits the ciphertext into 255-symbol chunks and
//! appends parity, and redundancy replicates every resulting byte `n` times
//! contiguously. Decoding runs the other way round.

#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod gf;
pub mod heap;
pub mod layout;
pub mod log;
pub mod metrics;
pub mod policy;
pub mod raw;
pub mod registry;

pub use codec::{Codec, Decoded, PolicyCodec};
pub use config::{EngineConfig, RepairMode};
pub use engine::Correction;
pub use error::{ChainError, EngineError, PolicyStateError};
pub use heap::ResilientHeap;
pub use layout::Layout;
pub use log::{LifecycleLog, LifecycleRecord, LogEvent, LogLevel};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use policy::{MAX_POLICIES, Policy, PolicyChain, PolicyKind};
pub use raw::{RawAllocator, SystemAllocator};
pub use registry::{AllocationRecord, MetadataStore};
