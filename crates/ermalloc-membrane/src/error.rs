//! Error taxonomy for the policy membrane.

use thiserror::Error;

use crate::policy::PolicyKind;

/// Reasons a user-supplied policy list is rejected by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("policy kind {0:?} appears more than once")]
    DuplicateKind(PolicyKind),
    #[error("{count} policies supplied, at most {max} are allowed")]
    TooManyPolicies { count: usize, max: usize },
    #[error("unrecognized policy kind tag {0}")]
    UnknownKind(u32),
    #[error("parameter {value} is not valid for {kind:?}")]
    InvalidParameter { kind: PolicyKind, value: u32 },
}

/// Lifecycle violations on a policy-bearing allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyStateError {
    /// `setup` was called on an allocation whose policies are already active.
    #[error("policies are already active for this allocation")]
    AlreadyActive,
    /// Correction, read or write was attempted before `setup`.
    #[error("policies have not been set up for this allocation")]
    NotActive,
}

/// Errors surfaced by the membrane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("raw allocator could not supply {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("invalid policy chain: {0}")]
    InvalidPolicyChain(#[from] ChainError),
    #[error("policy state error: {0}")]
    PolicyState(#[from] PolicyStateError),
    #[error("{granules} granule(s) exceed the active policies' correction budget")]
    Uncorrectable { granules: usize },
    #[error("handle {handle:#x} is not a live allocation")]
    NotFound { handle: usize },
    #[error("window at offset {offset} of length {len} exceeds logical size {logical_size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        logical_size: usize,
    },
    #[error("requested size overflows the address space")]
    SizeOverflow,
}

impl EngineError {
    /// Short machine-readable label used as the `outcome` of lifecycle records.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "oom",
            Self::InvalidPolicyChain(_) => "invalid_policy_chain",
            Self::PolicyState(_) => "policy_state",
            Self::Uncorrectable { .. } => "uncorrectable",
            Self::NotFound { .. } => "not_found",
            Self::OutOfBounds { .. } => "out_of_bounds",
            Self::SizeOverflow => "size_overflow",
        }
    }
}
