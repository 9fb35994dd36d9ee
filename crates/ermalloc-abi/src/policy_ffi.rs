//! Decoding of the C `er_policy_list` descriptor.
//!
//! The list is read once, at the call that receives it, and copied into a
//! [`PolicyChain`]; no pointer into it is kept afterwards.

use std::ffi::c_void;

use ermalloc_membrane::{ChainError, MAX_POLICIES, Policy, PolicyChain, PolicyKind};

pub const ER_POLICY_NIL: u32 = 0;
pub const ER_POLICY_REDUNDANCY: u32 = 1;
pub const ER_POLICY_REED_SOLOMON: u32 = 2;
pub const ER_POLICY_ENCRYPTION: u32 = 3;

/// Upper bound on list nodes visited, `Nil` entries included. Guards against
/// cyclic lists.
pub const MAX_LIST_NODES: usize = 64;

/// `struct er_policy_list`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ErPolicyList {
    pub policy: u32,
    /// Points at a `uint32_t` parameter for Redundancy and ReedSolomon.
    pub policy_data: *const c_void,
    pub next_policy: *const ErPolicyList,
}

impl ErPolicyList {
    /// A node with no successor.
    #[must_use]
    pub const fn new(policy: u32, policy_data: *const c_void) -> Self {
        Self {
            policy,
            policy_data,
            next_policy: std::ptr::null(),
        }
    }
}

unsafe fn parameter(node: &ErPolicyList, kind: PolicyKind) -> Result<u32, ChainError> {
    if node.policy_data.is_null() {
        return Err(ChainError::InvalidParameter { kind, value: 0 });
    }
    // SAFETY: caller guarantees non-null `policy_data` points at a u32.
    Ok(unsafe { node.policy_data.cast::<u32>().read_unaligned() })
}

/// Walk a C policy list into a normalized chain. A null list is the empty
/// chain.
///
/// # Safety
///
/// `head` must be null or point at a well-formed list whose nodes and
/// parameters stay valid for the duration of the call.
pub unsafe fn chain_from_list(head: *const ErPolicyList) -> Result<PolicyChain, ChainError> {
    let mut policies: Vec<Policy> = Vec::with_capacity(MAX_POLICIES);
    let mut cursor = head;
    let mut visited = 0usize;
    while !cursor.is_null() {
        visited += 1;
        if visited > MAX_LIST_NODES {
            return Err(ChainError::TooManyPolicies {
                count: visited,
                max: MAX_POLICIES,
            });
        }
        // SAFETY: non-null node of a caller-provided list.
        let node = unsafe { &*cursor };
        let policy = match node.policy {
            ER_POLICY_NIL => None,
            // SAFETY: the list contract covers `policy_data`.
            ER_POLICY_REDUNDANCY => Some(Policy::Redundancy(unsafe {
                parameter(node, PolicyKind::Redundancy)?
            })),
            // SAFETY: as above.
            ER_POLICY_REED_SOLOMON => Some(Policy::ReedSolomon(unsafe {
                parameter(node, PolicyKind::ReedSolomon)?
            })),
            ER_POLICY_ENCRYPTION => Some(Policy::Encryption),
            other => return Err(ChainError::UnknownKind(other)),
        };
        if let Some(policy) = policy {
            if policies.len() == MAX_POLICIES {
                return Err(ChainError::TooManyPolicies {
                    count: MAX_POLICIES + 1,
                    max: MAX_POLICIES,
                });
            }
            policies.push(policy);
        }
        cursor = node.next_policy;
    }
    PolicyChain::normalize(&policies)
}
