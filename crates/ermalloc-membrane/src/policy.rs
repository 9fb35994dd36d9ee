//! Policy descriptors and the chain normalizer.
//!
//! A caller hands over up to [`MAX_POLICIES`] descriptors in any order. The
//! normalizer validates them and produces a [`PolicyChain`] in the one order
//! the layout understands: Redundancy (outermost), then ReedSolomon, then
//! Encryption (innermost). Feeding a misordered chain to the codecs would
//! silently corrupt data, so every allocation path goes through
//! [`PolicyChain::normalize`].

use crate::codec::reed_solomon::CHUNK_SYMBOLS;
use crate::error::ChainError;

/// Maximum number of policies a single allocation may carry.
pub const MAX_POLICIES: usize = 3;

/// Largest accepted replication factor.
pub const MAX_REDUNDANCY_COPIES: u32 = 255;

/// Policy kinds, in canonical evaluation order (outermost first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyKind {
    Redundancy,
    ReedSolomon,
    Encryption,
}

impl PolicyKind {
    /// Position of this kind in the canonical chain.
    #[must_use]
    pub const fn rank(self) -> usize {
        match self {
            Self::Redundancy => 0,
            Self::ReedSolomon => 1,
            Self::Encryption => 2,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Redundancy => "redundancy",
            Self::ReedSolomon => "reed_solomon",
            Self::Encryption => "encryption",
        }
    }
}

/// A single policy descriptor, parameters held by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Total number of copies, including the original. Odd, at least 3.
    Redundancy(u32),
    /// Parity symbols per 255-symbol chunk; corrects `t / 2` symbol errors.
    ReedSolomon(u32),
    Encryption,
}

impl Policy {
    #[must_use]
    pub const fn kind(self) -> PolicyKind {
        match self {
            Self::Redundancy(_) => PolicyKind::Redundancy,
            Self::ReedSolomon(_) => PolicyKind::ReedSolomon,
            Self::Encryption => PolicyKind::Encryption,
        }
    }

    fn validate(self) -> Result<Self, ChainError> {
        match self {
            Self::Redundancy(n) if n < 3 || n % 2 == 0 || n > MAX_REDUNDANCY_COPIES => {
                Err(ChainError::InvalidParameter {
                    kind: PolicyKind::Redundancy,
                    value: n,
                })
            }
            Self::ReedSolomon(t) if t == 0 || t as usize >= CHUNK_SYMBOLS => {
                Err(ChainError::InvalidParameter {
                    kind: PolicyKind::ReedSolomon,
                    value: t,
                })
            }
            other => Ok(other),
        }
    }
}

/// Canonically ordered, validated policy chain with fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PolicyChain {
    slots: [Option<Policy>; MAX_POLICIES],
    len: usize,
}

impl PolicyChain {
    /// The empty chain: plain allocation, no overhead.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            slots: [None; MAX_POLICIES],
            len: 0,
        }
    }

    /// Validate `policies` and arrange them in canonical order.
    pub fn normalize(policies: &[Policy]) -> Result<Self, ChainError> {
        if policies.len() > MAX_POLICIES {
            return Err(ChainError::TooManyPolicies {
                count: policies.len(),
                max: MAX_POLICIES,
            });
        }

        let mut by_rank: [Option<Policy>; MAX_POLICIES] = [None; MAX_POLICIES];
        for &policy in policies {
            let policy = policy.validate()?;
            let slot = &mut by_rank[policy.kind().rank()];
            if slot.is_some() {
                return Err(ChainError::DuplicateKind(policy.kind()));
            }
            *slot = Some(policy);
        }

        let mut chain = Self::empty();
        for policy in by_rank.into_iter().flatten() {
            chain.slots[chain.len] = Some(policy);
            chain.len += 1;
        }
        Ok(chain)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Policies outermost first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Policy> + '_ {
        self.slots[..self.len].iter().flatten().copied()
    }

    #[must_use]
    pub fn contains(&self, kind: PolicyKind) -> bool {
        self.iter().any(|p| p.kind() == kind)
    }

    /// Compact human-readable form, e.g. `redundancy(3)+reed_solomon(8)`.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        self.iter()
            .map(|p| match p {
                Policy::Redundancy(n) => format!("redundancy({n})"),
                Policy::ReedSolomon(t) => format!("reed_solomon({t})"),
                Policy::Encryption => "encryption".to_string(),
            })
            .collect::<Vec<_>>()
            .join("+")
    }
}
