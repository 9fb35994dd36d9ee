//! Codec policy interface and its three variants.
//!
//! Every policy kind is a codec: it expands a logical byte span into a
//! physical one, and later decodes a (possibly corrupted) physical span back
//! into logical bytes while counting what it had to repair. Codecs work on any
//! span that starts on one of their own unit boundaries, which is what lets
//! the engine touch only the chunks a partial read or write implicates.

pub mod cipher;
pub mod reed_solomon;
pub mod redundancy;

use std::ops::Range;

use crate::policy::{Policy, PolicyKind};

pub use cipher::{CipherKey, StreamCipher};
pub use reed_solomon::ReedSolomonCodec;
pub use redundancy::RedundancyCodec;

/// Output of a decode pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Decoded {
    /// Best-effort logical bytes.
    pub bytes: Vec<u8>,
    /// Number of repaired units (copies for redundancy, symbols for Reed-Solomon).
    pub corrected: usize,
    /// Output ranges that could not be recovered and must not be trusted.
    pub failed: Vec<Range<usize>>,
}

impl Decoded {
    /// A decode that found nothing to repair.
    #[must_use]
    pub fn clean(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            corrected: 0,
            failed: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corrected == 0 && self.failed.is_empty()
    }

    /// Record a failed output range, merging with the previous one when adjacent.
    pub fn mark_failed(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        match self.failed.last_mut() {
            Some(last) if last.end >= range.start => last.end = last.end.max(range.end),
            _ => self.failed.push(range),
        }
    }
}

/// Shared contract of all policy codecs.
pub trait Codec {
    fn kind(&self) -> PolicyKind;

    /// Physical length produced by encoding `logical_len` bytes.
    fn expand(&self, logical_len: usize) -> usize;

    /// Logical length recovered from a well-formed `physical_len` span.
    fn contract(&self, physical_len: usize) -> usize;

    /// Logical bytes per independently correctable unit.
    fn granule(&self) -> usize;

    /// True when a successful decode proves its whole unit intact, so that
    /// failures reported by outer layers inside that unit are resolved.
    fn verifies(&self) -> bool;

    /// Logical position carried by byte `physical_pos` of an encoded span
    /// `physical_len` bytes long, or `None` for pure check bytes.
    fn logical_position(&self, physical_pos: usize, physical_len: usize) -> Option<usize>;

    /// Encode `logical`, whose first byte sits at logical offset `origin`.
    fn encode(&self, logical: &[u8], origin: usize) -> Vec<u8>;

    /// Decode and repair `physical`, whose first logical byte sits at `origin`.
    fn decode_and_correct(&self, physical: &[u8], origin: usize) -> Decoded;
}

/// A policy bound to everything it needs to run.
#[derive(Debug, Clone)]
pub enum PolicyCodec {
    Redundancy(RedundancyCodec),
    ReedSolomon(ReedSolomonCodec),
    Encryption(StreamCipher),
}

impl PolicyCodec {
    /// Bind a validated policy. Encryption takes the allocation's key and nonce.
    #[must_use]
    pub fn bind(policy: Policy, key: &CipherKey, nonce: u64) -> Self {
        match policy {
            Policy::Redundancy(n) => Self::Redundancy(RedundancyCodec::new(n as usize)),
            Policy::ReedSolomon(t) => Self::ReedSolomon(ReedSolomonCodec::new(t as usize)),
            Policy::Encryption => Self::Encryption(StreamCipher::new(key, nonce)),
        }
    }

    fn inner(&self) -> &dyn Codec {
        match self {
            Self::Redundancy(c) => c,
            Self::ReedSolomon(c) => c,
            Self::Encryption(c) => c,
        }
    }
}

impl Codec for PolicyCodec {
    fn kind(&self) -> PolicyKind {
        self.inner().kind()
    }

    fn expand(&self, logical_len: usize) -> usize {
        self.inner().expand(logical_len)
    }

    fn contract(&self, physical_len: usize) -> usize {
        self.inner().contract(physical_len)
    }

    fn granule(&self) -> usize {
        self.inner().granule()
    }

    fn verifies(&self) -> bool {
        self.inner().verifies()
    }

    fn logical_position(&self, physical_pos: usize, physical_len: usize) -> Option<usize> {
        self.inner().logical_position(physical_pos, physical_len)
    }

    fn encode(&self, logical: &[u8], origin: usize) -> Vec<u8> {
        self.inner().encode(logical, origin)
    }

    fn decode_and_correct(&self, physical: &[u8], origin: usize) -> Decoded {
        self.inner().decode_and_correct(physical, origin)
    }
}
