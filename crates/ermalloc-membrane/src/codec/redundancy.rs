//! N-way replication with per-byte majority voting.
//!
//! Logical byte `i` is stored at physical positions `i*n .. i*n + n`. Keeping
//! the copies of one byte adjacent means a window of logical bytes maps to a
//! single contiguous physical window.

use super::{Codec, Decoded};
use crate::policy::PolicyKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedundancyCodec {
    copies: usize,
}

/// Result of voting over one replica group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// A strict majority agreed; `dissent` copies disagreed with it.
    Majority { value: u8, dissent: usize },
    /// No value reached a strict majority; `plurality` is the best guess.
    NoMajority { plurality: u8 },
}

impl RedundancyCodec {
    #[must_use]
    pub const fn new(copies: usize) -> Self {
        Self { copies }
    }

    #[must_use]
    pub const fn copies(&self) -> usize {
        self.copies
    }

    /// Vote over one group of replicas.
    #[must_use]
    pub fn vote(group: &[u8]) -> Vote {
        let mut counts = [0u16; 256];
        for &b in group {
            counts[b as usize] += 1;
        }
        // Ties go to the value seen first so the guess is stable.
        let mut best = group.first().copied().unwrap_or(0);
        for &b in group {
            if counts[b as usize] > counts[best as usize] {
                best = b;
            }
        }
        let agree = counts[best as usize] as usize;
        if agree > group.len() / 2 {
            Vote::Majority {
                value: best,
                dissent: group.len() - agree,
            }
        } else {
            Vote::NoMajority { plurality: best }
        }
    }
}

impl Codec for RedundancyCodec {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Redundancy
    }

    fn expand(&self, logical_len: usize) -> usize {
        logical_len * self.copies
    }

    fn contract(&self, physical_len: usize) -> usize {
        physical_len / self.copies
    }

    fn granule(&self) -> usize {
        1
    }

    fn verifies(&self) -> bool {
        false
    }

    fn logical_position(&self, physical_pos: usize, _physical_len: usize) -> Option<usize> {
        Some(physical_pos / self.copies)
    }

    fn encode(&self, logical: &[u8], _origin: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(logical.len() * self.copies);
        for &b in logical {
            out.extend(std::iter::repeat_n(b, self.copies));
        }
        out
    }

    fn decode_and_correct(&self, physical: &[u8], _origin: usize) -> Decoded {
        let mut decoded = Decoded::clean(Vec::with_capacity(physical.len() / self.copies));
        for (i, group) in physical.chunks_exact(self.copies).enumerate() {
            match Self::vote(group) {
                Vote::Majority { value, dissent } => {
                    decoded.corrected += dissent;
                    decoded.bytes.push(value);
                }
                Vote::NoMajority { plurality } => {
                    decoded.mark_failed(i..i + 1);
                    decoded.bytes.push(plurality);
                }
            }
        }
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_are_interleaved_per_byte() {
        let codec = RedundancyCodec::new(3);
        assert_eq!(
            codec.encode(&[1, 2], 0),
            vec![1, 1, 1, 2, 2, 2],
            "byte i lives at i*n..i*n+n"
        );
        assert_eq!(codec.expand(7), 21);
        assert_eq!(codec.contract(21), 7);
    }

    #[test]
    fn round_trip_is_clean() {
        let codec = RedundancyCodec::new(5);
        let data: Vec<u8> = (0..=255).collect();
        let decoded = codec.decode_and_correct(&codec.encode(&data, 0), 0);
        assert_eq!(decoded.bytes, data);
        assert!(decoded.is_clean());
    }

    #[test]
    fn minority_corruption_is_corrected_and_counted_per_copy() {
        for n in [3usize, 5, 7, 9] {
            let codec = RedundancyCodec::new(n);
            let mut physical = codec.encode(&[0xA5, 0x3C], 0);
            let budget = (n - 1) / 2;
            for copy in 0..budget {
                // Distinct corruptions in distinct copies of byte 1.
                physical[n + copy] ^= 1 << copy;
            }
            let decoded = codec.decode_and_correct(&physical, 0);
            assert_eq!(decoded.bytes, vec![0xA5, 0x3C], "n={n}");
            assert_eq!(decoded.corrected, budget, "n={n}");
            assert!(decoded.failed.is_empty(), "n={n}");
        }
    }

    #[test]
    fn half_or_more_distinct_corruptions_are_uncorrectable() {
        for n in [3usize, 5, 7] {
            let codec = RedundancyCodec::new(n);
            let mut physical = codec.encode(&[0x00, 0x11, 0x22], 0);
            let broken = n.div_ceil(2);
            for copy in 0..broken {
                physical[n + copy] = 0x80 | copy as u8;
            }
            let decoded = codec.decode_and_correct(&physical, 0);
            assert_eq!(decoded.failed, vec![1..2], "n={n}");
            assert_eq!(decoded.bytes[0], 0x00);
            assert_eq!(decoded.bytes[2], 0x22);
        }
    }

    #[test]
    fn vote_reports_dissent() {
        assert_eq!(
            RedundancyCodec::vote(&[4, 4, 9]),
            Vote::Majority {
                value: 4,
                dissent: 1
            }
        );
        assert_eq!(
            RedundancyCodec::vote(&[1, 2, 3]),
            Vote::NoMajority { plurality: 1 }
        );
    }

    #[test]
    fn physical_positions_map_back_to_their_byte() {
        let codec = RedundancyCodec::new(3);
        assert_eq!(codec.logical_position(0, 9), Some(0));
        assert_eq!(codec.logical_position(5, 9), Some(1));
        assert_eq!(codec.logical_position(6, 9), Some(2));
    }
}
