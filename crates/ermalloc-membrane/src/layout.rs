//! Physical layout of one allocation under a normalized chain.
//!
//! The logical region is divided into granules: Reed-Solomon data chunks when
//! the chain has one, otherwise single bytes. A granule is the smallest unit
//! that can be decoded on its own, and a run of consecutive granules always
//! occupies one contiguous physical span. This is what lets a partial read or
//! write touch only the physical bytes it implicates.

use std::ops::Range;

use crate::codec::{CipherKey, Codec, Decoded, PolicyCodec};
use crate::error::EngineError;
use crate::policy::PolicyChain;

/// Bound on `physical / logical` for any valid chain (255 copies of a
/// rate-1/255 code), rounded up.
const MAX_EXPANSION: usize = 255 * 256;

/// Largest logical size any chain can expand without overflowing.
pub const MAX_LOGICAL_SIZE: usize = isize::MAX as usize / MAX_EXPANSION;

#[derive(Debug, Clone)]
pub struct Layout {
    logical_size: usize,
    physical_size: usize,
    granule: usize,
    /// Bound codecs, outermost first.
    codecs: Vec<PolicyCodec>,
}

impl Layout {
    pub fn new(
        logical_size: usize,
        chain: &PolicyChain,
        key: &CipherKey,
        nonce: u64,
    ) -> Result<Self, EngineError> {
        if !chain.is_empty() && logical_size > MAX_LOGICAL_SIZE {
            return Err(EngineError::SizeOverflow);
        }
        let codecs: Vec<PolicyCodec> = chain
            .iter()
            .map(|policy| PolicyCodec::bind(policy, key, nonce))
            .collect();
        let granule = codecs.iter().map(Codec::granule).max().unwrap_or(1);
        let mut layout = Self {
            logical_size,
            physical_size: 0,
            granule,
            codecs,
        };
        layout.physical_size = layout.physical_offset(logical_size);
        Ok(layout)
    }

    #[must_use]
    pub const fn logical_size(&self) -> usize {
        self.logical_size
    }

    #[must_use]
    pub const fn physical_size(&self) -> usize {
        self.physical_size
    }

    /// Logical bytes per granule.
    #[must_use]
    pub const fn granule_len(&self) -> usize {
        self.granule
    }

    #[must_use]
    pub fn granule_count(&self) -> usize {
        self.logical_size.div_ceil(self.granule)
    }

    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Granules intersecting the logical window `offset..offset+len`.
    #[must_use]
    pub fn granules_for(&self, offset: usize, len: usize) -> Range<usize> {
        let first = offset / self.granule;
        if len == 0 {
            return first..first;
        }
        first..(offset + len).div_ceil(self.granule)
    }

    /// Logical bytes covered by a run of granules.
    #[must_use]
    pub fn logical_span(&self, granules: Range<usize>) -> Range<usize> {
        let start = (granules.start * self.granule).min(self.logical_size);
        let end = (granules.end * self.granule).min(self.logical_size);
        start..end
    }

    /// Physical bytes holding a run of granules.
    #[must_use]
    pub fn physical_span(&self, granules: Range<usize>) -> Range<usize> {
        let logical = self.logical_span(granules);
        self.physical_offset(logical.start)..self.physical_offset(logical.end)
    }

    /// Physical offset of a logical granule boundary (or of the region end).
    fn physical_offset(&self, logical: usize) -> usize {
        self.codecs
            .iter()
            .rev()
            .fold(logical, |len, codec| codec.expand(len))
    }

    /// Encode logical bytes starting at granule boundary `origin`.
    #[must_use]
    pub fn encode_span(&self, origin: usize, logical: &[u8]) -> Vec<u8> {
        let mut bytes = logical.to_vec();
        for codec in self.codecs.iter().rev() {
            bytes = codec.encode(&bytes, origin);
        }
        bytes
    }

    /// Decode a physical span whose first logical byte is `origin`.
    ///
    /// Failed ranges in the result are relative to the span. A verifying codec
    /// (Reed-Solomon) settles everything outer layers reported inside its
    /// chunks, and the stale physical copies behind those settled positions
    /// count as repairs; other codecs carry outer failures through to their
    /// output.
    #[must_use]
    pub fn decode_span(&self, origin: usize, physical: &[u8]) -> Decoded {
        let mut bytes = physical.to_vec();
        let mut corrected = 0usize;
        let mut failed: Vec<Range<usize>> = Vec::new();
        let mut input_lens = Vec::with_capacity(self.codecs.len());

        for (depth, codec) in self.codecs.iter().enumerate() {
            let input_len = bytes.len();
            input_lens.push(input_len);
            let step = codec.decode_and_correct(&bytes, origin);
            corrected += step.corrected;
            failed = if codec.verifies() {
                if !failed.is_empty() {
                    let settled = Settled {
                        depth,
                        origin,
                        guess: &bytes,
                        unsettled: &failed,
                        step: &step,
                        input_lens: &input_lens,
                    };
                    corrected += self.settled_repairs(physical, &settled);
                }
                step.failed
            } else {
                let mut carried = step.failed;
                for range in &failed {
                    carried.extend(
                        range
                            .clone()
                            .filter_map(|pos| codec.logical_position(pos, input_len))
                            .map(|pos| pos..pos + 1),
                    );
                }
                merge_ranges(carried)
            };
            bytes = step.bytes;
        }

        let mut decoded = Decoded::clean(bytes);
        decoded.corrected = corrected;
        for range in failed {
            decoded.mark_failed(range);
        }
        decoded
    }

    /// Physical copies left stale behind positions that a verifying codec
    /// resolved after an outer layer could not.
    ///
    /// The verifying codec already counted the symbols where the outer guess
    /// was wrong; those are replaced by the number of copies that disagree
    /// with the resolved value.
    fn settled_repairs(&self, physical: &[u8], settled: &Settled<'_>) -> usize {
        let codec = &self.codecs[settled.depth];
        let truth = codec.encode(&settled.step.bytes, settled.origin);
        let input_len = settled.guess.len();
        let resolved = |pos: usize| {
            settled.unsettled.iter().any(|r| r.contains(&pos))
                && match codec.logical_position(pos, input_len) {
                    Some(out) => !settled.step.failed.iter().any(|r| r.contains(&out)),
                    None => settled.step.failed.is_empty(),
                }
        };

        let wrong_guesses = settled
            .guess
            .iter()
            .zip(&truth)
            .enumerate()
            .filter(|(pos, (have, want))| have != want && resolved(*pos))
            .count();

        let mut expected = truth;
        for outer in self.codecs[..settled.depth].iter().rev() {
            expected = outer.encode(&expected, settled.origin);
        }
        let stale_copies = physical
            .iter()
            .zip(&expected)
            .enumerate()
            .filter(|(pos, (have, want))| {
                have != want
                    && self
                        .position_at_depth(*pos, settled.depth, settled.input_lens)
                        .is_some_and(&resolved)
            })
            .count();

        stale_copies.saturating_sub(wrong_guesses)
    }

    /// Map a physical position to the input of the codec at `depth`.
    fn position_at_depth(&self, pos: usize, depth: usize, input_lens: &[usize]) -> Option<usize> {
        self.codecs[..depth]
            .iter()
            .zip(input_lens)
            .try_fold(pos, |p, (codec, &len)| codec.logical_position(p, len))
    }
}

/// A verifying decode step and the outer-layer failures it may resolve.
struct Settled<'a> {
    depth: usize,
    origin: usize,
    /// Best-effort input handed to the verifying codec.
    guess: &'a [u8],
    /// Outer failures, in the verifying codec's input coordinates.
    unsettled: &'a [Range<usize>],
    step: &'a Decoded,
    input_lens: &'a [usize],
}

fn merge_ranges(mut ranges: Vec<Range<usize>>) -> Vec<Range<usize>> {
    ranges.sort_by_key(|r| (r.start, r.end));
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges.into_iter().filter(|r| !r.is_empty()) {
        match merged.last_mut() {
            Some(last) if last.end >= range.start => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}
