//! Buffer access engine.
//!
//! Translates logical windows into the granules and physical spans they
//! implicate and runs the decode / correct / re-encode cycle over them. All
//! functions here work on a record and a borrowed physical region; locking
//! and ownership of the memory belong to the heap.

use std::ops::Range;

use crate::config::{EngineConfig, RepairMode};
use crate::error::{EngineError, PolicyStateError};
use crate::layout::Layout;
use crate::registry::AllocationRecord;

/// Logical bytes decoded per batch when walking a whole region.
const BATCH_BYTES: usize = 16 * 1024;

/// Outcome of a correcting access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Correction {
    /// Units repaired (redundancy copies, Reed-Solomon symbols).
    pub corrected: usize,
    /// Granules that could not be recovered.
    pub uncorrectable: usize,
}

impl Correction {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.corrected == 0 && self.uncorrectable == 0
    }

    /// C-style status: `0` clean, `> 0` repaired units, `< 0` minus the
    /// number of unrecoverable granules.
    #[must_use]
    pub fn status_code(&self) -> i32 {
        if self.uncorrectable > 0 {
            -i32::try_from(self.uncorrectable).unwrap_or(i32::MAX)
        } else {
            i32::try_from(self.corrected).unwrap_or(i32::MAX)
        }
    }

    fn absorb(&mut self, other: Self) {
        self.corrected += other.corrected;
        self.uncorrectable += other.uncorrectable;
    }
}

/// What a window pass does besides correcting.
enum Access<'a> {
    /// Decode and report only; never writes back.
    Inspect,
    Correct,
    Read { dest: &'a mut [u8], offset: usize },
    Write { src: &'a [u8], offset: usize },
}

fn require_active(record: &AllocationRecord) -> Result<(), EngineError> {
    if record.needs_setup() {
        return Err(PolicyStateError::NotActive.into());
    }
    Ok(())
}

fn check_bounds(record: &AllocationRecord, offset: usize, len: usize) -> Result<(), EngineError> {
    match offset.checked_add(len) {
        Some(end) if end <= record.logical_size => Ok(()),
        _ => Err(EngineError::OutOfBounds {
            offset,
            len,
            logical_size: record.logical_size,
        }),
    }
}

/// Encode the plain logical bytes in place and mark the record active.
pub fn setup(
    record: &mut AllocationRecord,
    region: &mut [u8],
    config: &EngineConfig,
) -> Result<(), EngineError> {
    if record.active {
        return Err(PolicyStateError::AlreadyActive.into());
    }
    if !record.chain.is_empty() {
        let layout = record.layout(&config.key)?;
        let encoded = layout.encode_span(0, &region[..record.logical_size]);
        region[..encoded.len()].copy_from_slice(&encoded);
    }
    record.active = true;
    Ok(())
}

/// Decode, repair and re-encode the whole region.
pub fn correct(
    record: &AllocationRecord,
    region: &mut [u8],
    config: &EngineConfig,
) -> Result<Correction, EngineError> {
    require_active(record)?;
    walk_region(record, region, config, |layout, region, granules| {
        process_window(layout, region, granules, config.mode, Access::Correct)
    })
}

/// Report damage without repairing it.
pub fn inspect(
    record: &AllocationRecord,
    region: &mut [u8],
    config: &EngineConfig,
) -> Result<Correction, EngineError> {
    require_active(record)?;
    walk_region(record, region, config, |layout, region, granules| {
        process_window(layout, region, granules, config.mode, Access::Inspect)
    })
}

/// Copy `dest.len()` logical bytes starting at `offset` into `dest`,
/// repairing the granules they live in.
pub fn read(
    record: &AllocationRecord,
    region: &mut [u8],
    config: &EngineConfig,
    dest: &mut [u8],
    offset: usize,
) -> Result<Correction, EngineError> {
    require_active(record)?;
    check_bounds(record, offset, dest.len())?;
    if !record.is_encoded() {
        dest.copy_from_slice(&region[offset..offset + dest.len()]);
        return Ok(Correction::default());
    }
    let layout = record.layout(&config.key)?;
    let granules = layout.granules_for(offset, dest.len());
    Ok(process_window(
        &layout,
        region,
        granules,
        config.mode,
        Access::Read { dest, offset },
    ))
}

/// Overwrite logical bytes starting at `offset` with `src`. The returned
/// status describes damage found in the touched granules before the write.
pub fn write(
    record: &AllocationRecord,
    region: &mut [u8],
    config: &EngineConfig,
    src: &[u8],
    offset: usize,
) -> Result<Correction, EngineError> {
    require_active(record)?;
    check_bounds(record, offset, src.len())?;
    if !record.is_encoded() {
        region[offset..offset + src.len()].copy_from_slice(src);
        return Ok(Correction::default());
    }
    let layout = record.layout(&config.key)?;
    let granules = layout.granules_for(offset, src.len());
    Ok(process_window(
        &layout,
        region,
        granules,
        config.mode,
        Access::Write { src, offset },
    ))
}

/// Recover the full logical contents, failing if any granule is lost.
pub fn decode_all(
    record: &AllocationRecord,
    region: &[u8],
    config: &EngineConfig,
) -> Result<Vec<u8>, EngineError> {
    if !record.is_encoded() {
        return Ok(region[..record.logical_size].to_vec());
    }
    let layout = record.layout(&config.key)?;
    let decoded = layout.decode_span(0, &region[..record.physical_size]);
    if decoded.failed.is_empty() {
        return Ok(decoded.bytes);
    }
    let granule = layout.granule_len();
    let mut lost = 0usize;
    let mut last = None;
    for range in &decoded.failed {
        for g in range.start / granule..range.end.div_ceil(granule) {
            if last != Some(g) {
                lost += 1;
                last = Some(g);
            }
        }
    }
    Err(EngineError::Uncorrectable { granules: lost })
}

/// Store `logical` into `region` in the form `record` expects.
pub fn encode_all(
    record: &AllocationRecord,
    region: &mut [u8],
    config: &EngineConfig,
    logical: &[u8],
) -> Result<(), EngineError> {
    debug_assert_eq!(logical.len(), record.logical_size);
    if !record.is_encoded() {
        region[..logical.len()].copy_from_slice(logical);
        return Ok(());
    }
    let layout = record.layout(&config.key)?;
    let encoded = layout.encode_span(0, logical);
    region[..encoded.len()].copy_from_slice(&encoded);
    Ok(())
}

fn walk_region(
    record: &AllocationRecord,
    region: &mut [u8],
    config: &EngineConfig,
    mut step: impl FnMut(&Layout, &mut [u8], Range<usize>) -> Correction,
) -> Result<Correction, EngineError> {
    let mut total = Correction::default();
    if !record.is_encoded() {
        return Ok(total);
    }
    let layout = record.layout(&config.key)?;
    let per_batch = (BATCH_BYTES / layout.granule_len()).max(1);
    let count = layout.granule_count();
    let mut start = 0;
    while start < count {
        let end = (start + per_batch).min(count);
        total.absorb(step(&layout, &mut *region, start..end));
        start = end;
    }
    Ok(total)
}

/// One decode / correct / re-encode cycle over a run of granules.
fn process_window(
    layout: &Layout,
    region: &mut [u8],
    granules: Range<usize>,
    mode: RepairMode,
    access: Access<'_>,
) -> Correction {
    if granules.is_empty() {
        return Correction::default();
    }
    let logical = layout.logical_span(granules.clone());
    let physical = layout.physical_span(granules.clone());
    let mut decoded = layout.decode_span(logical.start, &region[physical.clone()]);

    let granule = layout.granule_len();
    let mut lost = vec![false; granules.len()];
    for range in &decoded.failed {
        for g in range.start / granule..range.end.div_ceil(granule) {
            lost[g] = true;
        }
    }
    let status = Correction {
        corrected: decoded.corrected,
        uncorrectable: lost.iter().filter(|&&l| l).count(),
    };

    let mut dirty = status.corrected > 0 || (mode.rewrites_failures() && status.uncorrectable > 0);
    let writes = matches!(access, Access::Write { .. });
    match access {
        Access::Inspect => return status,
        Access::Correct => {}
        Access::Read { dest, offset } => {
            let at = offset - logical.start;
            dest.copy_from_slice(&decoded.bytes[at..at + dest.len()]);
        }
        Access::Write { src, offset } => {
            let at = offset - logical.start;
            decoded.bytes[at..at + src.len()].copy_from_slice(src);
            dirty = true;
        }
    }
    if !dirty {
        return status;
    }

    let encoded = layout.encode_span(logical.start, &decoded.bytes);
    if writes || mode.rewrites_failures() || status.uncorrectable == 0 {
        region[physical].copy_from_slice(&encoded);
        return status;
    }
    // Leave unrecoverable granules exactly as found.
    for (i, _) in lost.iter().enumerate().filter(|(_, l)| !**l) {
        let g = granules.start + i;
        let span = layout.physical_span(g..g + 1);
        let rel = span.start - physical.start..span.end - physical.start;
        region[span].copy_from_slice(&encoded[rel]);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Policy, PolicyChain};

    fn config() -> EngineConfig {
        EngineConfig::default().with_key_material(b"engine tests")
    }

    fn prepared(size: usize, policies: &[Policy], fill: &[u8]) -> (AllocationRecord, Vec<u8>) {
        let cfg = config();
        let chain = PolicyChain::normalize(policies).unwrap();
        let mut record = AllocationRecord::new(0x1000, size, chain, 9, &cfg.key).unwrap();
        let mut region = vec![0u8; record.physical_size];
        region[..fill.len()].copy_from_slice(fill);
        setup(&mut record, &mut region, &cfg).unwrap();
        (record, region)
    }

    #[test]
    fn status_codes() {
        assert_eq!(Correction::default().status_code(), 0);
        let fixed = Correction {
            corrected: 3,
            uncorrectable: 0,
        };
        assert_eq!(fixed.status_code(), 3);
        let lost = Correction {
            corrected: 3,
            uncorrectable: 2,
        };
        assert_eq!(lost.status_code(), -2);
        let huge = Correction {
            corrected: usize::MAX,
            uncorrectable: 0,
        };
        assert_eq!(huge.status_code(), i32::MAX);
    }

    #[test]
    fn setup_twice_is_rejected() {
        let cfg = config();
        let (mut record, mut region) = prepared(4, &[Policy::Redundancy(3)], &[1, 2, 3, 4]);
        assert_eq!(
            setup(&mut record, &mut region, &cfg),
            Err(EngineError::PolicyState(PolicyStateError::AlreadyActive))
        );
    }

    #[test]
    fn access_before_setup_is_rejected() {
        let cfg = config();
        let chain = PolicyChain::normalize(&[Policy::Encryption]).unwrap();
        let record = AllocationRecord::new(0x1000, 4, chain, 0, &cfg.key).unwrap();
        let mut region = vec![0u8; 4];
        let mut dest = [0u8; 1];
        let expected = Err(EngineError::PolicyState(PolicyStateError::NotActive));
        assert_eq!(correct(&record, &mut region, &cfg), expected);
        assert_eq!(read(&record, &mut region, &cfg, &mut dest, 0), expected);
        assert_eq!(write(&record, &mut region, &cfg, &[1], 0), expected);
    }

    #[test]
    fn empty_chain_is_plain_memory() {
        let cfg = config();
        let record = AllocationRecord::new(0x1000, 4, PolicyChain::empty(), 0, &cfg.key).unwrap();
        let mut region = vec![0u8; 4];
        write(&record, &mut region, &cfg, &[7, 8], 1).unwrap();
        assert_eq!(region, vec![0, 7, 8, 0]);
        let mut dest = [0u8; 2];
        read(&record, &mut region, &cfg, &mut dest, 2).unwrap();
        assert_eq!(dest, [8, 0]);
        assert!(correct(&record, &mut region, &cfg).unwrap().is_clean());
    }

    #[test]
    fn windows_are_bounds_checked() {
        let cfg = config();
        let (record, mut region) = prepared(8, &[Policy::Redundancy(3)], &[0; 8]);
        let mut dest = [0u8; 4];
        assert_eq!(
            read(&record, &mut region, &cfg, &mut dest, 5),
            Err(EngineError::OutOfBounds {
                offset: 5,
                len: 4,
                logical_size: 8
            })
        );
        assert!(write(&record, &mut region, &cfg, &[1], usize::MAX).is_err());
        assert!(read(&record, &mut region, &cfg, &mut [], 8).unwrap().is_clean());
    }

    #[test]
    fn single_flip_in_one_copy_is_repaired() {
        let cfg = config();
        let (record, mut region) = prepared(4, &[Policy::Redundancy(3)], &[1, 0, 0, 0]);
        region[1] ^= 0b0100;
        let status = correct(&record, &mut region, &cfg).unwrap();
        assert_eq!(status.status_code(), 1);
        let mut dest = [0u8; 1];
        assert!(read(&record, &mut region, &cfg, &mut dest, 0).unwrap().is_clean());
        assert_eq!(dest, [1]);
        // Idempotent once repaired.
        assert!(correct(&record, &mut region, &cfg).unwrap().is_clean());
    }

    #[test]
    fn read_repairs_only_the_touched_granules() {
        let cfg = config();
        let (record, mut region) = prepared(8, &[Policy::Redundancy(3)], &[9; 8]);
        region[0] ^= 1; // byte 0
        region[21] ^= 1; // byte 7
        let mut dest = [0u8; 1];
        let status = read(&record, &mut region, &cfg, &mut dest, 7).unwrap();
        assert_eq!(status.corrected, 1);
        assert_eq!(region[0], 9 ^ 1, "untouched granule left alone");
        assert_eq!(region[21], 9);
        assert_eq!(correct(&record, &mut region, &cfg).unwrap().corrected, 1);
    }

    #[test]
    fn write_reports_prior_damage_and_lands() {
        let cfg = config();
        let (record, mut region) = prepared(600, &[Policy::ReedSolomon(4)], &[3; 600]);
        region[10] ^= 0xFF;
        let status = write(&record, &mut region, &cfg, &[0xAA; 3], 8).unwrap();
        assert_eq!(status.corrected, 1);
        let mut dest = [0u8; 5];
        assert!(read(&record, &mut region, &cfg, &mut dest, 7).unwrap().is_clean());
        assert_eq!(dest, [3, 0xAA, 0xAA, 0xAA, 3]);
    }

    #[test]
    fn preserve_mode_leaves_lost_granules_untouched() {
        let cfg = config();
        let (record, mut region) = prepared(3, &[Policy::Redundancy(3)], &[5, 6, 7]);
        region[3] = 0x10;
        region[4] = 0x20;
        region[6] ^= 1; // byte 2: correctable
        let before = region.clone();
        let status = correct(&record, &mut region, &cfg).unwrap();
        assert_eq!(status.uncorrectable, 1);
        assert_eq!(status.corrected, 1);
        assert_eq!(region[3..6], before[3..6]);
        assert_eq!(region[6], 7);
        assert_eq!(correct(&record, &mut region, &cfg).unwrap().status_code(), -1);
    }

    #[test]
    fn best_effort_mode_rewrites_lost_granules() {
        let cfg = config().with_mode(RepairMode::BestEffort);
        let (record, mut region) = prepared(3, &[Policy::Redundancy(3)], &[5, 6, 7]);
        region[3] = 0x10;
        region[4] = 0x20;
        assert_eq!(correct(&record, &mut region, &cfg).unwrap().status_code(), -1);
        // The plurality guess is now stored consistently.
        assert_eq!(region[3..6], [0x10, 0x10, 0x10]);
        assert!(correct(&record, &mut region, &cfg).unwrap().is_clean());
    }

    #[test]
    fn split_vote_settled_by_reed_solomon_is_rewritten() {
        let cfg = config();
        let policies = [Policy::Redundancy(3), Policy::ReedSolomon(4)];
        let (record, mut region) = prepared(10, &policies, &[0x07; 10]);
        let pristine = region.clone();
        // Copies 1 and 2 of byte 0 disagree with each other and with copy 0.
        region[1] ^= 0x01;
        region[2] ^= 0x02;

        assert_eq!(inspect(&record, &mut region, &cfg).unwrap().corrected, 2);
        let status = correct(&record, &mut region, &cfg).unwrap();
        assert_eq!(status.status_code(), 2);
        assert_eq!(region, pristine);
        assert!(correct(&record, &mut region, &cfg).unwrap().is_clean());
    }

    #[test]
    fn inspect_never_writes() {
        let cfg = config();
        let (record, mut region) = prepared(4, &[Policy::Redundancy(3)], &[1, 2, 3, 4]);
        region[5] ^= 0x80;
        let before = region.clone();
        assert_eq!(inspect(&record, &mut region, &cfg).unwrap().corrected, 1);
        assert_eq!(region, before);
    }

    #[test]
    fn decode_all_fails_on_lost_data() {
        let cfg = config();
        let (record, mut region) = prepared(4, &[Policy::Redundancy(3)], &[1, 2, 3, 4]);
        assert_eq!(decode_all(&record, &region, &cfg).unwrap(), vec![1, 2, 3, 4]);
        region[0] = 0x40;
        region[1] = 0x41;
        assert_eq!(
            decode_all(&record, &region, &cfg),
            Err(EngineError::Uncorrectable { granules: 1 })
        );
    }

    #[test]
    fn encode_all_matches_setup() {
        let cfg = config();
        let (record, region) = prepared(20, &[Policy::Encryption, Policy::ReedSolomon(2)], &[4; 20]);
        let mut other = vec![0u8; record.physical_size];
        encode_all(&record, &mut other, &cfg, &[4; 20]).unwrap();
        assert_eq!(other, region);
    }

    #[test]
    fn large_regions_walk_in_batches() {
        let cfg = config();
        let size = 3 * BATCH_BYTES + 17;
        let fill: Vec<u8> = (0..size).map(|i| i as u8).collect();
        let (record, mut region) = prepared(size, &[Policy::Redundancy(3)], &fill);
        for pos in [0, BATCH_BYTES * 3, size * 3 - 1] {
            region[pos] ^= 0x01;
        }
        assert_eq!(correct(&record, &mut region, &cfg).unwrap().corrected, 3);
        assert_eq!(decode_all(&record, &region, &cfg).unwrap(), fill);
    }
}
