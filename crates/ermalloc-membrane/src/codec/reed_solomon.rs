//! Systematic Reed-Solomon over GF(2^8).
//!
//! Logical data is cut into chunks of `255 - t` bytes; each chunk is stored as
//! its data followed by `t` parity bytes. The final chunk may be shorter, in
//! which case it is a shortened code with the same parity count. Chunks are
//! decoded independently, so damage beyond the budget of one chunk never
//! spreads to its neighbours.
//!
//! Codeword byte `i` of an `m`-byte chunk is the coefficient of `x^(m-1-i)`.
//! The generator polynomial has roots `alpha^0 .. alpha^(t-1)`.

use super::{Codec, Decoded};
use crate::gf;
use crate::policy::PolicyKind;

/// Symbols per full codeword.
pub const CHUNK_SYMBOLS: usize = gf::FIELD_ORDER;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReedSolomonCodec {
    parity: usize,
    /// Generator polynomial, highest degree first, monic.
    generator: Vec<u8>,
}

/// Why a chunk could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkFailure {
    TooManyErrors,
    LocatorMismatch,
    ResidualSyndrome,
    Truncated,
}

impl ReedSolomonCodec {
    /// `parity` must be in `1..CHUNK_SYMBOLS`; the normalizer enforces this.
    #[must_use]
    pub fn new(parity: usize) -> Self {
        let mut generator = vec![1u8];
        for i in 0..parity {
            generator = gf::poly_mul(&generator, &[1, gf::exp(i)]);
        }
        Self { parity, generator }
    }

    #[must_use]
    pub const fn parity(&self) -> usize {
        self.parity
    }

    /// Data symbols per full chunk.
    #[must_use]
    pub const fn data_symbols(&self) -> usize {
        CHUNK_SYMBOLS - self.parity
    }

    /// Maximum number of symbol errors repaired per chunk.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.parity / 2
    }

    /// Parity bytes for one chunk of data.
    fn parity_of(&self, data: &[u8]) -> Vec<u8> {
        let t = self.parity;
        let mut work = Vec::with_capacity(data.len() + t);
        work.extend_from_slice(data);
        work.resize(data.len() + t, 0);
        for i in 0..data.len() {
            let coef = work[i];
            if coef == 0 {
                continue;
            }
            for j in 1..=t {
                work[i + j] ^= gf::mul(self.generator[j], coef);
            }
        }
        work.split_off(data.len())
    }

    fn syndromes(&self, codeword: &[u8]) -> Vec<u8> {
        (0..self.parity)
            .map(|j| gf::eval_high_first(codeword, gf::exp(j)))
            .collect()
    }

    /// Error locator via Berlekamp-Massey, lowest degree first, with its degree.
    fn error_locator(&self, synd: &[u8]) -> (Vec<u8>, usize) {
        let t = self.parity;
        let mut locator = vec![0u8; t + 1];
        locator[0] = 1;
        let mut prev = locator.clone();
        let mut errors = 0usize;
        let mut shift = 1usize;
        let mut prev_discrepancy = 1u8;

        for r in 0..t {
            let mut discrepancy = synd[r];
            for i in 1..=errors {
                discrepancy ^= gf::mul(locator[i], synd[r - i]);
            }
            if discrepancy == 0 {
                shift += 1;
                continue;
            }
            let scale = gf::div(discrepancy, prev_discrepancy);
            let snapshot = locator.clone();
            for i in 0..(t + 1 - shift) {
                locator[i + shift] ^= gf::mul(scale, prev[i]);
            }
            if 2 * errors <= r {
                errors = r + 1 - errors;
                prev = snapshot;
                prev_discrepancy = discrepancy;
                shift = 1;
            } else {
                shift += 1;
            }
        }
        (locator, errors)
    }

    /// Repair `codeword` in place, returning the number of corrected symbols.
    fn correct_chunk(&self, codeword: &mut [u8]) -> Result<usize, ChunkFailure> {
        let m = codeword.len();
        if m <= self.parity {
            return Err(ChunkFailure::Truncated);
        }
        let synd = self.syndromes(codeword);
        if synd.iter().all(|&s| s == 0) {
            return Ok(0);
        }

        let (locator, errors) = self.error_locator(&synd);
        if errors == 0 || 2 * errors > self.parity {
            return Err(ChunkFailure::TooManyErrors);
        }

        // Chien search restricted to the positions this (possibly shortened)
        // chunk actually has.
        let positions: Vec<usize> = (0..m)
            .filter(|&i| {
                let power = m - 1 - i;
                let x_inv = gf::exp(CHUNK_SYMBOLS - power % CHUNK_SYMBOLS);
                gf::eval_low_first(&locator, x_inv) == 0
            })
            .collect();
        if positions.len() != errors {
            return Err(ChunkFailure::LocatorMismatch);
        }

        // Forney: Y = X * Omega(X^-1) / Lambda'(X^-1), Omega = S * Lambda mod x^t.
        let mut evaluator = gf::poly_mul(&synd, &locator);
        evaluator.truncate(self.parity);
        let derivative: Vec<u8> = locator
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, &c)| if i % 2 == 1 { c } else { 0 })
            .collect();

        let mut repaired = codeword.to_vec();
        for &i in &positions {
            let power = m - 1 - i;
            let x = gf::exp(power);
            let x_inv = gf::exp(CHUNK_SYMBOLS - power % CHUNK_SYMBOLS);
            let denom = gf::eval_low_first(&derivative, x_inv);
            if denom == 0 {
                return Err(ChunkFailure::LocatorMismatch);
            }
            let magnitude = gf::div(gf::mul(x, gf::eval_low_first(&evaluator, x_inv)), denom);
            repaired[i] ^= magnitude;
        }

        if self.syndromes(&repaired).iter().any(|&s| s != 0) {
            return Err(ChunkFailure::ResidualSyndrome);
        }
        codeword.copy_from_slice(&repaired);
        Ok(errors)
    }
}

impl Codec for ReedSolomonCodec {
    fn kind(&self) -> PolicyKind {
        PolicyKind::ReedSolomon
    }

    fn expand(&self, logical_len: usize) -> usize {
        logical_len + logical_len.div_ceil(self.data_symbols()) * self.parity
    }

    fn contract(&self, physical_len: usize) -> usize {
        let chunks = physical_len.div_ceil(CHUNK_SYMBOLS);
        physical_len.saturating_sub(chunks * self.parity)
    }

    fn granule(&self) -> usize {
        self.data_symbols()
    }

    fn verifies(&self) -> bool {
        true
    }

    fn logical_position(&self, physical_pos: usize, physical_len: usize) -> Option<usize> {
        if physical_pos >= physical_len {
            return None;
        }
        let chunk = physical_pos / CHUNK_SYMBOLS;
        let within = physical_pos % CHUNK_SYMBOLS;
        let chunk_len = (physical_len - chunk * CHUNK_SYMBOLS).min(CHUNK_SYMBOLS);
        let data_len = chunk_len.saturating_sub(self.parity);
        (within < data_len).then(|| chunk * self.data_symbols() + within)
    }

    fn encode(&self, logical: &[u8], _origin: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.expand(logical.len()));
        for data in logical.chunks(self.data_symbols()) {
            out.extend_from_slice(data);
            out.extend_from_slice(&self.parity_of(data));
        }
        out
    }

    fn decode_and_correct(&self, physical: &[u8], _origin: usize) -> Decoded {
        let k = self.data_symbols();
        let mut decoded = Decoded::clean(Vec::with_capacity(self.contract(physical.len())));
        for (index, chunk) in physical.chunks(CHUNK_SYMBOLS).enumerate() {
            let data_len = chunk.len().saturating_sub(self.parity);
            let start = index * k;
            let mut codeword = chunk.to_vec();
            match self.correct_chunk(&mut codeword) {
                Ok(fixed) => decoded.corrected += fixed,
                Err(_) => decoded.mark_failed(start..start + data_len),
            }
            // On failure the received data is passed through untouched.
            decoded.bytes.extend_from_slice(&codeword[..data_len]);
        }
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    #[test]
    fn generator_has_consecutive_roots() {
        let codec = ReedSolomonCodec::new(6);
        assert_eq!(codec.generator.len(), 7);
        for j in 0..6 {
            assert_eq!(gf::eval_high_first(&codec.generator, gf::exp(j)), 0);
        }
        assert_ne!(gf::eval_high_first(&codec.generator, gf::exp(6)), 0);
    }

    #[test]
    fn codewords_have_zero_syndromes() {
        let codec = ReedSolomonCodec::new(8);
        let encoded = codec.encode(&sample(40, 3), 0);
        assert_eq!(encoded.len(), 48);
        assert!(codec.syndromes(&encoded).iter().all(|&s| s == 0));
    }

    #[test]
    fn expansion_counts_parity_per_chunk() {
        let codec = ReedSolomonCodec::new(5);
        let k = codec.data_symbols();
        assert_eq!(k, 250);
        assert_eq!(codec.expand(0), 0);
        assert_eq!(codec.expand(1), 6);
        assert_eq!(codec.expand(250), 255);
        assert_eq!(codec.expand(251), 261);
        assert_eq!(codec.contract(261), 251);
        assert_eq!(codec.contract(255), 250);
    }

    #[test]
    fn multi_chunk_round_trip() {
        let codec = ReedSolomonCodec::new(16);
        let data = sample(1000, 9);
        let encoded = codec.encode(&data, 0);
        assert_eq!(encoded.len(), codec.expand(data.len()));
        let decoded = codec.decode_and_correct(&encoded, 0);
        assert_eq!(decoded.bytes, data);
        assert!(decoded.is_clean());
    }

    #[test]
    fn corrects_up_to_half_the_parity() {
        for t in [2usize, 3, 4, 8, 16, 32] {
            let codec = ReedSolomonCodec::new(t);
            let data = sample(100, t as u8);
            let mut encoded = codec.encode(&data, 0);
            let budget = t / 2;
            for e in 0..budget {
                // Spread errors over data and parity.
                let pos = (e * 37 + 5) % encoded.len();
                encoded[pos] ^= 0x5A ^ e as u8;
            }
            let decoded = codec.decode_and_correct(&encoded, 0);
            assert_eq!(decoded.bytes, data, "t={t}");
            assert_eq!(decoded.corrected, budget, "t={t}");
            assert!(decoded.failed.is_empty(), "t={t}");
        }
    }

    #[test]
    fn single_symbol_fix_in_a_shortened_chunk() {
        let codec = ReedSolomonCodec::new(3);
        let data = [0b1111u8, 0, 0, 0];
        let mut encoded = codec.encode(&data, 0);
        assert_eq!(encoded.len(), 7);
        encoded[0] = 0b1011;
        let decoded = codec.decode_and_correct(&encoded, 0);
        assert_eq!(decoded.bytes, data);
        assert_eq!(decoded.corrected, 1);
    }

    #[test]
    fn overload_fails_only_its_own_chunk() {
        let codec = ReedSolomonCodec::new(32);
        let k = codec.data_symbols();
        let data = sample(2 * k + 10, 77);
        let mut encoded = codec.encode(&data, 0);

        // Chunk 0: 17 errors, one past the budget of 16.
        for e in 0..17 {
            encoded[e * 7] ^= 0xC3;
        }
        // Chunk 1: a single error.
        encoded[CHUNK_SYMBOLS + 3] ^= 0x01;

        let decoded = codec.decode_and_correct(&encoded, 0);
        assert_eq!(decoded.failed, vec![0..k]);
        assert_eq!(decoded.corrected, 1);
        assert_eq!(&decoded.bytes[k..], &data[k..]);
    }

    #[test]
    fn single_parity_detects_but_cannot_correct() {
        let codec = ReedSolomonCodec::new(1);
        let mut encoded = codec.encode(&[1, 2, 3], 0);
        encoded[1] ^= 0x40;
        let decoded = codec.decode_and_correct(&encoded, 0);
        assert_eq!(decoded.failed, vec![0..3]);
        assert_eq!(decoded.bytes, vec![1, 0x42, 3]);
    }

    #[test]
    fn physical_positions_map_to_data_or_parity() {
        let codec = ReedSolomonCodec::new(5);
        let len = codec.expand(260);
        assert_eq!(len, 270);
        assert_eq!(codec.logical_position(0, len), Some(0));
        assert_eq!(codec.logical_position(249, len), Some(249));
        assert_eq!(codec.logical_position(250, len), None);
        assert_eq!(codec.logical_position(255, len), Some(250));
        // The short tail chunk holds 10 data bytes then its parity.
        assert_eq!(codec.logical_position(264, len), Some(259));
        assert_eq!(codec.logical_position(265, len), None);
        assert_eq!(codec.logical_position(270, len), None);
    }
}
