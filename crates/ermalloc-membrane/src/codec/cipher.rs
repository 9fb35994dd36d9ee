//! Position-addressable keystream encryption.
//!
//! The keystream is the BLAKE3 extended output of a keyed hasher over a
//! per-allocation nonce. Ciphertext is plaintext XOR keystream, so any span
//! can be processed independently given its logical origin, and a flipped
//! ciphertext bit flips exactly one plaintext bit. The outer codecs rely on
//! that locality: a single upset never fans out into a burst.

use std::fmt;

use super::{Codec, Decoded};
use crate::policy::PolicyKind;

const KEYSTREAM_DOMAIN: &[u8] = b"ermalloc keystream v1";
const BLOCK: usize = 64;

/// 256-bit encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey([u8; 32]);

impl CipherKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a key from arbitrary material (SHA-256).
    #[must_use]
    pub fn from_material(material: &[u8]) -> Self {
        use sha2::Digest as _;
        Self(sha2::Sha256::digest(material).into())
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short public fingerprint for logs; never the key itself.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(&self.0);
        digest.as_bytes()[..4]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CipherKey").field(&self.fingerprint()).finish()
    }
}

/// Keystream cipher bound to one key and one allocation nonce.
#[derive(Clone)]
pub struct StreamCipher {
    key: CipherKey,
    nonce: u64,
}

impl StreamCipher {
    #[must_use]
    pub fn new(key: &CipherKey, nonce: u64) -> Self {
        Self {
            key: key.clone(),
            nonce,
        }
    }

    #[must_use]
    pub const fn nonce(&self) -> u64 {
        self.nonce
    }

    /// XOR the keystream starting at logical offset `origin` into `buf`.
    pub fn apply(&self, buf: &mut [u8], origin: usize) {
        let mut hasher = blake3::Hasher::new_keyed(self.key.as_bytes());
        hasher.update(KEYSTREAM_DOMAIN);
        hasher.update(&self.nonce.to_le_bytes());
        let mut reader = hasher.finalize_xof();
        reader.set_position(origin as u64);

        let mut block = [0u8; BLOCK];
        for chunk in buf.chunks_mut(BLOCK) {
            let stream = &mut block[..chunk.len()];
            reader.fill(stream);
            for (b, k) in chunk.iter_mut().zip(stream.iter()) {
                *b ^= k;
            }
        }
    }
}

impl fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCipher")
            .field("key", &self.key)
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl Codec for StreamCipher {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Encryption
    }

    fn expand(&self, logical_len: usize) -> usize {
        logical_len
    }

    fn contract(&self, physical_len: usize) -> usize {
        physical_len
    }

    fn granule(&self) -> usize {
        1
    }

    fn verifies(&self) -> bool {
        false
    }

    fn logical_position(&self, physical_pos: usize, physical_len: usize) -> Option<usize> {
        (physical_pos < physical_len).then_some(physical_pos)
    }

    fn encode(&self, logical: &[u8], origin: usize) -> Vec<u8> {
        let mut out = logical.to_vec();
        self.apply(&mut out, origin);
        out
    }

    fn decode_and_correct(&self, physical: &[u8], origin: usize) -> Decoded {
        Decoded::clean(self.encode(physical, origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(nonce: u64) -> StreamCipher {
        StreamCipher::new(&CipherKey::from_material(b"unit-test key"), nonce)
    }

    #[test]
    fn round_trip_restores_plaintext() {
        let c = cipher(7);
        let plain: Vec<u8> = (0..300u32).map(|i| (i * 13) as u8).collect();
        let sealed = c.encode(&plain, 0);
        assert_ne!(sealed, plain);
        let opened = c.decode_and_correct(&sealed, 0);
        assert_eq!(opened.bytes, plain);
        assert!(opened.is_clean());
    }

    #[test]
    fn spans_agree_with_whole_buffer() {
        let c = cipher(1);
        let plain = vec![0u8; 500];
        let whole = c.encode(&plain, 0);
        for (start, end) in [(0, 1), (63, 65), (64, 128), (100, 433), (499, 500)] {
            assert_eq!(
                c.encode(&plain[start..end], start),
                whole[start..end],
                "span {start}..{end}"
            );
        }
    }

    #[test]
    fn nonce_and_key_change_the_stream() {
        let zeros = [0u8; 32];
        assert_ne!(cipher(1).encode(&zeros, 0), cipher(2).encode(&zeros, 0));
        let other = StreamCipher::new(&CipherKey::from_material(b"other"), 1);
        assert_ne!(cipher(1).encode(&zeros, 0), other.encode(&zeros, 0));
    }

    #[test]
    fn bit_flip_stays_local() {
        let c = cipher(3);
        let plain = b"the quick brown fox".to_vec();
        let mut sealed = c.encode(&plain, 0);
        sealed[4] ^= 0x10;
        let opened = c.decode_and_correct(&sealed, 0).bytes;
        let diff: Vec<usize> = (0..plain.len()).filter(|&i| opened[i] != plain[i]).collect();
        assert_eq!(diff, vec![4]);
        assert_eq!(opened[4] ^ plain[4], 0x10);
    }

    #[test]
    fn material_derivation_is_sha256() {
        use sha2::Digest as _;
        let expected: [u8; 32] = sha2::Sha256::digest(b"abc").into();
        assert_eq!(CipherKey::from_material(b"abc").as_bytes(), &expected);
    }

    #[test]
    fn debug_output_hides_key_bytes() {
        let key = CipherKey::from_bytes([0xAB; 32]);
        let shown = format!("{key:?}");
        assert!(shown.starts_with("CipherKey("));
        assert!(!shown.contains("171, 171"));
        assert_eq!(key.fingerprint().len(), 8);
    }
}
