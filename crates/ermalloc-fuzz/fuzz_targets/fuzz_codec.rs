#![no_main]
use libfuzzer_sys::fuzz_target;

use ermalloc_membrane::codec::CipherKey;
use ermalloc_membrane::{Layout, Policy, PolicyChain};

fuzz_target!(|data: &[u8]| {
    // byte 0: chain selector, byte 1: RS parity, byte 2: flip count, rest: payload
    if data.len() < 3 {
        return;
    }
    let mut policies = Vec::new();
    if data[0] & 1 != 0 {
        policies.push(Policy::Redundancy(u32::from(data[0] >> 4) | 1));
    }
    if data[0] & 2 != 0 {
        policies.push(Policy::ReedSolomon(u32::from(data[1])));
    }
    if data[0] & 4 != 0 {
        policies.push(Policy::Encryption);
    }
    let Ok(chain) = PolicyChain::normalize(&policies) else {
        return;
    };
    let payload = &data[3..];
    let key = CipherKey::from_bytes([data[0]; 32]);
    let Ok(layout) = Layout::new(payload.len(), &chain, &key, u64::from(data[1])) else {
        return;
    };

    let mut encoded = layout.encode_span(0, payload);
    assert_eq!(encoded.len(), layout.physical_size());
    let clean = layout.decode_span(0, &encoded);
    assert!(clean.is_clean());
    assert_eq!(clean.bytes, payload);

    // Arbitrary damage must never panic, and the output length is fixed.
    if encoded.is_empty() {
        return;
    }
    for (i, &b) in payload.iter().take(usize::from(data[2])).enumerate() {
        let at = (usize::from(b) * 131 + i * 17) % encoded.len();
        encoded[at] ^= b | 1;
    }
    let damaged = layout.decode_span(0, &encoded);
    assert_eq!(damaged.bytes.len(), payload.len());
    for range in &damaged.failed {
        assert!(range.end <= payload.len());
    }
});
