#![no_main]
use libfuzzer_sys::fuzz_target;

use ermalloc_membrane::{EngineConfig, Policy, ResilientHeap};

const CHAINS: [&[Policy]; 4] = [
    &[],
    &[Policy::Redundancy(3)],
    &[Policy::ReedSolomon(4), Policy::Encryption],
    &[Policy::Redundancy(5), Policy::ReedSolomon(2), Policy::Encryption],
];

fuzz_target!(|data: &[u8]| {
    // Operation stream against one heap; every call must return, never panic.
    let heap = ResilientHeap::with_config(EngineConfig::default().with_log_level(None));
    let mut live: Vec<usize> = Vec::new();
    for op in data.chunks(4) {
        let arg = |i: usize| op.get(i).copied().unwrap_or(0);
        let (code, a, b, c) = (op[0], arg(1), arg(2), arg(3));
        let pick = |n: usize| usize::from(a) % n.max(1);
        match code % 8 {
            0 => {
                if let Ok(h) = heap.malloc(usize::from(b) * 4, CHAINS[usize::from(c) % 4]) {
                    let _ = heap.setup_policies(h);
                    live.push(h);
                }
            }
            1 if !live.is_empty() => {
                let h = live.swap_remove(pick(live.len()));
                let _ = heap.free(h);
            }
            2 if !live.is_empty() => {
                let bit = usize::from(b) * 8 + usize::from(c % 8);
                let _ = heap.flip_bit(live[pick(live.len())], bit);
            }
            3 if !live.is_empty() => {
                let _ = heap.correct_buffer(live[pick(live.len())]);
            }
            4 if !live.is_empty() => {
                let mut dest = vec![0u8; usize::from(c)];
                let _ = heap.read_buf(live[pick(live.len())], &mut dest, usize::from(b));
            }
            5 if !live.is_empty() => {
                let _ = heap.write_buf(live[pick(live.len())], &[c; 7], usize::from(b));
            }
            6 if !live.is_empty() => {
                let i = pick(live.len());
                let size = usize::from(b) + 1;
                if let Ok(Some(h)) = heap.realloc(Some(live[i]), size, CHAINS[usize::from(c) % 4]) {
                    live[i] = h;
                }
            }
            7 if !live.is_empty() => {
                let i = pick(live.len());
                if let Ok(h) = heap.change_policies(live[i], CHAINS[usize::from(c) % 4]) {
                    live[i] = h;
                }
            }
            _ => {}
        }
    }
    assert_eq!(heap.live_allocations(), live.len());
});
