// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! Chunk offset math, per-chunk MAC, and meta-MAC fold (spec §4.4).

use crate::crypto::CryptoProvider;

const FIRST_STEP: u64 = 128 * 1024;
/// Past this size chunks stop growing quadratically and settle into
/// fixed 1 MiB steps (spec §4.4: "capped at 1 MiB increments after a
/// threshold").
const GROWTH_CAP: u64 = 1024 * 1024;

/// `offset_n = 128 KiB * n(n+1)/2` until the step would exceed
/// [`GROWTH_CAP`], then 1 MiB per chunk thereafter (spec §4.4).
pub fn chunk_boundaries(file_size: u64) -> Vec<u64> {
    let mut boundaries = vec![0u64];
    let mut offset = 0u64;
    let mut n = 1u64;
    loop {
        let step = FIRST_STEP.saturating_mul(n);
        let next = if step >= GROWTH_CAP {
            offset + GROWTH_CAP
        } else {
            offset + step
        };
        if next >= file_size {
            break;
        }
        boundaries.push(next);
        offset = next;
        n += 1;
    }
    boundaries
}

/// The chunk ranges covering a file of `file_size` bytes: consecutive
/// `[start, end)` pairs from [`chunk_boundaries`].
pub fn chunk_ranges(file_size: u64) -> Vec<std::ops::Range<u64>> {
    let boundaries = chunk_boundaries(file_size);
    let mut ranges = Vec::with_capacity(boundaries.len());
    for i in 0..boundaries.len() {
        let start = boundaries[i];
        let end = boundaries.get(i + 1).copied().unwrap_or(file_size);
        ranges.push(start..end);
    }
    ranges
}

/// `(ctr_iv, ctr_counter_start)` for the chunk starting at `offset`, so
/// any chunk's keystream can be computed independently of the ones
/// before it (spec §4.4).
pub fn chunk_ctr_params(ctr_iv: [u8; 8], offset: u64) -> ([u8; 16], u64) {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&ctr_iv);
    (iv, offset / 16)
}

/// AES-CBC-MAC a chunk's ciphertext under `key`/`ctr_iv`, one 16-byte
/// block at a time, XORing each block's chaining value into a running
/// MAC (spec §4.4: "Chunk MACs are AES-CBC-MAC over ciphertext blocks,
/// XORed into a 16-byte running MAC per chunk"). `ciphertext` need not
/// be a block multiple; a short final block is zero-padded.
pub fn chunk_mac(crypto: &dyn CryptoProvider, key: &[u8; 16], ctr_iv: [u8; 8], ciphertext: &[u8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&ctr_iv);
    let mut running = [0u8; 16];

    for block in ciphertext.chunks(16) {
        let mut padded = [0u8; 16];
        padded[..block.len()].copy_from_slice(block);
        let chained = crypto.aes_cbc_mac(key, &iv, &padded);
        for i in 0..16 {
            running[i] ^= chained[i];
        }
    }
    running
}

/// Fold a file's ordered chunk MACs into the 8-byte meta-MAC embedded in
/// its node key (spec §4.4: "the per-file meta-MAC is the folded XOR of
/// the first 8 bytes of each chunk's MAC, AES-ECB-encrypted under the
/// node key").
pub fn meta_mac(crypto: &dyn CryptoProvider, node_key: &[u8; 16], chunk_macs: &[[u8; 16]]) -> [u8; 8] {
    let mut folded = [0u8; 8];
    for mac in chunk_macs {
        for i in 0..8 {
            folded[i] ^= mac[i];
        }
    }
    let mut block = [0u8; 16];
    block[..8].copy_from_slice(&folded);
    block[8..].copy_from_slice(&folded);
    let encrypted = crypto.aes_ecb_encrypt(node_key, &block).expect("16-byte input is block-aligned");
    let mut out = [0u8; 8];
    out.copy_from_slice(&encrypted[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::DefaultCrypto;

    #[test]
    fn first_boundaries_match_the_quadratic_schedule() {
        let boundaries = chunk_boundaries(10 * 1024 * 1024);
        assert_eq!(
            &boundaries[..6],
            &[0, 128 * 1024, 384 * 1024, 768 * 1024, 1280 * 1024, 1920 * 1024]
        );
    }

    #[test]
    fn small_file_is_a_single_chunk() {
        assert_eq!(chunk_ranges(1000), vec![0..1000]);
    }

    #[test]
    fn ranges_cover_the_whole_file_contiguously() {
        let file_size = 5_000_000u64;
        let ranges = chunk_ranges(file_size);
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().end, file_size);
        for w in ranges.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn large_file_eventually_uses_fixed_one_mib_steps() {
        let ranges = chunk_ranges(50 * 1024 * 1024);
        let last_few: Vec<u64> = ranges.iter().rev().take(5).map(|r| r.end - r.start).collect();
        assert!(last_few.iter().all(|&len| len == GROWTH_CAP || len < GROWTH_CAP));
    }

    #[test]
    fn meta_mac_changes_with_chunk_content() {
        let crypto = DefaultCrypto;
        let key = [9u8; 16];
        let a = meta_mac(&crypto, &key, &[[1; 16], [2; 16]]);
        let b = meta_mac(&crypto, &key, &[[1; 16], [3; 16]]);
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_mac_is_order_sensitive_within_a_chunk() {
        let crypto = DefaultCrypto;
        let key = [5u8; 16];
        let iv = [1, 2, 3, 4, 5, 6, 7, 8];
        let a = chunk_mac(&crypto, &key, iv, b"abcdefghijklmnopQRSTUVWXYZ012345");
        let b = chunk_mac(&crypto, &key, iv, b"QRSTUVWXYZ012345abcdefghijklmnop");
        assert_ne!(a, b);
    }
}
