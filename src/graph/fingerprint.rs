// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The fingerprint dedup index (spec §3, §4.3, §8 invariant 1): one
//! entry per decrypted file node, keyed by its content fingerprint.

use crate::handle::Handle;
use crate::types::node::Fingerprint;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// A compact content identity: CRC of up to four sampled 16-byte blocks
/// plus modification time (spec §3). Mirrors the original SDK's
/// sparse-sample CRC fingerprint rather than hashing whole files, so
/// dedup and sync rename-detection stay cheap on large files.
pub fn compute_fingerprint(size: u64, mtime: i64, sample_reader: impl Fn(u64, &mut [u8; 16]) -> bool) -> Fingerprint {
    const SAMPLE_COUNT: u64 = 4;
    let mut crc = 0xFFFF_FFFFu32;
    let mut any_sampled = false;

    if size == 0 {
        return Fingerprint { sample_crc: 0, mtime };
    }

    for i in 0..SAMPLE_COUNT.min(size.div_ceil(16).max(1)) {
        let offset = if size <= 16 * SAMPLE_COUNT {
            i * 16
        } else {
            (size / SAMPLE_COUNT) * i
        };
        if offset >= size {
            break;
        }
        let mut block = [0u8; 16];
        if sample_reader(offset, &mut block) {
            any_sampled = true;
            crc = crc32_update(crc, &block);
        }
    }

    if !any_sampled {
        crc = 0;
    }

    Fingerprint {
        sample_crc: !crc,
        mtime,
    }
}

fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    crc
}

/// Encode a fingerprint as the base64 string stored in a file node's `c`
/// attribute: 4-byte little-endian CRC followed by 8-byte little-endian
/// mtime.
pub fn encode_attr_fingerprint(fp: &Fingerprint) -> String {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(&fp.sample_crc.to_le_bytes());
    buf[4..12].copy_from_slice(&fp.mtime.to_le_bytes());
    base64::encode_config(buf, base64::URL_SAFE_NO_PAD)
}

/// Inverse of [`encode_attr_fingerprint`].
pub fn decode_attr_fingerprint(s: &str) -> Option<Fingerprint> {
    let buf = base64::decode_config(s, base64::URL_SAFE_NO_PAD).ok()?;
    if buf.len() != 12 {
        return None;
    }
    let sample_crc = u32::from_le_bytes(buf[0..4].try_into().ok()?);
    let mtime = i64::from_le_bytes(buf[4..12].try_into().ok()?);
    Some(Fingerprint { sample_crc, mtime })
}

/// Multimap from fingerprint to the decrypted file nodes that carry it.
/// Duplicate-upload suppression and sync dedup both query this
/// (spec §4.3).
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    by_fingerprint: DashMap<Fingerprint, BTreeSet<Handle>>,
}

impl FingerprintIndex {
    pub fn insert(&self, fp: Fingerprint, node: Handle) {
        self.by_fingerprint.entry(fp).or_default().insert(node);
    }

    pub fn remove(&self, fp: &Fingerprint, node: &Handle) {
        if let Some(mut set) = self.by_fingerprint.get_mut(fp) {
            set.remove(node);
            if set.is_empty() {
                drop(set);
                self.by_fingerprint.remove(fp);
            }
        }
    }

    pub fn lookup(&self, fp: &Fingerprint) -> Vec<Handle> {
        self.by_fingerprint
            .get(fp)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
