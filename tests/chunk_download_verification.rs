// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! Downloading a multi-chunk file and verifying its meta-MAC (spec §8
//! seed scenario 2): a clean run must verify, and a single flipped
//! ciphertext byte must not.

use std::path::PathBuf;
use vault_core::crypto::provider::DefaultCrypto;
use vault_core::crypto::CryptoProvider;
use vault_core::handle::Handle;
use vault_core::transfer::chunking::{chunk_ctr_params, chunk_mac, chunk_ranges, meta_mac};
use vault_core::transfer::{AdmissionOutcome, TransferEngine};
use vault_core::types::node::Fingerprint;
use vault_core::types::transfer::Direction;

const AES_KEY: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
];
const CTR_IV: [u8; 8] = [0; 8];

/// Plaintext large enough to span several chunk-schedule boundaries
/// (spec §4.4's quadratic-then-capped growth), encrypted as one
/// contiguous CTR stream so each chunk's keystream is independent of
/// its neighbours.
fn sample_plaintext() -> Vec<u8> {
    let size = 2 * 1024 * 1024 + 12_345;
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn encrypt_chunks(crypto: &dyn CryptoProvider, plaintext: &[u8]) -> (Vec<std::ops::Range<u64>>, Vec<Vec<u8>>, Vec<[u8; 16]>) {
    let ranges = chunk_ranges(plaintext.len() as u64);
    let mut ciphertexts = Vec::with_capacity(ranges.len());
    let mut macs = Vec::with_capacity(ranges.len());
    for range in &ranges {
        let (iv, counter) = chunk_ctr_params(CTR_IV, range.start);
        let slice = &plaintext[range.start as usize..range.end as usize];
        let ciphertext = crypto.aes_ctr_xor(&AES_KEY, &iv, counter, slice);
        let mac = chunk_mac(crypto, &AES_KEY, CTR_IV, &ciphertext);
        ciphertexts.push(ciphertext);
        macs.push(mac);
    }
    (ranges, ciphertexts, macs)
}

#[test]
fn a_complete_download_verifies_its_meta_mac() {
    let crypto = DefaultCrypto;
    let plaintext = sample_plaintext();
    let (ranges, ciphertexts, macs) = encrypt_chunks(&crypto, &plaintext);
    let expected_meta_mac = meta_mac(&crypto, &AES_KEY, &macs);

    let mut engine = TransferEngine::new();
    let fp = Fingerprint { sample_crc: 7, mtime: 1_700_000_000 };
    let AdmissionOutcome::Created { transfer_id } = engine.admit(
        Direction::Download,
        fp,
        plaintext.len() as u64,
        PathBuf::from("/downloads/movie.mkv"),
        Handle([9; 6]),
    ) else {
        panic!("expected a fresh transfer");
    };

    for (range, ciphertext) in ranges.iter().zip(ciphertexts.iter()) {
        engine.complete_chunk(&crypto, transfer_id, range.clone(), ciphertext, &AES_KEY, CTR_IV);
    }

    assert!(engine.check_completion(&crypto, transfer_id, &AES_KEY, expected_meta_mac));
}

#[test]
fn a_bit_flipped_chunk_fails_meta_mac_verification() {
    let crypto = DefaultCrypto;
    let plaintext = sample_plaintext();
    let (ranges, mut ciphertexts, macs) = encrypt_chunks(&crypto, &plaintext);
    let expected_meta_mac = meta_mac(&crypto, &AES_KEY, &macs);

    // Corrupt one byte in the second chunk, as if it was tampered with
    // in transit.
    ciphertexts[1][0] ^= 0x01;

    let mut engine = TransferEngine::new();
    let fp = Fingerprint { sample_crc: 8, mtime: 1_700_000_000 };
    let AdmissionOutcome::Created { transfer_id } = engine.admit(
        Direction::Download,
        fp,
        plaintext.len() as u64,
        PathBuf::from("/downloads/corrupt.mkv"),
        Handle([10; 6]),
    ) else {
        panic!("expected a fresh transfer");
    };

    for (range, ciphertext) in ranges.iter().zip(ciphertexts.iter()) {
        engine.complete_chunk(&crypto, transfer_id, range.clone(), ciphertext, &AES_KEY, CTR_IV);
    }

    assert!(!engine.check_completion(&crypto, transfer_id, &AES_KEY, expected_meta_mac));
}
