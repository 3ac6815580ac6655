// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! Two placements of the same local content into different remote
//! folders share exactly one transfer (spec §8 seed scenario 1).

use std::path::PathBuf;
use vault_core::handle::Handle;
use vault_core::transfer::{AdmissionOutcome, TransferEngine};
use vault_core::types::node::Fingerprint;
use vault_core::types::transfer::Direction;

#[test]
fn two_placements_with_the_same_fingerprint_attach_to_one_transfer() {
    let mut engine = TransferEngine::new();
    let fp = Fingerprint { sample_crc: 0xdead_beef, mtime: 1_700_000_000 };

    let first = engine.admit(
        Direction::Upload,
        fp,
        4096,
        PathBuf::from("/home/user/photos/trip.jpg"),
        Handle([1; 6]),
    );
    let second = engine.admit(
        Direction::Upload,
        fp,
        4096,
        PathBuf::from("/home/user/backup/trip.jpg"),
        Handle([2; 6]),
    );

    let (AdmissionOutcome::Created { transfer_id: id1 }, AdmissionOutcome::Attached { transfer_id: id2 }) =
        (first, second)
    else {
        panic!("expected the first admission to create a transfer and the second to attach to it");
    };
    assert_eq!(id1, id2);

    let transfer = engine.get(id1).expect("transfer must exist");
    assert_eq!(transfer.placements.len(), 2);
    assert_eq!(transfer.fingerprint, fp);
}

#[test]
fn a_different_fingerprint_gets_its_own_transfer() {
    let mut engine = TransferEngine::new();
    let fp_a = Fingerprint { sample_crc: 1, mtime: 10 };
    let fp_b = Fingerprint { sample_crc: 2, mtime: 20 };

    let AdmissionOutcome::Created { transfer_id: id_a } =
        engine.admit(Direction::Upload, fp_a, 10, PathBuf::from("/a"), Handle([1; 6]))
    else {
        panic!("expected a fresh transfer");
    };
    let AdmissionOutcome::Created { transfer_id: id_b } =
        engine.admit(Direction::Upload, fp_b, 10, PathBuf::from("/b"), Handle([1; 6]))
    else {
        panic!("expected a fresh transfer");
    };

    assert_ne!(id_a, id_b);
}
