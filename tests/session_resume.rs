// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! Persisting a transfer and rebuilding it after a restart (spec §8
//! seed scenario 6, narrowed to the transfer cache half: the state
//! cache's node/scsn resumption is exercised by [`vault_core::events`]
//! and [`vault_core::graph`] directly).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use vault_core::crypto::provider::DefaultCrypto;
use vault_core::persistence::{derive_cache_key, encode_record, Namespace, TransferRecordType};
use vault_core::persistence::{decode_record, pack_row_id};
use vault_core::transfer::PersistedTransfer;
use vault_core::types::node::Fingerprint;
use vault_core::types::transfer::{ChunkMacEntry, Direction, Transfer, TransferState};
use vault_core::Result;

#[derive(Debug, Default)]
struct MemoryKv {
    rows: Mutex<HashMap<(u8, u64), Vec<u8>>>,
}

fn ns_tag(ns: Namespace) -> u8 {
    match ns {
        Namespace::State => 0,
        Namespace::Transfer => 1,
    }
}

#[async_trait]
impl vault_core::persistence::KvStore for MemoryKv {
    async fn put(&self, ns: Namespace, key: u64, value: Vec<u8>) -> Result<()> {
        self.rows.lock().unwrap().insert((ns_tag(ns), key), value);
        Ok(())
    }

    async fn get(&self, ns: Namespace, key: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.rows.lock().unwrap().get(&(ns_tag(ns), key)).cloned())
    }

    async fn delete(&self, ns: Namespace, key: u64) -> Result<()> {
        self.rows.lock().unwrap().remove(&(ns_tag(ns), key));
        Ok(())
    }

    async fn scan(&self, ns: Namespace) -> Result<Vec<(u64, Vec<u8>)>> {
        let tag = ns_tag(ns);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| *t == tag)
            .map(|((_, k), v)| (*k, v.clone()))
            .collect())
    }

    async fn commit(&self, _ns: Namespace) -> Result<()> {
        Ok(())
    }
}

fn sample_transfer() -> Transfer {
    let mut chunk_macs = std::collections::BTreeMap::new();
    chunk_macs.insert(0u64, ChunkMacEntry { mac: [1; 16], finished: true });
    chunk_macs.insert(131_072u64, ChunkMacEntry { mac: [2; 16], finished: true });
    Transfer {
        id: 42,
        direction: Direction::Download,
        fingerprint: Fingerprint { sample_crc: 0x1234, mtime: 1_700_000_000 },
        size: 500_000,
        temp_urls: vec!["https://g.example/temp-url".into()],
        temp_urls_issued_at: Some(std::time::Instant::now()),
        chunk_macs,
        contiguous_position: 262_144,
        state: TransferState::Active,
        upload_token: None,
        upload_key: None,
        placements: Vec::new(),
        retry_count: 2,
    }
}

#[tokio::test]
async fn a_persisted_transfer_survives_a_round_trip_through_the_kv_store() {
    use vault_core::persistence::KvStore;

    let crypto = DefaultCrypto;
    let cache_key = derive_cache_key(&crypto, &[7u8; 16]);
    let kv = MemoryKv::default();

    let original = sample_transfer();
    let snapshot = PersistedTransfer::from_transfer(&original);
    let row_id = pack_row_id(TransferRecordType::Transfer as u8, original.id);
    let encoded = encode_record(&crypto, &cache_key, &snapshot).expect("encode");
    kv.put(Namespace::Transfer, row_id, encoded).await.unwrap();
    kv.commit(Namespace::Transfer).await.unwrap();

    // Simulate a restart: nothing but the KV store and the session key
    // survive the process boundary.
    let rows = kv.scan(Namespace::Transfer).await.unwrap();
    assert_eq!(rows.len(), 1);
    let (_, blob) = &rows[0];
    let restored_snapshot: PersistedTransfer = decode_record(&crypto, &cache_key, blob).expect("decode");
    let restored = restored_snapshot.into_transfer();

    assert_eq!(restored.id, original.id);
    assert_eq!(restored.fingerprint, original.fingerprint);
    assert_eq!(restored.size, original.size);
    assert_eq!(restored.contiguous_position, original.contiguous_position);
    assert_eq!(restored.chunk_macs.len(), original.chunk_macs.len());

    // Temp URLs are never trusted across a restart; they're
    // re-requested fresh, and in-flight progress resets to Queued so
    // the transfer engine re-admits it cleanly.
    assert!(restored.temp_urls.is_empty());
    assert_eq!(restored.state, TransferState::Queued);
    assert!(restored.placements.is_empty());
}

#[tokio::test]
async fn decoding_with_the_wrong_cache_key_fails() {
    let crypto = DefaultCrypto;
    let write_key = derive_cache_key(&crypto, &[1u8; 16]);
    let read_key = derive_cache_key(&crypto, &[2u8; 16]);

    let snapshot = PersistedTransfer::from_transfer(&sample_transfer());
    let encoded = encode_record(&crypto, &write_key, &snapshot).expect("encode");

    // Decryption under the wrong key succeeds at the block-cipher level
    // (no padding oracle) but yields garbage that bincode's strict
    // layout will not accept.
    let result: Result<PersistedTransfer> = decode_record(&crypto, &read_key, &encoded);
    assert!(result.is_err());
}
