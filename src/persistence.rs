// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C9: the persistence adapter. Two namespaced local KV stores (spec
//! §4.7, §6): a state cache (nodes/users/pending contacts/shares/scsn)
//! and a transfer cache (resumable transfer/file records). All values
//! are AES-CBC-encrypted under a cache key derived from the session;
//! the KV store itself is an external collaborator (spec §1) reached
//! only through [`KvStore`].

use crate::crypto::keys::ZERO_IV;
use crate::crypto::CryptoProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Record type, encoded in the low 4 bits of a state-cache row id
/// (spec §6 "Persisted state layout").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum StateRecordType {
    Scsn = 1,
    Node = 2,
    User = 3,
    PendingContact = 4,
    Chat = 5,
}

/// Record type for the transfer cache.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum TransferRecordType {
    Transfer = 1,
    File = 2,
}

/// Pack a row id: type in the low 4 bits, the rest is a type-local id.
pub fn pack_row_id(record_type: u8, local_id: u64) -> u64 {
    (local_id << 4) | (record_type as u64 & 0x0F)
}

/// Unpack a row id back into `(record_type, local_id)`.
pub fn unpack_row_id(row_id: u64) -> (u8, u64) {
    ((row_id & 0x0F) as u8, row_id >> 4)
}

/// The two namespaces a [`KvStore`] implementation must keep separate,
/// e.g. as two column families or two files.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Namespace {
    State,
    Transfer,
}

/// The local key-value cache adapter the host provides (spec §1, §6).
/// Keys and values here are already the encrypted bytes this module
/// produces; the adapter does no cryptography of its own.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, ns: Namespace, key: u64, value: Vec<u8>) -> Result<()>;
    async fn get(&self, ns: Namespace, key: u64) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, ns: Namespace, key: u64) -> Result<()>;
    async fn scan(&self, ns: Namespace) -> Result<Vec<(u64, Vec<u8>)>>;
    /// Commit everything written since the last commit. The engine calls
    /// this at action-packet-batch boundaries (spec §4.7); a commit
    /// deferred because a command is mid-flight is coalesced with the
    /// next boundary by the caller, not by the store.
    async fn commit(&self, ns: Namespace) -> Result<()>;
}

/// Derive the AES cache key from the session (spec §6: "The cache key is
/// AES-ECB derivable from the session"). `session_key` is the 16-byte
/// symmetric session key established at login.
pub fn derive_cache_key(crypto: &dyn CryptoProvider, session_key: &[u8; 16]) -> [u8; 16] {
    // AES-ECB-encrypt a fixed label under the session key: a standard
    // KDF-from-block-cipher construction, cheap and reproducible without
    // needing a dedicated hash-based KDF for a single derived key.
    let label = *b"vault-cache-key\0";
    let out = crypto
        .aes_ecb_encrypt(session_key, &label)
        .expect("16-byte input is already block-aligned");
    let mut key = [0u8; 16];
    key.copy_from_slice(&out[..16]);
    key
}

/// Serialize `value`, encrypt it under `cache_key`, and ready it for
/// [`KvStore::put`].
pub fn encode_record<T: Serialize>(crypto: &dyn CryptoProvider, cache_key: &[u8; 16], value: &T) -> Result<Vec<u8>> {
    let plaintext = bincode::serialize(value).map_err(|e| Error::Protocol(format!("serialize: {e}")))?;
    let padded = crate::crypto::keys::pad_to_16(&plaintext);
    crypto.aes_cbc_encrypt(cache_key, &ZERO_IV, &padded)
}

/// Inverse of [`encode_record`]. The plaintext was zero-padded to a
/// block multiple; bincode's length-prefixed encoding means trailing
/// zero padding bytes are simply ignored by the deserializer.
pub fn decode_record<T: DeserializeOwned>(crypto: &dyn CryptoProvider, cache_key: &[u8; 16], blob: &[u8]) -> Result<T> {
    let plaintext = crypto.aes_cbc_decrypt(cache_key, &ZERO_IV, blob)?;
    bincode::deserialize(&plaintext).map_err(|e| Error::PersistenceVersion(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::DefaultCrypto;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn row_id_packs_and_unpacks() {
        let id = pack_row_id(StateRecordType::Node as u8, 12345);
        assert_eq!(unpack_row_id(id), (StateRecordType::Node as u8, 12345));
    }

    #[test]
    fn record_roundtrips_through_encryption() {
        let crypto = DefaultCrypto;
        let cache_key = derive_cache_key(&crypto, &[1u8; 16]);
        let value = Sample { a: 7, b: "hello".into() };
        let encoded = encode_record(&crypto, &cache_key, &value).unwrap();
        let decoded: Sample = decode_record(&crypto, &cache_key, &encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
