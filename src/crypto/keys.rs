// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! Node key folding and attribute-blob encryption (spec §3, §4.3, §6).

use super::CryptoProvider;
use crate::{Error, Result};

/// Magic prefix every decrypted attribute blob must start with.
pub const ATTR_MAGIC: &str = "MEGA{";

/// Zero IV used for the attribute blob, matching spec §6 ("AES-CBC with
/// IV=0").
pub const ZERO_IV: [u8; 16] = [0u8; 16];

/// The three fields folded into a 32-byte file node key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileKeyParts {
    pub aes: [u8; 16],
    pub ctr_iv: [u8; 8],
    pub meta_mac: [u8; 8],
}

/// Fold `(aes, ctr_iv, meta_mac)` into the 32-byte on-wire file key: the
/// AES key XOR-folded with `ctr_iv || meta_mac`, followed by that same
/// 16-byte nonce/mac pair in the clear (spec §3: "16-byte AES key
/// XOR-folded with 8-byte CTR nonce and 8-byte meta-MAC for files").
pub fn fold_file_key(parts: FileKeyParts) -> [u8; 32] {
    let mut nonce_mac = [0u8; 16];
    nonce_mac[..8].copy_from_slice(&parts.ctr_iv);
    nonce_mac[8..].copy_from_slice(&parts.meta_mac);

    let mut out = [0u8; 32];
    for i in 0..16 {
        out[i] = parts.aes[i] ^ nonce_mac[i];
    }
    out[16..].copy_from_slice(&nonce_mac);
    out
}

/// Inverse of [`fold_file_key`].
pub fn unfold_file_key(key32: &[u8; 32]) -> FileKeyParts {
    let nonce_mac = &key32[16..32];
    let mut aes = [0u8; 16];
    for i in 0..16 {
        aes[i] = key32[i] ^ nonce_mac[i];
    }
    let mut ctr_iv = [0u8; 8];
    ctr_iv.copy_from_slice(&nonce_mac[..8]);
    let mut meta_mac = [0u8; 8];
    meta_mac.copy_from_slice(&nonce_mac[8..]);
    FileKeyParts { aes, ctr_iv, meta_mac }
}

/// Pad `data` to a multiple of 16 bytes with zero bytes, matching the
/// attribute blob's `pad_to_16` wire convention (spec §6).
pub fn pad_to_16(data: &[u8]) -> Vec<u8> {
    let mut v = data.to_vec();
    let rem = v.len() % 16;
    if rem != 0 {
        v.resize(v.len() + (16 - rem), 0);
    }
    v
}

/// Encrypt `json` as a node attribute blob: `AES-CBC(key, pad("MEGA{"+json+"}"))`
/// with a zero IV.
pub fn encrypt_attr_blob(crypto: &dyn CryptoProvider, json: &str, key: &[u8; 16]) -> Result<Vec<u8>> {
    let plaintext = format!("{ATTR_MAGIC}{json}}}");
    let padded = pad_to_16(plaintext.as_bytes());
    crypto.aes_cbc_encrypt(key, &ZERO_IV, &padded)
}

/// Decrypt and validate a node attribute blob, returning the JSON object
/// text (the body between the magic prefix and the final brace). Fails
/// with [`Error::AttrMagicMissing`] when decryption used the wrong key
/// (detected by the absent magic), matching spec's NO_KEY rule.
pub fn decrypt_attr_blob(crypto: &dyn CryptoProvider, blob: &[u8], key: &[u8; 16]) -> Result<String> {
    let plaintext = crypto.aes_cbc_decrypt(key, &ZERO_IV, blob)?;
    let text = String::from_utf8_lossy(&plaintext);
    let Some(rest) = text.strip_prefix(ATTR_MAGIC) else {
        return Err(Error::AttrMagicMissing);
    };
    // the JSON body runs up to the matching closing brace; trailing zero
    // padding bytes are not valid JSON so we trim at the last '}'.
    let end = rest.rfind('}').ok_or(Error::AttrMagicMissing)?;
    Ok(rest[..end].to_string())
}
