// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C10: public-link codec (spec §4.8) — plain links and
//! password-protected links.

use crate::crypto::CryptoProvider;
use crate::handle::Handle;
use crate::{Error, Result};

/// Whether a public link targets a file (32-byte key) or a folder
/// (16-byte key).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkKind {
    File,
    Folder,
}

impl LinkKind {
    fn key_len(self) -> usize {
        match self {
            LinkKind::File => 32,
            LinkKind::Folder => 16,
        }
    }

    fn path_segment(self) -> &'static str {
        match self {
            LinkKind::File => "file",
            LinkKind::Folder => "folder",
        }
    }

    fn byte(self) -> u8 {
        match self {
            LinkKind::File => 0,
            LinkKind::Folder => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(LinkKind::File),
            1 => Some(LinkKind::Folder),
            _ => None,
        }
    }
}

/// A decoded public link: the node it points to, its kind, and the
/// unwrapped symmetric key needed to decrypt that node's subtree.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PublicLink {
    pub handle: Handle,
    pub kind: LinkKind,
    pub key: Vec<u8>,
}

/// Encode a plain public link: `https://<host>/{file|folder}/<ph>#<key>`.
pub fn encode_public_link(host: &str, link: &PublicLink) -> String {
    format!(
        "https://{host}/{}/{}#{}",
        link.kind.path_segment(),
        link.handle.to_b64(),
        base64::encode_config(&link.key, base64::URL_SAFE_NO_PAD),
    )
}

/// Decode a plain public link produced by [`encode_public_link`].
pub fn decode_public_link(url: &str) -> Option<PublicLink> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let (_host, rest) = without_scheme.split_once('/')?;
    let (kind_str, rest) = rest.split_once('/')?;
    let (ph, key_b64) = rest.split_once('#')?;

    let kind = match kind_str {
        "file" => LinkKind::File,
        "folder" => LinkKind::Folder,
        _ => return None,
    };
    let handle = Handle::from_b64(ph)?;
    let key = base64::decode_config(key_b64, base64::URL_SAFE_NO_PAD).ok()?;
    if key.len() != kind.key_len() {
        return None;
    }
    Some(PublicLink { handle, kind, key })
}

/// Historical algorithm id: derived-key halves used correctly (key
/// material from `derivedKey[0..keyLen]`, HMAC key from `derivedKey[32..64]`).
pub const ALG_V1: u8 = 1;
/// Historical algorithm id carrying the webclient's key/data swap bug:
/// HMAC key and key-derivation material are drawn from the opposite
/// halves of `derivedKey` relative to [`ALG_V1`]. Decoding must still
/// support links minted under this id; new links are always [`ALG_V1`].
pub const ALG_V1_SWAPPED: u8 = 2;

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 32;

fn derive(crypto: &dyn CryptoProvider, password: &str, salt: &[u8; SALT_LEN]) -> [u8; 64] {
    let dk = crypto.pbkdf2_hmac_sha512(password.as_bytes(), salt, PBKDF2_ITERATIONS, 64);
    let mut out = [0u8; 64];
    out.copy_from_slice(&dk);
    out
}

/// Encrypt `link` into the password-protected binary layout:
/// `[alg(1) | kind(1) | ph(6) | salt(32) | encKey(16|32) | hmac(32)]`.
/// Always emits [`ALG_V1`].
pub fn encrypt_password_link(crypto: &dyn CryptoProvider, link: &PublicLink, password: &str) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    let random: [u8; SALT_LEN] = rand::random();
    salt.copy_from_slice(&random);

    let derived = derive(crypto, password, &salt);
    let key_len = link.kind.key_len();
    let enc_key: Vec<u8> = derived[..key_len]
        .iter()
        .zip(link.key.iter())
        .map(|(a, b)| a ^ b)
        .collect();

    let mut payload = Vec::with_capacity(1 + 1 + 6 + SALT_LEN + key_len);
    payload.push(ALG_V1);
    payload.push(link.kind.byte());
    payload.extend_from_slice(&link.handle.0);
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&enc_key);

    let hmac = crypto.hmac_sha256(&derived[32..64], &payload);
    payload.extend_from_slice(&hmac);
    payload
}

/// Decrypt a password-protected link. Fails with [`Error::Crypto`] when
/// the HMAC does not match (wrong password or corrupted payload).
pub fn decrypt_password_link(crypto: &dyn CryptoProvider, blob: &[u8], password: &str) -> Result<PublicLink> {
    if blob.len() < 1 + 1 + 6 + SALT_LEN + 32 {
        return Err(Error::Protocol("password link too short".into()));
    }
    let alg = blob[0];
    let kind = LinkKind::from_byte(blob[1]).ok_or_else(|| Error::Protocol("unknown link kind".into()))?;
    let key_len = kind.key_len();

    let expected_len = 1 + 1 + 6 + SALT_LEN + key_len + 32;
    if blob.len() != expected_len {
        return Err(Error::Protocol("password link length mismatch".into()));
    }

    let mut handle = [0u8; 6];
    handle.copy_from_slice(&blob[2..8]);
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&blob[8..8 + SALT_LEN]);
    let enc_key = &blob[8 + SALT_LEN..8 + SALT_LEN + key_len];
    let hmac_offset = 8 + SALT_LEN + key_len;
    let given_hmac = &blob[hmac_offset..hmac_offset + 32];
    let payload = &blob[..hmac_offset];

    let derived = derive(crypto, password, &salt);

    let (key_material, hmac_key): (&[u8], &[u8]) = match alg {
        ALG_V1 => (&derived[..key_len], &derived[32..64]),
        ALG_V1_SWAPPED => (&derived[32..32 + key_len], &derived[..32]),
        _ => return Err(Error::Protocol("unknown link algorithm id".into())),
    };

    let computed_hmac = crypto.hmac_sha256(hmac_key, payload);
    if computed_hmac != given_hmac {
        return Err(Error::Crypto("password link HMAC mismatch".into()));
    }

    let key: Vec<u8> = key_material.iter().zip(enc_key.iter()).map(|(a, b)| a ^ b).collect();

    Ok(PublicLink {
        handle: Handle(handle),
        kind,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::DefaultCrypto;

    fn sample_link(kind: LinkKind) -> PublicLink {
        PublicLink {
            handle: Handle([1, 2, 3, 4, 5, 6]),
            kind,
            key: vec![0x42; kind.key_len()],
        }
    }

    #[test]
    fn plain_link_roundtrips_for_files_and_folders() {
        for kind in [LinkKind::File, LinkKind::Folder] {
            let link = sample_link(kind);
            let url = encode_public_link("example.invalid", &link);
            let decoded = decode_public_link(&url).unwrap();
            assert_eq!(decoded, link);
        }
    }

    #[test]
    fn password_link_roundtrips_with_correct_password() {
        let crypto = DefaultCrypto;
        let link = sample_link(LinkKind::File);
        let blob = encrypt_password_link(&crypto, &link, "correct horse");
        let decoded = decrypt_password_link(&crypto, &blob, "correct horse").unwrap();
        assert_eq!(decoded, link);
    }

    #[test]
    fn password_link_wrong_password_fails_hmac() {
        let crypto = DefaultCrypto;
        let link = sample_link(LinkKind::Folder);
        let blob = encrypt_password_link(&crypto, &link, "correct horse");
        let err = decrypt_password_link(&crypto, &blob, "wrong password").unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }
}
