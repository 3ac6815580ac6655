// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! A concrete [`CryptoProvider`] built from the RustCrypto family of
//! crates. This is the crate's default implementation, not a mandated
//! one: the core only ever calls through the trait (spec §6 names the
//! crypto library as an external collaborator).

use super::{xxtea, CryptoProvider};
use crate::{Error, Result};

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ctr::cipher::{KeyIvInit as CtrKeyIvInit, StreamCipher, StreamCipherSeek};
use ed25519_dalek::{Keypair, PublicKey as EdPublicKey, SecretKey, Signature, Signer, Verifier};
use hmac::{Hmac, Mac};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Default [`CryptoProvider`], stateless aside from its RNG source for
/// primitives that need one (none of the primitives in this trait do —
/// randomness for session/nonce generation lives above this boundary).
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCrypto;

impl CryptoProvider for DefaultCrypto {
    fn aes_ecb_encrypt(&self, key: &[u8; 16], blocks: &[u8]) -> Result<Vec<u8>> {
        if blocks.len() % 16 != 0 {
            return Err(Error::Crypto("ECB input not a multiple of 16 bytes".into()));
        }
        // ECB is CBC with a zero IV re-initialised for every block.
        let mut out = Vec::with_capacity(blocks.len());
        for block in blocks.chunks(16) {
            let enc = Aes128CbcEnc::new(key.into(), &super::keys::ZERO_IV.into());
            out.extend(enc.encrypt_padded_vec_mut::<NoPadding>(block));
        }
        Ok(out)
    }

    fn aes_ecb_decrypt(&self, key: &[u8; 16], blocks: &[u8]) -> Result<Vec<u8>> {
        if blocks.len() % 16 != 0 {
            return Err(Error::Crypto("ECB input not a multiple of 16 bytes".into()));
        }
        let mut out = Vec::with_capacity(blocks.len());
        for block in blocks.chunks(16) {
            let dec = Aes128CbcDec::new(key.into(), &super::keys::ZERO_IV.into());
            out.extend(
                dec.decrypt_padded_vec_mut::<NoPadding>(block)
                    .map_err(|e| Error::Crypto(format!("ECB decrypt: {e}")))?,
            );
        }
        Ok(out)
    }

    fn aes_cbc_encrypt(&self, key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() % 16 != 0 {
            return Err(Error::Crypto("CBC input not a multiple of 16 bytes".into()));
        }
        let enc = Aes128CbcEnc::new(key.into(), iv.into());
        Ok(enc.encrypt_padded_vec_mut::<NoPadding>(data))
    }

    fn aes_cbc_decrypt(&self, key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
        if data.len() % 16 != 0 {
            return Err(Error::Crypto("CBC input not a multiple of 16 bytes".into()));
        }
        let dec = Aes128CbcDec::new(key.into(), iv.into());
        dec.decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(|e| Error::Crypto(format!("CBC decrypt: {e}")))
    }

    fn aes_ctr_xor(&self, key: &[u8; 16], iv: &[u8; 16], counter: u64, data: &[u8]) -> Vec<u8> {
        let mut cipher = Aes128Ctr::new(key.into(), iv.into());
        let _ = cipher.try_seek(counter.saturating_mul(16));
        let mut buf = data.to_vec();
        cipher.apply_keystream(&mut buf);
        buf
    }

    fn aes_cbc_mac(&self, key: &[u8; 16], iv: &[u8; 16], blocks: &[u8]) -> [u8; 16] {
        // the chaining value itself is the MAC; feed through CBC and
        // keep only the final ciphertext block.
        let padded = super::keys::pad_to_16(blocks);
        let enc = Aes128CbcEnc::new(key.into(), iv.into());
        let out = enc.encrypt_padded_vec_mut::<NoPadding>(&padded);
        let mut mac = [0u8; 16];
        let start = out.len() - 16;
        mac.copy_from_slice(&out[start..]);
        mac
    }

    fn rsa_decrypt(&self, private_key_der: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = RsaPrivateKey::from_pkcs1_der(private_key_der)
            .map_err(|e| Error::Crypto(format!("RSA key parse: {e}")))?;
        key.decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| Error::Crypto(format!("RSA decrypt: {e}")))
    }

    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn sha512(&self, data: &[u8]) -> [u8; 64] {
        let mut hasher = Sha512::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn hmac_sha512(&self, key: &[u8], data: &[u8]) -> [u8; 64] {
        let mut mac = HmacSha512::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn pbkdf2_hmac_sha512(&self, password: &[u8], salt: &[u8], iterations: u32, dklen: usize) -> Vec<u8> {
        let mut out = vec![0u8; dklen];
        pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out);
        out
    }

    fn ed25519_sign(&self, signing_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
        let secret = SecretKey::from_bytes(signing_key).expect("32-byte secret key");
        let public = EdPublicKey::from(&secret);
        let keypair = Keypair { secret, public };
        keypair.sign(message).to_bytes()
    }

    fn ed25519_verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(public) = EdPublicKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(sig) = Signature::from_bytes(signature) else {
            return false;
        };
        public.verify(message, &sig).is_ok()
    }

    fn x25519_dh(&self, our_private: &[u8; 32], their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(*our_private);
        let public = XPublicKey::from(*their_public);
        secret.diffie_hellman(&public).to_bytes()
    }

    fn xxtea_encrypt(&self, words: &mut [u32], key: &[u32; 4], endian_conv: bool) {
        xxtea::encrypt(words, key, endian_conv)
    }

    fn xxtea_decrypt(&self, words: &mut [u32], key: &[u32; 4], endian_conv: bool) {
        xxtea::decrypt(words, key, endian_conv)
    }
}
