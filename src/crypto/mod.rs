// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The cryptographic primitives boundary (spec §6, "Crypto adapter").
//!
//! The core never embeds a choice of crypto backend; every primitive it
//! needs is called through [`CryptoProvider`]. [`provider::DefaultCrypto`]
//! is a concrete implementation built from the RustCrypto family of
//! crates, shipped so the crate works out of the box, but swappable.

pub mod keys;
pub mod provider;
pub mod xxtea;

use crate::Result;

/// RSA key size this crate assumes throughout (RSA-2048 PKCS#1 v1.5).
pub const RSA_KEY_BITS: usize = 2048;

/// Every cryptographic primitive the core needs from the host's crypto
/// library (spec §6). A symmetric key is always exactly 16 bytes; an
/// IV, when required, is passed alongside.
pub trait CryptoProvider: Send + Sync + std::fmt::Debug {
    /// AES-128 ECB encrypt, one or more 16-byte blocks.
    fn aes_ecb_encrypt(&self, key: &[u8; 16], blocks: &[u8]) -> Result<Vec<u8>>;
    /// AES-128 ECB decrypt, one or more 16-byte blocks.
    fn aes_ecb_decrypt(&self, key: &[u8; 16], blocks: &[u8]) -> Result<Vec<u8>>;
    /// AES-128 CBC encrypt with the given IV (zero-padded plaintext is
    /// the caller's responsibility, matching the attribute-blob format).
    fn aes_cbc_encrypt(&self, key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>>;
    /// AES-128 CBC decrypt with the given IV.
    fn aes_cbc_decrypt(&self, key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>>;
    /// AES-128 CTR keystream XOR, used for chunk ciphertext.
    fn aes_ctr_xor(&self, key: &[u8; 16], iv: &[u8; 16], counter: u64, data: &[u8]) -> Vec<u8>;
    /// AES-CBC-MAC over one or more ciphertext blocks, returning the
    /// final 16-byte chaining value (the MAC is the caller's fold of
    /// this over multiple calls).
    fn aes_cbc_mac(&self, key: &[u8; 16], iv: &[u8; 16], blocks: &[u8]) -> [u8; 16];

    /// RSA-2048 PKCS#1 v1.5 decrypt, used to unwrap asymmetrically
    /// wrapped node/share keys.
    fn rsa_decrypt(&self, private_key_der: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// SHA-256 digest.
    fn sha256(&self, data: &[u8]) -> [u8; 32];
    /// SHA-512 digest.
    fn sha512(&self, data: &[u8]) -> [u8; 64];
    /// HMAC-SHA-256.
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32];
    /// HMAC-SHA-512.
    fn hmac_sha512(&self, key: &[u8], data: &[u8]) -> [u8; 64];
    /// PBKDF2-HMAC-SHA-512, `dklen` output bytes.
    fn pbkdf2_hmac_sha512(&self, password: &[u8], salt: &[u8], iterations: u32, dklen: usize) -> Vec<u8>;

    /// Ed25519 sign.
    fn ed25519_sign(&self, signing_key: &[u8; 32], message: &[u8]) -> [u8; 64];
    /// Ed25519 verify.
    fn ed25519_verify(&self, public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool;
    /// X25519 Diffie-Hellman.
    fn x25519_dh(&self, our_private: &[u8; 32], their_public: &[u8; 32]) -> [u8; 32];

    /// XXTEA block cipher encrypt over `u32` words, `endian_conv`
    /// controlling the historical big-endian key/data swap (spec §6).
    fn xxtea_encrypt(&self, words: &mut [u32], key: &[u32; 4], endian_conv: bool);
    /// XXTEA block cipher decrypt.
    fn xxtea_decrypt(&self, words: &mut [u32], key: &[u32; 4], endian_conv: bool);
}
