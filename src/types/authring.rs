// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

use crate::handle::Handle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The key type an authring tracks (spec §3, glossary "authring").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum KeyKind {
    Signing,
    EncryptionPublic,
    RsaPublic,
}

/// How we came to trust a peer's key fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum AuthMethod {
    Seen,
    FingerprintVerified,
    SignatureVerified,
}

/// One authring: a mapping `user handle -> (key fingerprint, auth method)`
/// for a single [`KeyKind`] (spec §3).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Authring {
    entries: BTreeMap<Handle, ([u8; 20], AuthMethod)>,
}

impl Authring {
    pub fn record(&mut self, user: Handle, fingerprint: [u8; 20], method: AuthMethod) {
        match self.entries.get(&user) {
            // never downgrade an existing trust level for the same key
            Some((existing_fp, existing_method)) if existing_fp == &fingerprint && *existing_method >= method => {}
            _ => {
                self.entries.insert(user, (fingerprint, method));
            }
        }
    }

    pub fn get(&self, user: &Handle) -> Option<&([u8; 20], AuthMethod)> {
        self.entries.get(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_downgrades_trust_for_the_same_key() {
        let user = Handle([1, 2, 3, 4, 5, 6]);
        let fp = [9u8; 20];
        let mut ring = Authring::default();
        ring.record(user, fp, AuthMethod::SignatureVerified);
        ring.record(user, fp, AuthMethod::Seen);
        assert_eq!(ring.get(&user).unwrap().1, AuthMethod::SignatureVerified);
    }

    #[test]
    fn replaces_entry_when_the_fingerprint_changes() {
        let user = Handle([1, 2, 3, 4, 5, 6]);
        let mut ring = Authring::default();
        ring.record(user, [1u8; 20], AuthMethod::SignatureVerified);
        ring.record(user, [2u8; 20], AuthMethod::Seen);
        assert_eq!(ring.get(&user).unwrap().0, [2u8; 20]);
    }
}
