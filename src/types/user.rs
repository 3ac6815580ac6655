// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

use crate::handle::Handle;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A user's visibility to this account (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Visibility {
    Unknown,
    Hidden,
    Visible,
    Inactive,
    Blocked,
}

/// A versioned cached user-attribute value.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub version: String,
    pub value: Vec<u8>,
}

/// A remote user (spec §3). The email/handle mapping is bijective among
/// active users, enforced by [`crate::state::UserStore`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub handle: Handle,
    /// Lowercased on insert.
    pub email: String,
    pub visibility: Visibility,
    pub rsa_public_key_der: Option<Vec<u8>>,
    pub ed25519_public_key: Option<[u8; 32]>,
    pub x25519_public_key: Option<[u8; 32]>,
    pub attributes: BTreeMap<String, AttributeEntry>,
    /// Node handles this user shares to us.
    pub shares_to_us: BTreeSet<Handle>,
}

impl User {
    pub fn new(handle: Handle, email: impl Into<String>) -> Self {
        Self {
            handle,
            email: email.into().to_lowercase(),
            visibility: Visibility::Unknown,
            rsa_public_key_der: None,
            ed25519_public_key: None,
            x25519_public_key: None,
            attributes: BTreeMap::new(),
            shares_to_us: BTreeSet::new(),
        }
    }
}
