// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The 48-bit opaque node/user handle, base64url-encoded on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 6-byte binary handle identifying a node, user, or public-link
/// target. Renders as 8 base64url characters, matching the wire
/// convention named in spec §6.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub [u8; 6]);

impl Handle {
    /// The all-zero handle, used as a sentinel for "no parent" on roots.
    pub const NONE: Handle = Handle([0u8; 6]);

    /// Decode from the 8-character base64url wire form.
    pub fn from_b64(s: &str) -> Option<Self> {
        let bytes = base64::decode_config(s, base64::URL_SAFE_NO_PAD).ok()?;
        if bytes.len() != 6 {
            return None;
        }
        let mut buf = [0u8; 6];
        buf.copy_from_slice(&bytes);
        Some(Handle(buf))
    }

    /// Encode to the 8-character base64url wire form.
    pub fn to_b64(self) -> String {
        base64::encode_config(self.0, base64::URL_SAFE_NO_PAD)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.to_b64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_base64() {
        let h = Handle([1, 2, 3, 4, 5, 6]);
        let encoded = h.to_b64();
        assert_eq!(encoded.len(), 8);
        assert_eq!(Handle::from_b64(&encoded), Some(h));
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(Handle::from_b64("AAAA"), None);
    }
}
