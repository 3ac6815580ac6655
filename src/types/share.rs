// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

use crate::handle::Handle;
use serde::{Deserialize, Serialize};

/// Access level granted by a share, ordered from least to most capable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
    Full,
}

/// We are the recipient of this share.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundShare {
    pub owner: Handle,
    pub access: AccessLevel,
    pub share_key: [u8; 16],
}

/// One peer's access entry on an outbound share, or a placeholder for a
/// pending contact who has not yet accepted (spec §3: "A pending
/// outbound share can be upgraded in place to a full share").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OutboundShare {
    Pending {
        pending_contact_request_id: String,
        access: AccessLevel,
    },
    Accepted {
        peer: Handle,
        access: AccessLevel,
    },
}

impl OutboundShare {
    /// Upgrade a pending placeholder to a full share once the peer
    /// accepts the contact request.
    pub fn accept(&mut self, peer: Handle) {
        if let OutboundShare::Pending { access, .. } = self {
            *self = OutboundShare::Accepted { peer, access: *access };
        }
    }
}

/// A share attached to a folder node: either inbound (we are the
/// recipient) or outbound (we granted it).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Share {
    Inbound(InboundShare),
    Outbound(OutboundShare),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_outbound_share_upgrades_in_place() {
        let mut share = OutboundShare::Pending {
            pending_contact_request_id: "pcr-1".into(),
            access: AccessLevel::ReadOnly,
        };
        share.accept(Handle([1, 2, 3, 4, 5, 6]));
        assert!(matches!(share, OutboundShare::Accepted { access: AccessLevel::ReadOnly, .. }));
    }
}
