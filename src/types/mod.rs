// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! Core data model (spec §3): nodes, users, shares, pending contact
//! requests, authrings, and transfers.

pub mod authring;
pub mod node;
pub mod pcr;
pub mod share;
pub mod transfer;
pub mod user;

pub use authring::{AuthMethod, Authring, KeyKind};
pub use node::{Node, NodeAttrs, NodeKeyState, NodeType};
pub use pcr::{PcrDirection, PendingContactRequest};
pub use share::{InboundShare, OutboundShare, Share};
pub use transfer::{Direction, Transfer, TransferSlot, TransferState};
pub use user::{User, Visibility};
