// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

use serde::{Deserialize, Serialize};

/// Which side of the request we are.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PcrDirection {
    Outgoing,
    Incoming,
}

/// A pending contact request (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingContactRequest {
    pub id: String,
    pub originator_email: String,
    pub target_email: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub reminded_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub message: Option<String>,
    pub direction: PcrDirection,
}
