// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

use crate::handle::Handle;
use crate::types::node::Fingerprint;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransferState {
    Queued,
    Active,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

/// A target placement for a transfer: where a completed upload's node
/// should be created, or where a completed download should be written
/// (spec §3: "attached *files* ... multiple placements share one
/// transfer when fingerprints match").
#[derive(Clone, Debug)]
pub struct Placement {
    pub id: u64,
    pub local_path: PathBuf,
    /// Destination parent for uploads; source node for downloads.
    pub remote_parent_or_node: Handle,
}

/// One chunk's MAC state (spec §4.4, §6 "Chunk MAC table").
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkMacEntry {
    pub mac: [u8; 16],
    pub finished: bool,
}

/// A resumable, possibly multi-placement transfer (spec §3).
#[derive(Debug)]
pub struct Transfer {
    pub id: u64,
    pub direction: Direction,
    pub fingerprint: Fingerprint,
    pub size: u64,
    /// 1 URL for plain transfers, 6 for RAID downloads.
    pub temp_urls: Vec<String>,
    pub temp_urls_issued_at: Option<Instant>,
    /// Keyed by chunk start offset.
    pub chunk_macs: BTreeMap<u64, ChunkMacEntry>,
    /// Byte position up to which MACs are contiguous from offset 0.
    pub contiguous_position: u64,
    pub state: TransferState,
    /// Post-upload receipt token, present once the last chunk completes.
    pub upload_token: Option<Vec<u8>>,
    /// Fresh 32-byte file key generated at admission for an upload;
    /// unused for downloads, which take their key from the existing
    /// node instead. Folds into AES key + CTR IV + meta-MAC key the
    /// same way a downloaded node's key does (spec §4.3, §4.4).
    pub upload_key: Option<[u8; 32]>,
    pub placements: Vec<Placement>,
    pub retry_count: u32,
}

impl Transfer {
    /// A transfer with no remaining placements is torn down (spec §5,
    /// "Cancellation: ... when the last placement is removed, the
    /// transfer is torn down").
    pub fn is_orphaned(&self) -> bool {
        self.placements.is_empty()
    }
}

/// Runtime binding of a [`Transfer`] to 1-6 HTTP connections and a set
/// of in-flight chunk byte ranges (spec §3).
#[derive(Debug)]
pub struct TransferSlot {
    pub transfer_id: u64,
    pub in_flight_ranges: Vec<Range<u64>>,
    pub connection_failures: Vec<u32>,
}

impl TransferSlot {
    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight_ranges.iter().map(|r| r.end - r.start).sum()
    }
}
