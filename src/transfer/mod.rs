// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C6: the transfer engine (spec §4.4). Owns every [`Transfer`] and its
//! runtime [`TransferSlot`]s; decides admission, chunk scheduling, and
//! completion, but never touches the network or filesystem itself —
//! those stay behind [`crate::transport::CommandTransport`] and
//! [`crate::fsadapter::FileSystem`], driven by the caller (spec §2:
//! "worker threads only execute pure functions ... and return results
//! via a queue").

pub mod chunking;
pub mod raid;

use crate::config::Config;
use crate::crypto::CryptoProvider;
use crate::handle::Handle;
use crate::types::node::Fingerprint;
use crate::types::transfer::{ChunkMacEntry, Direction, Placement, Transfer, TransferSlot, TransferState};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use std::time::{Duration, Instant};

/// What the driver should do next for a transfer; the engine only ever
/// proposes these, it never performs I/O.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferAction {
    RequestTempUrls { transfer_id: u64 },
    FetchRange { transfer_id: u64, stripe: usize, range: Range<u64> },
    PutRange { transfer_id: u64, range: Range<u64> },
    Complete { transfer_id: u64 },
    Fail { transfer_id: u64, terminal: bool },
}

/// A file's very-big-file state per direction (spec §4.4: "Large files
/// ... limit further big-file admissions in the same direction").
#[derive(Debug, Default)]
struct DirectionState {
    active_count: usize,
    very_big_in_flight: bool,
    bytes_per_sec: f64,
}

/// Owns admission, scheduling, and completion tracking for every
/// transfer in both directions.
#[derive(Debug)]
pub struct TransferEngine {
    transfers: HashMap<u64, Transfer>,
    slots: HashMap<u64, TransferSlot>,
    /// In-flight transfers indexed by fingerprint, for admission-time
    /// dedup (spec §4.4 "Admission").
    by_fingerprint: HashMap<Fingerprint, u64>,
    directions: HashMap<Direction, DirectionState>,
    next_id: u64,
    next_placement_id: u64,
}

/// Outcome of offering a new placement for admission.
#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Joined an existing in-flight transfer with the same fingerprint.
    Attached { transfer_id: u64 },
    /// A new transfer was created and queued.
    Created { transfer_id: u64 },
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferEngine {
    pub fn new() -> Self {
        Self {
            transfers: HashMap::new(),
            slots: HashMap::new(),
            by_fingerprint: HashMap::new(),
            directions: HashMap::new(),
            next_id: 1,
            next_placement_id: 1,
        }
    }

    /// Offer a new placement for admission (spec §4.4 "Admission"): if
    /// an in-flight transfer already shares this fingerprint, the
    /// placement is appended to it and shares its on-wire work;
    /// otherwise a fresh, queued transfer is created.
    pub fn admit(&mut self, direction: Direction, fingerprint: Fingerprint, size: u64, local_path: std::path::PathBuf, remote_parent_or_node: Handle) -> AdmissionOutcome {
        let placement_id = self.next_placement_id;
        self.next_placement_id += 1;
        let placement = Placement {
            id: placement_id,
            local_path,
            remote_parent_or_node,
        };

        if let Some(&transfer_id) = self.by_fingerprint.get(&fingerprint) {
            if let Some(transfer) = self.transfers.get_mut(&transfer_id) {
                transfer.placements.push(placement);
                return AdmissionOutcome::Attached { transfer_id };
            }
        }

        let transfer_id = self.next_id;
        self.next_id += 1;
        let upload_key = match direction {
            Direction::Upload => Some(rand::random()),
            Direction::Download => None,
        };
        self.transfers.insert(
            transfer_id,
            Transfer {
                id: transfer_id,
                direction,
                fingerprint,
                size,
                temp_urls: Vec::new(),
                temp_urls_issued_at: None,
                chunk_macs: Default::default(),
                contiguous_position: 0,
                state: TransferState::Queued,
                upload_token: None,
                upload_key,
                placements: vec![placement],
                retry_count: 0,
            },
        );
        self.by_fingerprint.insert(fingerprint, transfer_id);
        AdmissionOutcome::Created { transfer_id }
    }

    pub fn get(&self, id: u64) -> Option<&Transfer> {
        self.transfers.get(&id)
    }

    /// Install freshly requested temp URLs and stamp the issue time, so
    /// `schedule_one`'s `temp_url_needs_refresh` check stops firing
    /// until they age out (spec §4.4).
    pub fn set_temp_urls(&mut self, id: u64, urls: Vec<String>) {
        let Some(transfer) = self.transfers.get_mut(&id) else { return };
        transfer.temp_urls = urls;
        transfer.temp_urls_issued_at = Some(Instant::now());
    }

    /// Drop a placement; when a transfer's last placement is removed it
    /// is torn down entirely (spec §5 "Cancellation").
    pub fn remove_placement(&mut self, transfer_id: u64, placement_id: u64) {
        let Some(transfer) = self.transfers.get_mut(&transfer_id) else { return };
        transfer.placements.retain(|p| p.id != placement_id);
        if transfer.is_orphaned() {
            self.by_fingerprint.remove(&transfer.fingerprint);
            self.transfers.remove(&transfer_id);
            self.slots.remove(&transfer_id);
        }
    }

    /// Promote queued transfers to active up to the admission limits,
    /// and emit scheduling actions for everything already active (spec
    /// §4.4 "Slot dispatch"). Call once per driver tick.
    pub fn dispatch_tick(&mut self, cfg: &Config) -> Vec<TransferAction> {
        let mut actions = Vec::new();
        self.promote_queued(cfg);

        let ids: Vec<u64> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.state == TransferState::Active)
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            actions.extend(self.schedule_one(id, cfg));
        }
        actions
    }

    fn promote_queued(&mut self, cfg: &Config) {
        let total_active = self.transfers.values().filter(|t| t.state == TransferState::Active).count();
        if total_active >= cfg.max_total_transfers {
            return;
        }

        let mut queued_ids: Vec<u64> = self
            .transfers
            .iter()
            .filter(|(_, t)| t.state == TransferState::Queued)
            .map(|(id, _)| *id)
            .collect();
        queued_ids.sort_unstable();

        let mut total_active = total_active;
        for id in queued_ids {
            if total_active >= cfg.max_total_transfers {
                break;
            }
            let Some(transfer) = self.transfers.get(&id) else { continue };
            let direction = transfer.direction;
            let dir_active = self.transfers.values().filter(|t| t.direction == direction && t.state == TransferState::Active).count();
            if dir_active >= cfg.max_dir_transfers {
                continue;
            }

            let is_very_big = is_very_big_file(transfer.size, cfg);
            let dir_state = self.directions.entry(direction).or_default();
            if is_very_big && dir_state.very_big_in_flight {
                // a very-big transfer is already in flight in this
                // direction; small files keep filling the pipeline but
                // another very-big one waits (spec §4.4 "Admission").
                continue;
            }

            if let Some(transfer) = self.transfers.get_mut(&id) {
                transfer.state = TransferState::Active;
                self.slots.insert(
                    id,
                    TransferSlot {
                        transfer_id: id,
                        in_flight_ranges: Vec::new(),
                        connection_failures: vec![0; connection_count(direction, cfg)],
                    },
                );
                total_active += 1;
                if is_very_big {
                    self.directions.entry(direction).or_default().very_big_in_flight = true;
                }
            }
        }
    }

    fn schedule_one(&mut self, id: u64, cfg: &Config) -> Vec<TransferAction> {
        let mut actions = Vec::new();
        let Some(transfer) = self.transfers.get(&id) else { return actions };

        if transfer.temp_urls.is_empty() || temp_url_needs_refresh(transfer, cfg) {
            actions.push(TransferAction::RequestTempUrls { transfer_id: id });
            return actions;
        }

        let window = {
            let speed = self.directions.get(&transfer.direction).map(|d| d.bytes_per_sec).unwrap_or(0.0);
            outstanding_bytes_window(speed, cfg)
        };

        let Some(slot) = self.slots.get(&id) else { return actions };
        if slot.in_flight_bytes() >= window {
            return actions;
        }

        let ranges = chunking::chunk_ranges(transfer.size);
        let mut budget = window.saturating_sub(slot.in_flight_bytes());

        for range in ranges {
            if range.start < transfer.contiguous_position {
                continue;
            }
            if self.slots.get(&id).map(|s| s.in_flight_ranges.contains(&range)).unwrap_or(false) {
                continue;
            }
            if transfer.chunk_macs.get(&range.start).map(|e| e.finished).unwrap_or(false) {
                continue;
            }
            let len = range.end - range.start;
            if len > budget && budget > 0 {
                break;
            }
            budget = budget.saturating_sub(len);

            if let Some(slot) = self.slots.get_mut(&id) {
                slot.in_flight_ranges.push(range.clone());
            }
            match transfer.direction {
                Direction::Download => actions.push(TransferAction::FetchRange {
                    transfer_id: id,
                    stripe: 0,
                    range,
                }),
                Direction::Upload => actions.push(TransferAction::PutRange { transfer_id: id, range }),
            }
            if budget == 0 {
                break;
            }
        }

        actions
    }

    /// Record a completed chunk's MAC and advance the contiguous
    /// position (spec §4.4 "Chunking"). `ciphertext` is the chunk's raw
    /// wire bytes; `aes_key`/`ctr_iv` come from the node's unfolded file
    /// key.
    pub fn complete_chunk(&mut self, crypto: &dyn CryptoProvider, transfer_id: u64, range: Range<u64>, ciphertext: &[u8], aes_key: &[u8; 16], ctr_iv: [u8; 8]) {
        let Some(transfer) = self.transfers.get_mut(&transfer_id) else { return };
        let mac = chunking::chunk_mac(crypto, aes_key, ctr_iv, ciphertext);
        transfer.chunk_macs.insert(range.start, ChunkMacEntry { mac, finished: true });

        if let Some(slot) = self.slots.get_mut(&transfer_id) {
            slot.in_flight_ranges.retain(|r| *r != range);
        }

        advance_contiguous_position(transfer);
    }

    /// True once every chunk is accounted for and the folded meta-MAC
    /// matches the value embedded in the node key (spec §4.4: "complete
    /// only when the computed meta-MAC equals the meta-MAC embedded in
    /// the node key").
    pub fn check_completion(&self, crypto: &dyn CryptoProvider, transfer_id: u64, aes_key: &[u8; 16], expected_meta_mac: [u8; 8]) -> bool {
        let Some(transfer) = self.transfers.get(&transfer_id) else { return false };
        if transfer.contiguous_position != transfer.size {
            return false;
        }
        let macs: Vec<[u8; 16]> = transfer.chunk_macs.values().map(|e| e.mac).collect();
        chunking::meta_mac(crypto, aes_key, &macs) == expected_meta_mac
    }

    /// Record a per-transfer failure (spec §4.4 "Failure model"):
    /// transient errors retry with capped backoff; permanent errors
    /// terminate the transfer; `EOVERQUOTA` pauses the whole direction.
    pub fn record_failure(&mut self, transfer_id: u64, err: &Error) -> FailureOutcome {
        if let Error::Overquota { retry_after_secs } = err {
            if let Some(transfer) = self.transfers.get(&transfer_id) {
                let direction = transfer.direction;
                self.directions.entry(direction).or_default();
            }
            return FailureOutcome::PauseDirection {
                retry_after: Duration::from_secs(u64::from(*retry_after_secs)),
            };
        }

        let Some(transfer) = self.transfers.get_mut(&transfer_id) else {
            return FailureOutcome::Terminal;
        };

        if err.is_transient() {
            transfer.retry_count += 1;
            transfer.state = TransferState::Retrying;
            let delay = Duration::from_secs(1 << transfer.retry_count.min(6));
            debug!(transfer_id, retry_count = transfer.retry_count, "transfer retrying after transient error");
            FailureOutcome::Retry(delay)
        } else {
            warn!(transfer_id, "transfer failed permanently: {err}");
            transfer.state = TransferState::Failed;
            FailureOutcome::Terminal
        }
    }

    pub fn update_speed(&mut self, direction: Direction, bytes_per_sec: f64) {
        self.directions.entry(direction).or_default().bytes_per_sec = bytes_per_sec;
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum FailureOutcome {
    Retry(Duration),
    Terminal,
    PauseDirection { retry_after: Duration },
}

fn connection_count(direction: Direction, cfg: &Config) -> usize {
    match direction {
        Direction::Download => cfg.download_connections,
        Direction::Upload => cfg.upload_connections,
    }
}

fn is_very_big_file(size: u64, cfg: &Config) -> bool {
    size > cfg.very_big_file_threshold
}

/// Clamp `30 * current_speed` to `[2 MiB, 100 MiB]` (spec §4.4 "Slot
/// dispatch").
fn outstanding_bytes_window(bytes_per_sec: f64, cfg: &Config) -> u64 {
    let raw = (bytes_per_sec * cfg.outstanding_bytes_speed_multiplier as f64) as u64;
    raw.clamp(cfg.outstanding_bytes_min, cfg.outstanding_bytes_max)
}

fn temp_url_needs_refresh(transfer: &Transfer, cfg: &Config) -> bool {
    match transfer.temp_urls_issued_at {
        Some(issued) => issued.elapsed() >= cfg.temp_url_max_age,
        None => true,
    }
}

fn advance_contiguous_position(transfer: &mut Transfer) {
    let mut pos = transfer.contiguous_position;
    loop {
        match transfer.chunk_macs.get(&pos) {
            Some(entry) if entry.finished => {
                let next = transfer
                    .chunk_macs
                    .range((std::ops::Bound::Excluded(pos), std::ops::Bound::Unbounded))
                    .next()
                    .map(|(&k, _)| k)
                    .unwrap_or(transfer.size);
                pos = next;
            }
            _ => break,
        }
    }
    transfer.contiguous_position = pos;
}

/// Serializable snapshot of a [`Transfer`] for the persistence adapter
/// (spec §4.4 "Resumption", §4.7): `Transfer` itself holds an `Instant`,
/// which cannot be serialized, so the snapshot stores an age in seconds
/// from when it was written instead.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PersistedTransfer {
    pub id: u64,
    pub direction_is_upload: bool,
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub temp_urls: Vec<String>,
    pub chunk_macs: Vec<(u64, [u8; 16])>,
    pub contiguous_position: u64,
    pub upload_token: Option<Vec<u8>>,
    pub upload_key: Option<[u8; 32]>,
    pub retry_count: u32,
}

impl PersistedTransfer {
    pub fn from_transfer(transfer: &Transfer) -> Self {
        Self {
            id: transfer.id,
            direction_is_upload: transfer.direction == Direction::Upload,
            fingerprint: transfer.fingerprint,
            size: transfer.size,
            temp_urls: transfer.temp_urls.clone(),
            chunk_macs: transfer.chunk_macs.iter().map(|(&k, v)| (k, v.mac)).collect(),
            contiguous_position: transfer.contiguous_position,
            upload_token: transfer.upload_token.clone(),
            upload_key: transfer.upload_key,
            retry_count: transfer.retry_count,
        }
    }

    /// Rebuild a queued [`Transfer`] from a cached record, discarding
    /// the temp URLs (they are re-requested fresh rather than trusted
    /// across a restart). `upload_key` is kept: an upload's already-MAC'd
    /// chunks were computed under it, so generating a fresh one on resume
    /// would invalidate every MAC recorded so far.
    pub fn into_transfer(self) -> Transfer {
        Transfer {
            id: self.id,
            direction: if self.direction_is_upload { Direction::Upload } else { Direction::Download },
            fingerprint: self.fingerprint,
            size: self.size,
            temp_urls: Vec::new(),
            temp_urls_issued_at: None,
            chunk_macs: self
                .chunk_macs
                .into_iter()
                .map(|(offset, mac)| (offset, ChunkMacEntry { mac, finished: true }))
                .collect(),
            contiguous_position: self.contiguous_position,
            state: TransferState::Queued,
            upload_token: self.upload_token,
            upload_key: self.upload_key,
            placements: Vec::new(),
            retry_count: self.retry_count,
        }
    }
}

/// A resumable upload is discarded rather than resumed when the local
/// file's current fingerprint no longer matches the cached one (spec
/// §4.4: "if the local file's fingerprint no longer matches, the temp
/// URL and upload token are discarded and a fresh upload begins").
pub fn upload_resumable(cached_fingerprint: Fingerprint, current_fingerprint: Fingerprint) -> bool {
    cached_fingerprint == current_fingerprint
}

/// Cached transfers older than this are purged rather than resumed
/// (spec §4.4 "Resumption").
pub fn is_cache_expired(written_at: Instant, cfg: &Config) -> bool {
    written_at.elapsed() >= cfg.transfer_cache_retention
}
