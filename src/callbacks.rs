// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The host-notification boundary (spec §6, Design Note 2).
//!
//! Rather than a listener-of-listeners hierarchy the engine calls a
//! single [`HostEvents`] capability with default no-op methods; a host
//! implements only the callbacks it cares about.

use crate::handle::Handle;
use crate::types::transfer::{Direction, TransferState};
use bytes::Bytes;

/// Why a transfer stopped making progress (passed to
/// [`HostEvents::transfer_failed`]).
#[derive(Clone, Debug)]
pub enum TransferFailure {
    Network(String),
    Overquota { retry_after_secs: u32 },
    Paywall,
    LocalIo(String),
    Cancelled,
}

/// Host notification surface. Every method is a no-op by default so a
/// host only overrides what it needs (spec §6, Design Note 2: "a
/// capability trait with default no-op methods rather than a
/// listener-of-listeners hierarchy").
pub trait HostEvents: Send + Sync {
    /// A command batch round trip completed or failed (spec §4.1).
    fn request_response_progress(&self, _completed: usize, _total: usize) {}

    fn transfer_added(&self, _id: u64, _direction: Direction) {}
    fn transfer_update(&self, _id: u64, _state: TransferState, _bytes_done: u64, _bytes_total: u64) {}
    fn transfer_complete(&self, _id: u64, _node: Option<Handle>) {}
    fn transfer_removed(&self, _id: u64) {}
    fn transfer_failed(&self, _id: u64, _failure: TransferFailure) {}

    /// Nodes were added, updated, or removed by an action packet or
    /// command response (spec §4.2, tags `t`/`u`/`d`).
    fn nodes_updated(&self, _handles: &[Handle]) {}
    fn users_updated(&self, _handles: &[Handle]) {}
    fn pcrs_updated(&self, _ids: &[Handle]) {}

    /// Cloud storage usage changed (tag `u` on the account quota, or a
    /// dedicated `storagesum` action packet).
    fn storagesum_changed(&self, _used_bytes: u64, _total_bytes: u64) {}

    /// The server pushed an out-of-band notification unrelated to our
    /// own action (tag `ua` from another client, `psts`/`pses` billing
    /// events, etc).
    fn notify_storage(&self) {}
    fn notify_retry(&self, _in_seconds: u32, _reason: &'static str) {}

    fn account_updated(&self) {}
    fn login_result(&self, _success: bool) {}
    fn fetchnodes_result(&self, _success: bool) {}
    fn logout_result(&self) {}

    /// Our own key material changed from another session (tag `k`):
    /// the caller should stop trusting cached unwraps and reload.
    fn key_modified(&self) {}
    /// The server demanded a full reload (`-3`/`ESID` loss of sync).
    fn reload(&self) {}

    /// A local sync reconciler pass finished (spec §4.5).
    fn sync_state_changed(&self, _root: Handle, _local_nodes: usize, _pending: usize) {}
    fn sync_stall(&self, _root: Handle, _reason: &'static str) {}

    /// A chunk of a streaming direct read is ready for delivery
    /// (spec §4.6); the engine does not buffer read data for the host.
    fn direct_read_data(&self, _read_id: u64, _offset: u64, _data: Bytes) {}
    fn direct_read_failed(&self, _read_id: u64, _failure: TransferFailure) {}
}

/// A [`HostEvents`] that does nothing, for headless use or tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEvents;

impl HostEvents for NullEvents {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_events_accepts_every_callback_without_panicking() {
        let events = NullEvents;
        events.request_response_progress(1, 2);
        events.transfer_added(1, Direction::Upload);
        events.transfer_update(1, TransferState::Active, 0, 0);
        events.transfer_complete(1, None);
        events.transfer_removed(1);
        events.transfer_failed(1, TransferFailure::Cancelled);
        events.nodes_updated(&[]);
        events.users_updated(&[]);
        events.pcrs_updated(&[]);
        events.storagesum_changed(0, 0);
        events.notify_storage();
        events.notify_retry(5, "EAGAIN");
        events.account_updated();
        events.login_result(true);
        events.fetchnodes_result(true);
        events.logout_result();
        events.key_modified();
        events.reload();
        events.sync_state_changed(Handle::NONE, 0, 0);
        events.sync_stall(Handle::NONE, "scan failure");
        events.direct_read_data(1, 0, Bytes::new());
        events.direct_read_failed(1, TransferFailure::Cancelled);
    }
}
