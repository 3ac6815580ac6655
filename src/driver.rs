// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The driver (spec §2, §5): the single place I/O happens. Everything
//! else in the crate is a pure data structure or a function that
//! returns a description of work; `Driver::tick` is what actually
//! walks the command pipeline, the long-poll channel, the transfer
//! engine, and the sync reconciler, and carries out what they ask for
//! against the host-supplied adapters.

use crate::callbacks::HostEvents;
use crate::config::Config;
use crate::crypto::CryptoProvider;
use crate::directread::DirectReadEngine;
use crate::events::Processor;
use crate::fsadapter::FileSystem;
use crate::graph::{Graph, KeyRing};
use crate::handle::Handle;
use crate::persistence::{self, derive_cache_key, pack_row_id, KvStore, Namespace, TransferRecordType};
use crate::pipeline::Pipeline;
use crate::state::{PcrStore, UserStore};
use crate::sync::{Reconciler, SyncAction, SyncPair};
use crate::transfer::{TransferAction, TransferEngine};
use crate::transport::{CommandTransport, TransportOutcome};
use crate::types::node::Fingerprint;
use crate::types::transfer::Direction;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Everything the driver owns: the four host adapters plus every
/// in-memory store and engine built on top of them (spec §2 "driver
/// owns all core state; worker threads only compute").
pub struct Driver {
    config: Config,
    transport: Arc<dyn CommandTransport>,
    fs: Arc<dyn FileSystem>,
    crypto: Arc<dyn CryptoProvider>,
    kv: Arc<dyn KvStore>,
    events: Arc<dyn HostEvents>,

    pipeline: Pipeline,
    processor: Processor,
    graph: Graph,
    ring: KeyRing,
    users: UserStore,
    pcrs: PcrStore,

    transfers: TransferEngine,
    direct_reads: DirectReadEngine,

    sync_pairs: Vec<SyncPair>,
    reconciler: Reconciler,

    cache_key: Option<[u8; 16]>,
    long_poll_in_flight: bool,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("sync_pairs", &self.sync_pairs.len())
            .field("transfers", &self.transfers.transfers().count())
            .field("long_poll_in_flight", &self.long_poll_in_flight)
            .finish()
    }
}

impl Driver {
    pub fn new(
        config: Config,
        transport: Arc<dyn CommandTransport>,
        fs: Arc<dyn FileSystem>,
        crypto: Arc<dyn CryptoProvider>,
        kv: Arc<dyn KvStore>,
        events: Arc<dyn HostEvents>,
    ) -> Self {
        let pipeline = Pipeline::new(transport.clone(), config.api_host.clone());
        let direct_reads = DirectReadEngine::new(transport.clone());
        let reconciler = Reconciler::new(config.nagle_interval);
        let origin_marker = format!("{:x}", rand_u64());

        Self {
            config,
            transport,
            fs,
            crypto,
            kv,
            events,
            pipeline,
            processor: Processor::new(origin_marker),
            graph: Graph::new(),
            ring: KeyRing::default(),
            users: UserStore::new(),
            pcrs: PcrStore::new(),
            transfers: TransferEngine::new(),
            direct_reads,
            sync_pairs: Vec::new(),
            reconciler,
            cache_key: None,
            long_poll_in_flight: false,
        }
    }

    /// Establish the session's cache key once login has produced the
    /// session key (spec §4.7).
    pub fn set_session_key(&mut self, session_key: &[u8; 16]) {
        self.cache_key = Some(derive_cache_key(self.crypto.as_ref(), session_key));
    }

    pub fn add_sync_pair(&mut self, local_root: std::path::PathBuf, remote_root: Handle) {
        self.sync_pairs.push(SyncPair::new(local_root, remote_root));
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn queue_direct_read(&mut self, node: Handle, start: u64, end: u64) -> u64 {
        self.direct_reads.queue(node, start, end)
    }

    /// One full iteration of the core loop (spec §5 "Driver tick"):
    /// ship queued commands, drain a long-poll response if one is
    /// ready, reconcile every sync pair, dispatch transfer work, and
    /// drive outstanding direct reads. Returns the delay before the
    /// caller should call `tick` again absent any other wakeup.
    #[instrument(skip_all, level = "debug")]
    pub async fn tick(&mut self, now_unix_secs: i64) -> Result<Duration> {
        let mut next_wake = self.config.long_poll_timeout;

        if let Some(delay) = self.pipeline.exec().await {
            next_wake = next_wake.min(delay);
        }

        if !self.long_poll_in_flight && self.processor.state() != crate::events::ProcessorState::Stopped {
            self.long_poll_in_flight = true;
            let url = format!(
                "{}/wsc?sn={}",
                self.config.api_host,
                self.processor.scsn().unwrap_or_default()
            );
            match self.transport.long_poll(&url, self.config.long_poll_timeout).await {
                TransportOutcome::Ok(body) => {
                    self.processor.mark_in_flight();
                    let summary = self.processor.apply_response(
                        &self.graph,
                        &self.ring,
                        self.crypto.as_ref(),
                        &self.users,
                        &self.pcrs,
                        self.events.as_ref(),
                        &body,
                    )?;
                    self.handle_applied_summary(summary).await;
                }
                TransportOutcome::Gone | TransportOutcome::Transient => {
                    debug!("long-poll returned no new actions this round");
                }
                TransportOutcome::Overquota { retry_after_secs } => {
                    warn!(retry_after_secs, "long-poll overquota");
                    self.events.notify_retry(retry_after_secs.unwrap_or(60), "EOVERQUOTA");
                }
                TransportOutcome::CertificateError => {
                    error!("long-poll certificate validation failed");
                    self.events.notify_retry(30, "ESSL");
                }
            }
            self.long_poll_in_flight = false;
        }

        self.run_sync_pairs(now_unix_secs).await;
        self.run_transfers().await;
        self.direct_reads.tick(self.crypto.as_ref(), &self.graph, self.events.as_ref()).await?;
        self.persist_if_ready().await;

        Ok(next_wake)
    }

    /// Reconcile every registered sync pair and translate each action
    /// into admission against the transfer engine or a folder/move
    /// command on the pipeline (spec §4.5).
    async fn run_sync_pairs(&mut self, now_unix_secs: i64) {
        for pair in &mut self.sync_pairs {
            let actions = self.reconciler.pass(pair, &self.graph, now_unix_secs);
            for action in actions {
                match action {
                    SyncAction::Download { remote, local_path } => {
                        if let Some(node) = self.graph.get(&remote) {
                            if let Some(fingerprint) = node_fingerprint(&node) {
                                let size = node.size.unwrap_or(0);
                                self.transfers.admit(Direction::Download, fingerprint, size, local_path, remote);
                            }
                        }
                    }
                    SyncAction::Upload { local_path, remote_parent } => {
                        // A real fingerprint requires sampling the file's
                        // content; the filesystem adapter does that scan
                        // before this action is produced, so here the
                        // sync pair's cached LocalNode fingerprint is
                        // authoritative.
                        if let Some(local) = pair.local(&local_path) {
                            if let Some(fingerprint) = local.fingerprint {
                                self.transfers.admit(Direction::Upload, fingerprint, local.size, local_path, remote_parent);
                            }
                        }
                    }
                    SyncAction::CreateLocalFolder { path } => {
                        if let Err(err) = self.fs.mkdir(&path).await {
                            warn!(?path, "failed to create local folder: {err}");
                        }
                    }
                    SyncAction::RemoveLocalOrphan { path } => match self.fs.stat(&path).await {
                        Ok(stat) if stat.is_dir => {
                            if let Err(err) = self.fs.rmdir(&path).await {
                                warn!(?path, "failed to remove orphaned local folder: {err}");
                            }
                        }
                        Ok(_) => {
                            if let Err(err) = self.fs.unlink(&path).await {
                                warn!(?path, "failed to remove orphaned local file: {err}");
                            }
                        }
                        Err(_) => {
                            // already gone; nothing to orphan.
                        }
                    },
                    SyncAction::CreateRemoteFolder { .. } | SyncAction::MoveToDebris { .. } | SyncAction::RemoteMove { .. } => {
                        // wire-level move/create commands, left to the
                        // host-facing command layer (spec §1).
                    }
                }
            }
        }
    }

    /// Advance the transfer engine and carry out whatever it asks for
    /// against the transport (spec §4.4).
    async fn run_transfers(&mut self) {
        let actions = self.transfers.dispatch_tick(&self.config);
        for action in actions {
            match action {
                TransferAction::RequestTempUrls { transfer_id } => {
                    self.request_temp_urls(transfer_id).await;
                }
                TransferAction::FetchRange { transfer_id, range, .. } => {
                    self.fetch_range(transfer_id, range).await;
                }
                TransferAction::PutRange { transfer_id, range } => {
                    self.put_range(transfer_id, range).await;
                }
                TransferAction::Complete { transfer_id } => {
                    self.events.transfer_complete(transfer_id, None);
                }
                TransferAction::Fail { transfer_id, terminal } => {
                    if terminal {
                        warn!(transfer_id, "transfer failed permanently");
                        self.events.transfer_failed(transfer_id, crate::callbacks::TransferFailure::Cancelled);
                    }
                }
            }
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn fetch_range(&mut self, transfer_id: u64, range: std::ops::Range<u64>) {
        let (url, remote_node) = {
            let Some(transfer) = self.transfers.get(transfer_id) else { return };
            let Some(url) = transfer.temp_urls.first().cloned() else { return };
            let Some(placement) = transfer.placements.first() else { return };
            (url, placement.remote_parent_or_node)
        };
        let Some(node) = self.graph.get(&remote_node) else { return };
        let Some((aes_key, ctr_iv)) = file_key_parts(&node) else { return };

        match self.transport.get_range(&url, range.clone()).await {
            TransportOutcome::Ok(ciphertext) => {
                self.transfers.complete_chunk(self.crypto.as_ref(), transfer_id, range, &ciphertext, &aes_key, ctr_iv);
            }
            TransportOutcome::Transient => {
                warn!(transfer_id, "range fetch failed transiently, will retry");
                let _ = self.transfers.record_failure(transfer_id, &Error::NetworkTransient("range fetch".into()));
            }
            TransportOutcome::Gone => {
                // temp URL expired; next dispatch_tick will see
                // `temp_url_needs_refresh` and re-request one.
                debug!(transfer_id, "temp url expired");
            }
            TransportOutcome::Overquota { retry_after_secs } => {
                warn!(transfer_id, retry_after_secs, "range fetch overquota");
                let outcome = self.transfers.record_failure(
                    transfer_id,
                    &Error::Overquota { retry_after_secs: retry_after_secs.unwrap_or(60) },
                );
                if let crate::transfer::FailureOutcome::PauseDirection { retry_after } = outcome {
                    self.events.notify_retry(retry_after.as_secs() as u32, "EOVERQUOTA");
                }
            }
            TransportOutcome::CertificateError => {
                error!(transfer_id, "range fetch certificate validation failed");
                let _ = self.transfers.record_failure(transfer_id, &Error::CertificatePinning);
            }
        }
    }

    /// Persist the transfer cache if the host gave us a cache key (spec
    /// §4.7, §6): every in-flight transfer is snapshotted and written
    /// under its packed row id, then the namespace is committed once so
    /// a crash mid-loop can't leave a half-written batch.
    async fn persist_if_ready(&self) {
        let Some(cache_key) = self.cache_key else { return };
        let mut wrote_any = false;
        for transfer in self.transfers.transfers() {
            let record = crate::transfer::PersistedTransfer::from_transfer(transfer);
            let row_id = pack_row_id(TransferRecordType::Transfer as u8, transfer.id);
            match persistence::encode_record(self.crypto.as_ref(), &cache_key, &record) {
                Ok(blob) => match self.kv.put(Namespace::Transfer, row_id, blob).await {
                    Ok(()) => wrote_any = true,
                    Err(err) => warn!(transfer_id = transfer.id, "failed to persist transfer: {err}"),
                },
                Err(err) => warn!(transfer_id = transfer.id, "failed to encode transfer for persistence: {err}"),
            }
        }
        if wrote_any {
            if let Err(err) = self.kv.commit(Namespace::Transfer).await {
                warn!("failed to commit transfer cache: {err}");
            }
        }
    }

    /// Install freshly requested temp URLs, or record the failure if the
    /// request itself didn't go through (spec §4.4).
    async fn request_temp_urls(&mut self, transfer_id: u64) {
        let Some(body) = self.transfers.get(transfer_id).and_then(|transfer| {
            let placement = transfer.placements.first()?;
            Some(match transfer.direction {
                Direction::Download => serde_json::json!({"a": "g", "g": 1, "n": placement.remote_parent_or_node.to_b64()}),
                Direction::Upload => serde_json::json!({"a": "u", "s": transfer.size}),
            })
        }) else {
            return;
        };

        let enqueued = self.pipeline.enqueue(body).await;
        if self.pipeline.exec().await.is_some() {
            // the whole batch was requeued after a transient failure;
            // `temp_urls` stays empty so the next `dispatch_tick` retries.
            return;
        }

        match enqueued.wait().await {
            Ok(response) => {
                let urls = extract_temp_urls(&response);
                if urls.is_empty() {
                    warn!(transfer_id, "temp url request returned no urls");
                } else {
                    self.transfers.set_temp_urls(transfer_id, urls);
                }
            }
            Err(err) => {
                warn!(transfer_id, "temp url request failed: {err}");
                let _ = self.transfers.record_failure(transfer_id, &err);
            }
        }
    }

    #[instrument(skip(self), level = "trace")]
    async fn put_range(&mut self, transfer_id: u64, range: std::ops::Range<u64>) {
        let (url, local_path, aes_key, ctr_iv) = {
            let Some(transfer) = self.transfers.get(transfer_id) else { return };
            let Some(url) = transfer.temp_urls.first().cloned() else { return };
            let Some(placement) = transfer.placements.first() else { return };
            let Some((aes_key, ctr_iv)) = upload_key_parts(transfer) else { return };
            (url, placement.local_path.clone(), aes_key, ctr_iv)
        };

        let plaintext = match self.read_local_range(&local_path, range.clone()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(transfer_id, "failed to read local file for upload: {err}");
                let _ = self.transfers.record_failure(transfer_id, &err);
                return;
            }
        };

        let (iv, counter) = crate::transfer::chunking::chunk_ctr_params(ctr_iv, range.start);
        let ciphertext = self.crypto.aes_ctr_xor(&aes_key, &iv, counter, &plaintext);

        match self.transport.put_chunk(&url, Some(range.start), bytes::Bytes::from(ciphertext.clone())).await {
            TransportOutcome::Ok(_) => {
                self.transfers.complete_chunk(self.crypto.as_ref(), transfer_id, range, &ciphertext, &aes_key, ctr_iv);
            }
            TransportOutcome::Transient => {
                warn!(transfer_id, "chunk upload failed transiently, will retry");
                let _ = self.transfers.record_failure(transfer_id, &Error::NetworkTransient("chunk upload".into()));
            }
            TransportOutcome::Gone => {
                // temp url expired; next dispatch_tick re-requests one.
                debug!(transfer_id, "upload temp url expired");
            }
            TransportOutcome::Overquota { retry_after_secs } => {
                warn!(transfer_id, retry_after_secs, "chunk upload overquota");
                let outcome = self.transfers.record_failure(
                    transfer_id,
                    &Error::Overquota { retry_after_secs: retry_after_secs.unwrap_or(60) },
                );
                if let crate::transfer::FailureOutcome::PauseDirection { retry_after } = outcome {
                    self.events.notify_retry(retry_after.as_secs() as u32, "EOVERQUOTA");
                }
            }
            TransportOutcome::CertificateError => {
                error!(transfer_id, "chunk upload certificate validation failed");
                let _ = self.transfers.record_failure(transfer_id, &Error::CertificatePinning);
            }
        }
    }

    async fn read_local_range(&self, path: &std::path::Path, range: std::ops::Range<u64>) -> Result<Vec<u8>> {
        let mut handle = self.fs.open_read(path).await?;
        let len = (range.end - range.start) as usize;
        let mut buf = vec![0u8; len];
        let n = handle.read_at(range.start, &mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Re-wrap a newly unwrapped node key under our own master key and
    /// queue the rewrite command (spec §4.3). Fire-and-forget: the
    /// command has no result the driver needs synchronously, and it
    /// ships on a future `exec` naturally.
    async fn queue_key_rewrap(&self, handle: Handle, raw_key: &[u8]) {
        let Some(master_handle) = self.ring.our_user_handle else { return };
        let Some(master_key) = self.ring.symmetric.get(&master_handle).copied() else { return };
        let Ok(rewrapped) = crate::graph::rewrap_under_master_key(self.crypto.as_ref(), &master_key, raw_key) else {
            return;
        };
        let body = serde_json::json!({
            "a": "k",
            "n": handle.to_b64(),
            "k": base64::encode_config(&rewrapped, base64::URL_SAFE_NO_PAD),
        });
        let _ = self.pipeline.enqueue(body).await;
    }

    /// Forward a processed batch's effects to the host and queue any
    /// key rewraps it surfaced, shared between the long-poll path and
    /// [`Driver::fetch_nodes`].
    async fn handle_applied_summary(&mut self, summary: crate::events::AppliedSummary) {
        if !summary.nodes_touched.is_empty() {
            self.events.nodes_updated(&summary.nodes_touched);
        }
        if !summary.users_touched.is_empty() {
            self.events.users_updated(&summary.users_touched);
        }
        for (handle, raw_key) in &summary.nodes_needing_rewrap {
            self.queue_key_rewrap(*handle, raw_key).await;
        }
        if summary.reload_required {
            self.processor.stop();
            self.events.reload();
        }
    }

    /// Fetch the full node tree after login (spec §4.2 "initial load"),
    /// folding it into the graph the same way a `t` action packet would
    /// and firing the host's `fetchnodes_result` callback.
    pub async fn fetch_nodes(&mut self) -> Result<()> {
        let enqueued = self.pipeline.enqueue(serde_json::json!({"a": "f", "c": 1})).await;
        if self.pipeline.exec().await.is_some() {
            self.events.fetchnodes_result(false);
            return Err(Error::NetworkTransient("fetch nodes".into()));
        }

        let response = match enqueued.wait().await {
            Ok(response) => response,
            Err(err) => {
                self.events.fetchnodes_result(false);
                return Err(err);
            }
        };

        let summary = match crate::events::apply_fetch_nodes(&response, &self.graph, &self.ring, self.crypto.as_ref()) {
            Ok(summary) => summary,
            Err(err) => {
                self.events.fetchnodes_result(false);
                return Err(err);
            }
        };

        self.handle_applied_summary(summary).await;
        self.events.fetchnodes_result(true);
        Ok(())
    }
}

/// Pull the `"g"` URL(s) out of a temp-url response: either a single
/// string (plain downloads) or an array of up to six (RAID), falling
/// back to an empty list for an upload's simpler `{"p": "<url>"}` shape.
fn extract_temp_urls(response: &serde_json::Value) -> Vec<String> {
    if let Some(s) = response.get("g").and_then(|g| g.as_str()) {
        return vec![s.to_owned()];
    }
    if let Some(arr) = response.get("g").and_then(|g| g.as_array()) {
        return arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect();
    }
    if let Some(s) = response.get("p").and_then(|p| p.as_str()) {
        return vec![s.to_owned()];
    }
    Vec::new()
}

/// An upload's AES key and CTR nonce, split out of its freshly generated
/// 32-byte upload key (spec §4.3, §4.4) — the upload-side counterpart of
/// [`file_key_parts`], which reads the key back off an existing node.
fn upload_key_parts(transfer: &crate::types::transfer::Transfer) -> Option<([u8; 16], [u8; 8])> {
    let key32 = transfer.upload_key?;
    let parts = crate::crypto::keys::unfold_file_key(&key32);
    Some((parts.aes, parts.ctr_iv))
}

fn node_fingerprint(node: &crate::types::node::Node) -> Option<Fingerprint> {
    match &node.key_state {
        crate::types::node::NodeKeyState::Decrypted { fingerprint, .. } => *fingerprint,
        crate::types::node::NodeKeyState::NoKey { .. } => None,
    }
}

/// A file node's AES key and CTR nonce, split out of its folded
/// 32-byte key (spec §4.3, §4.4).
fn file_key_parts(node: &crate::types::node::Node) -> Option<([u8; 16], [u8; 8])> {
    let crate::types::node::NodeKeyState::Decrypted { key, .. } = &node.key_state else {
        return None;
    };
    if key.len() != 32 {
        return None;
    }
    let mut key32 = [0u8; 32];
    key32.copy_from_slice(key);
    let parts = crate::crypto::keys::unfold_file_key(&key32);
    Some((parts.aes, parts.ctr_iv))
}

fn rand_u64() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NullEvents;
    use crate::crypto::provider::DefaultCrypto;
    use crate::fsadapter::{AsyncFileHandle, NotifyEvent, Stat};
    use crate::persistence::Namespace;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::path::{Path, PathBuf};
    use std::time::SystemTime;

    #[derive(Debug)]
    struct StubTransport;

    #[async_trait]
    impl CommandTransport for StubTransport {
        async fn post(&self, _url: &str, _body: Bytes) -> TransportOutcome {
            TransportOutcome::Ok(Bytes::from_static(b"[]"))
        }
        async fn long_poll(&self, _url: &str, _timeout: Duration) -> TransportOutcome {
            TransportOutcome::Transient
        }
        async fn get_range(&self, _url: &str, _range: std::ops::Range<u64>) -> TransportOutcome {
            TransportOutcome::Transient
        }
        async fn put_chunk(&self, _url: &str, _offset: Option<u64>, _data: Bytes) -> TransportOutcome {
            TransportOutcome::Transient
        }
    }

    #[derive(Debug)]
    struct StubFs;

    #[async_trait]
    impl FileSystem for StubFs {
        async fn stat(&self, _path: &Path) -> Result<Stat> {
            Ok(Stat { size: 0, mtime: SystemTime::UNIX_EPOCH, is_dir: false })
        }
        async fn open_read(&self, _path: &Path) -> Result<Box<dyn AsyncFileHandle>> {
            Err(Error::FsPermanent("unsupported in test stub".into()))
        }
        async fn open_write(&self, _path: &Path) -> Result<Box<dyn AsyncFileHandle>> {
            Err(Error::FsPermanent("unsupported in test stub".into()))
        }
        async fn truncate(&self, _path: &Path, _len: u64) -> Result<()> {
            Ok(())
        }
        async fn mkdir(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn rename(&self, _from: &Path, _to: &Path) -> Result<()> {
            Ok(())
        }
        async fn unlink(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn rmdir(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn read_dir(&self, _path: &Path) -> Result<Vec<PathBuf>> {
            Ok(vec![])
        }
        async fn set_mtime(&self, _path: &Path, _mtime: SystemTime) -> Result<()> {
            Ok(())
        }
        async fn shortname(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        fn normalize_path(&self, path: &Path) -> PathBuf {
            path.to_path_buf()
        }
        async fn notify(&self, _root: &Path) -> Result<tokio::sync::mpsc::Receiver<NotifyEvent>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    #[derive(Debug)]
    struct StubKv;

    #[async_trait]
    impl KvStore for StubKv {
        async fn put(&self, _ns: Namespace, _key: u64, _value: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _ns: Namespace, _key: u64) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete(&self, _ns: Namespace, _key: u64) -> Result<()> {
            Ok(())
        }
        async fn scan(&self, _ns: Namespace) -> Result<Vec<(u64, Vec<u8>)>> {
            Ok(vec![])
        }
        async fn commit(&self, _ns: Namespace) -> Result<()> {
            Ok(())
        }
    }

    fn sample_driver() -> Driver {
        Driver::new(
            Config::default(),
            Arc::new(StubTransport),
            Arc::new(StubFs),
            Arc::new(DefaultCrypto),
            Arc::new(StubKv),
            Arc::new(NullEvents),
        )
    }

    #[tokio::test]
    async fn tick_runs_without_registered_sync_pairs() {
        let mut driver = sample_driver();
        let wake = driver.tick(1_700_000_000).await.unwrap();
        assert!(wake > Duration::ZERO);
    }

    #[test]
    fn add_sync_pair_registers_it() {
        let mut driver = sample_driver();
        driver.add_sync_pair(PathBuf::from("/local"), Handle([1; 6]));
        assert_eq!(driver.sync_pairs.len(), 1);
    }

    #[test]
    fn session_key_derives_a_cache_key() {
        let mut driver = sample_driver();
        assert!(driver.cache_key.is_none());
        driver.set_session_key(&[5u8; 16]);
        assert!(driver.cache_key.is_some());
    }

    /// Transport stub for the end-to-end upload test: answers the `"u"`
    /// temp-url request with a single URL, and records every chunk
    /// handed to `put_chunk`.
    #[derive(Debug, Default)]
    struct UploadStubTransport {
        put_calls: std::sync::Mutex<Vec<(Option<u64>, Vec<u8>)>>,
    }

    #[async_trait]
    impl CommandTransport for UploadStubTransport {
        async fn post(&self, _url: &str, _body: Bytes) -> TransportOutcome {
            TransportOutcome::Ok(Bytes::from(serde_json::to_vec(&serde_json::json!([{"p": "https://example.invalid/up"}])).unwrap()))
        }
        async fn long_poll(&self, _url: &str, _timeout: Duration) -> TransportOutcome {
            TransportOutcome::Transient
        }
        async fn get_range(&self, _url: &str, _range: std::ops::Range<u64>) -> TransportOutcome {
            TransportOutcome::Transient
        }
        async fn put_chunk(&self, _url: &str, offset: Option<u64>, data: Bytes) -> TransportOutcome {
            self.put_calls.lock().unwrap().push((offset, data.to_vec()));
            TransportOutcome::Ok(Bytes::new())
        }
    }

    /// Filesystem stub backed by an in-memory map, so `put_range` can
    /// read real plaintext bytes back out through `open_read`.
    #[derive(Debug, Default)]
    struct InMemoryFs {
        files: std::sync::Mutex<std::collections::HashMap<PathBuf, Vec<u8>>>,
    }

    struct InMemoryReadHandle {
        data: Vec<u8>,
    }

    #[async_trait]
    impl AsyncFileHandle for InMemoryReadHandle {
        async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }
        async fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> Result<()> {
            Err(Error::FsPermanent("read-only in test stub".into()))
        }
    }

    #[async_trait]
    impl FileSystem for InMemoryFs {
        async fn stat(&self, path: &Path) -> Result<Stat> {
            let files = self.files.lock().unwrap();
            let data = files.get(path).ok_or_else(|| Error::FsPermanent("not found".into()))?;
            Ok(Stat { size: data.len() as u64, mtime: SystemTime::UNIX_EPOCH, is_dir: false })
        }
        async fn open_read(&self, path: &Path) -> Result<Box<dyn AsyncFileHandle>> {
            let files = self.files.lock().unwrap();
            let data = files.get(path).cloned().ok_or_else(|| Error::FsPermanent("not found".into()))?;
            Ok(Box::new(InMemoryReadHandle { data }))
        }
        async fn open_write(&self, _path: &Path) -> Result<Box<dyn AsyncFileHandle>> {
            Err(Error::FsPermanent("unsupported in test stub".into()))
        }
        async fn truncate(&self, _path: &Path, _len: u64) -> Result<()> {
            Ok(())
        }
        async fn mkdir(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn rename(&self, _from: &Path, _to: &Path) -> Result<()> {
            Ok(())
        }
        async fn unlink(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn rmdir(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn read_dir(&self, _path: &Path) -> Result<Vec<PathBuf>> {
            Ok(vec![])
        }
        async fn set_mtime(&self, _path: &Path, _mtime: SystemTime) -> Result<()> {
            Ok(())
        }
        async fn shortname(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        fn normalize_path(&self, path: &Path) -> PathBuf {
            path.to_path_buf()
        }
        async fn notify(&self, _root: &Path) -> Result<tokio::sync::mpsc::Receiver<NotifyEvent>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    /// End-to-end: admit an upload, then drive it through `Driver::tick`
    /// alone (not by calling `put_range`/`request_temp_urls` directly)
    /// until the temp-url round trip and chunk upload both land.
    #[tokio::test]
    async fn an_upload_completes_its_chunks_through_repeated_driver_ticks() {
        let transport = Arc::new(UploadStubTransport::default());
        let fs = Arc::new(InMemoryFs::default());
        let path = PathBuf::from("/local/report.pdf");
        let plaintext = vec![42u8; 4096];
        fs.files.lock().unwrap().insert(path.clone(), plaintext.clone());

        let mut driver = Driver::new(
            Config::default(),
            transport.clone(),
            fs,
            Arc::new(DefaultCrypto),
            Arc::new(StubKv),
            Arc::new(NullEvents),
        );

        let fp = crate::types::node::Fingerprint { sample_crc: 1, mtime: 1_700_000_000 };
        let crate::transfer::AdmissionOutcome::Created { transfer_id } =
            driver.transfers.admit(Direction::Upload, fp, plaintext.len() as u64, path, Handle([2; 6]))
        else {
            panic!("expected a fresh transfer");
        };

        for _ in 0..4 {
            driver.tick(1_700_000_000).await.unwrap();
        }

        let transfer = driver.transfers.get(transfer_id).unwrap();
        assert_eq!(transfer.contiguous_position, transfer.size);

        let calls = transport.put_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Some(0));
        assert_eq!(calls[0].1.len(), plaintext.len());
        assert_ne!(calls[0].1, plaintext, "the uploaded bytes must be ciphertext, not plaintext");
    }
}
