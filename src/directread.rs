// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C7: the direct-read engine (spec §4.6). Streaming range reads for
//! best-effort media playback: no MAC verification, no chunk-MAC table,
//! no resumption cache. Temp URLs and overquota handling are shared
//! with the transfer engine's model but kept independent here since a
//! direct read never writes to local storage.

use crate::callbacks::{HostEvents, TransferFailure};
use crate::crypto::keys::unfold_file_key;
use crate::crypto::CryptoProvider;
use crate::handle::Handle;
use crate::timer::{Backoff, Deadline};
use crate::transport::{CommandTransport, TransportOutcome};
use crate::types::node::NodeKeyState;
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One outstanding byte range against a single node, decrypted on the
/// fly as data arrives (spec §4.6: "a single DirectReadNode may have
/// many outstanding byte ranges").
#[derive(Debug)]
pub struct DirectRead {
    pub id: u64,
    pub node: Handle,
    pub start: u64,
    pub end: u64,
    position: u64,
    state: ReadState,
    backoff: Backoff,
}

#[derive(Debug)]
enum ReadState {
    NeedsUrl,
    Fetching { url: String, issued_at: Deadline },
    Retrying { at: Deadline },
    Done,
    Failed,
}

impl DirectRead {
    pub fn bytes_remaining(&self) -> u64 {
        self.end.saturating_sub(self.position)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ReadState::Done | ReadState::Failed)
    }
}

/// A node's AES key and CTR nonce, as needed to decrypt a direct read
/// without the full chunk-MAC machinery the transfer engine runs (spec
/// §4.3: file keys fold `aes ‖ ctr_iv ‖ meta_mac`; a direct read only
/// needs the first two).
#[derive(Clone, Copy, Debug)]
struct ReadKey {
    aes: [u8; 16],
    ctr_iv: [u8; 8],
}

fn read_key_for(node: &crate::types::node::Node) -> Result<ReadKey> {
    let NodeKeyState::Decrypted { key, .. } = &node.key_state else {
        return Err(Error::KeyUnwrapFailed(node.handle));
    };
    if key.len() != 32 {
        return Err(Error::KeyUnwrapFailed(node.handle));
    }
    let mut key32 = [0u8; 32];
    key32.copy_from_slice(key);
    let parts = unfold_file_key(&key32);
    Ok(ReadKey {
        aes: parts.aes,
        ctr_iv: parts.ctr_iv,
    })
}

/// Decrypt ciphertext read starting at absolute file offset `offset`
/// under `key` (spec §4.6: "AES-CTR-decrypts on the fly", no MAC).
fn ctr_decrypt(crypto: &dyn CryptoProvider, key: &ReadKey, offset: u64, ciphertext: &[u8]) -> Bytes {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&key.ctr_iv);
    let block_offset = offset / 16;
    let skew = (offset % 16) as usize;

    if skew == 0 {
        return Bytes::from(crypto.aes_ctr_xor(&key.aes, &iv, block_offset, ciphertext));
    }

    // Re-align to the containing block boundary so the keystream phase
    // matches, then trim the leading bytes we didn't actually read.
    let mut aligned = vec![0u8; skew];
    aligned.extend_from_slice(ciphertext);
    let decrypted = crypto.aes_ctr_xor(&key.aes, &iv, block_offset, &aligned);
    Bytes::copy_from_slice(&decrypted[skew..])
}

/// Per-node temp URL, shared by every outstanding range on that node
/// (spec §4.6: "fetches a temporary URL (same admission command as
/// downloads)").
#[derive(Debug, Clone)]
struct NodeUrl {
    url: String,
    issued_at: Instant,
}

/// Drives every outstanding direct read across every node. Holds no
/// decrypted buffers beyond a single in-flight chunk: data is handed to
/// the host via [`HostEvents::direct_read_data`] as soon as it is
/// decrypted.
#[derive(Debug)]
pub struct DirectReadEngine {
    transport: Arc<dyn CommandTransport>,
    reads: HashMap<u64, DirectRead>,
    node_urls: HashMap<Handle, NodeUrl>,
    next_id: u64,
}

const URL_MAX_AGE: Duration = Duration::from_secs(600);
const READ_CHUNK: u64 = 1024 * 1024;

impl DirectReadEngine {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            transport,
            reads: HashMap::new(),
            node_urls: HashMap::new(),
            next_id: 1,
        }
    }

    /// Queue a new range read, returning its id (spec §4.6).
    pub fn queue(&mut self, node: Handle, start: u64, end: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.reads.insert(
            id,
            DirectRead {
                id,
                node,
                start,
                end,
                position: start,
                state: ReadState::NeedsUrl,
                backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(20), 0.2),
            },
        );
        id
    }

    pub fn cancel(&mut self, id: u64) {
        self.reads.remove(&id);
    }

    /// A node's temp URL arrived from an admission command response
    /// (the command pipeline, not this module, issues the request).
    pub fn set_node_url(&mut self, node: Handle, url: String) {
        self.node_urls.insert(
            node,
            NodeUrl {
                url,
                issued_at: Instant::now(),
            },
        );
    }

    /// Nodes whose outstanding reads need a temp URL requested or
    /// refreshed, for the driver to feed into the admission command.
    pub fn nodes_needing_url(&self) -> Vec<Handle> {
        let mut out = Vec::new();
        for read in self.reads.values() {
            if read.is_finished() {
                continue;
            }
            let needs = match self.node_urls.get(&read.node) {
                None => true,
                Some(entry) => url_expired(entry),
            };
            if needs && !out.contains(&read.node) {
                out.push(read.node);
            }
        }
        out
    }

    /// Drive one tick: issue the next chunk fetch for every read that is
    /// ready, and process whatever has completed. The transport is
    /// polled synchronously here for simplicity; the driver calls this
    /// from its own async tick.
    #[instrument(skip_all, level = "debug")]
    pub async fn tick(
        &mut self,
        crypto: &dyn CryptoProvider,
        graph: &crate::graph::Graph,
        events: &dyn HostEvents,
    ) -> Result<()> {
        let ids: Vec<u64> = self.reads.keys().copied().collect();
        for id in ids {
            self.drive_one(id, crypto, graph, events).await;
        }
        self.reads.retain(|_, r| !r.is_finished());
        Ok(())
    }

    async fn drive_one(&mut self, id: u64, crypto: &dyn CryptoProvider, graph: &crate::graph::Graph, events: &dyn HostEvents) {
        let Some(read) = self.reads.get(&id) else { return };
        if read.is_finished() {
            return;
        }
        if read.bytes_remaining() == 0 {
            if let Some(r) = self.reads.get_mut(&id) {
                r.state = ReadState::Done;
            }
            return;
        }
        if let ReadState::Retrying { at } = &read.state {
            if !at.fired() {
                return;
            }
        }

        let Some(node_url) = self.node_urls.get(&read.node).cloned() else {
            return; // waiting on the driver to fetch an admission URL
        };
        if url_expired(&node_url) {
            self.node_urls.remove(&read.node);
            return;
        }

        let Some(node) = graph.get(&read.node) else {
            self.fail(id, events, TransferFailure::Cancelled);
            return;
        };
        let key = match read_key_for(&node) {
            Ok(k) => k,
            Err(_) => {
                self.fail(id, events, TransferFailure::Network("key unavailable".into()));
                return;
            }
        };

        let position = read.position;
        let want = READ_CHUNK.min(read.bytes_remaining());
        let range = position..(position + want);

        match self.transport.get_range(&node_url.url, range).await {
            TransportOutcome::Ok(ciphertext) => {
                let plaintext = ctr_decrypt(crypto, &key, position, &ciphertext);
                events.direct_read_data(id, position, plaintext);
                if let Some(r) = self.reads.get_mut(&id) {
                    r.position += ciphertext.len() as u64;
                    r.backoff.reset();
                    if r.bytes_remaining() == 0 {
                        r.state = ReadState::Done;
                    }
                }
            }
            TransportOutcome::Gone => {
                debug!(read_id = id, "direct read url expired");
                self.node_urls.remove(&read.node);
            }
            TransportOutcome::Overquota { retry_after_secs } => {
                let secs = retry_after_secs.unwrap_or(60);
                warn!(read_id = id, retry_after_secs = secs, "direct read overquota");
                self.fail(id, events, TransferFailure::Overquota { retry_after_secs: secs });
            }
            TransportOutcome::CertificateError => {
                error!(read_id = id, "direct read certificate validation failed");
                self.fail(id, events, TransferFailure::Network("certificate pinning failure".into()));
            }
            TransportOutcome::Transient => {
                if let Some(r) = self.reads.get_mut(&id) {
                    let delay = r.backoff.fail();
                    warn!(read_id = id, delay_ms = delay.as_millis() as u64, "direct read range fetch failed transiently");
                    r.state = ReadState::Retrying { at: Deadline::after(delay) };
                }
            }
        }
    }

    fn fail(&mut self, id: u64, events: &dyn HostEvents, failure: TransferFailure) {
        if let Some(r) = self.reads.get_mut(&id) {
            r.state = ReadState::Failed;
        }
        events.direct_read_failed(id, failure);
    }

    pub fn read(&self, id: u64) -> Option<&DirectRead> {
        self.reads.get(&id)
    }

    pub fn outstanding(&self) -> usize {
        self.reads.len()
    }
}

fn url_expired(entry: &NodeUrl) -> bool {
    entry.issued_at.elapsed() >= URL_MAX_AGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::DefaultCrypto;
    use crate::graph::Graph;
    use crate::types::node::{Node, NodeAttrs, NodeType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct StubTransport {
        chunks: StdMutex<Vec<Vec<u8>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandTransport for StubTransport {
        async fn post(&self, _url: &str, _body: Bytes) -> TransportOutcome {
            TransportOutcome::Transient
        }
        async fn long_poll(&self, _url: &str, _timeout: Duration) -> TransportOutcome {
            TransportOutcome::Transient
        }
        async fn get_range(&self, _url: &str, _range: std::ops::Range<u64>) -> TransportOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut chunks = self.chunks.lock().unwrap();
            if chunks.is_empty() {
                return TransportOutcome::Gone;
            }
            TransportOutcome::Ok(Bytes::from(chunks.remove(0)))
        }
        async fn put_chunk(&self, _url: &str, _offset: Option<u64>, _data: Bytes) -> TransportOutcome {
            TransportOutcome::Transient
        }
    }

    #[derive(Debug, Default)]
    struct RecordingEvents {
        data: StdMutex<Vec<(u64, u64, usize)>>,
    }

    impl HostEvents for RecordingEvents {
        fn direct_read_data(&self, read_id: u64, offset: u64, data: Bytes) {
            self.data.lock().unwrap().push((read_id, offset, data.len()));
        }
    }

    fn sample_file_node(handle: Handle, aes: [u8; 16], ctr_iv: [u8; 8]) -> Node {
        let parts = crate::crypto::keys::FileKeyParts {
            aes,
            ctr_iv,
            meta_mac: [0; 8],
        };
        let key32 = crate::graph::fold_key(parts);
        Node {
            handle,
            parent: Handle([9; 6]),
            node_type: NodeType::File,
            owner: Handle([1; 6]),
            size: Some(16),
            ctime: 0,
            key_state: NodeKeyState::Decrypted {
                key: key32.to_vec(),
                attrs: NodeAttrs {
                    name: "clip.mp4".into(),
                    favourite: false,
                    label: None,
                    fingerprint_attr: None,
                },
                fingerprint: None,
            },
            share_key: None,
            outbound_shares: Default::default(),
            file_attrs: vec![],
        }
    }

    #[tokio::test]
    async fn delivers_decrypted_bytes_and_finishes_at_the_requested_length() {
        let crypto = DefaultCrypto;
        let aes = [7u8; 16];
        let ctr_iv = [1, 2, 3, 4, 5, 6, 7, 8];
        let plaintext = b"hello direct read";
        let ciphertext = crypto.aes_ctr_xor(&aes, &{
            let mut iv = [0u8; 16];
            iv[..8].copy_from_slice(&ctr_iv);
            iv
        }, 0, plaintext);

        let handle = Handle([4; 6]);
        let graph = Graph::new();
        graph.upsert(sample_file_node(handle, aes, ctr_iv));

        let transport = Arc::new(StubTransport {
            chunks: StdMutex::new(vec![ciphertext]),
            calls: AtomicUsize::new(0),
        });
        let mut engine = DirectReadEngine::new(transport);
        let id = engine.queue(handle, 0, plaintext.len() as u64);
        engine.set_node_url(handle, "https://example.invalid/dl".into());

        let events = RecordingEvents::default();
        engine.tick(&crypto, &graph, &events).await.unwrap();

        let recorded = events.data.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].2, plaintext.len());
        assert!(engine.read(id).is_none() || engine.read(id).unwrap().is_finished());
    }

    #[test]
    fn ctr_decrypt_handles_unaligned_offsets() {
        let crypto = DefaultCrypto;
        let key = ReadKey { aes: [3u8; 16], ctr_iv: [9; 8] };
        let plaintext = b"0123456789abcdef0123456789abcdef";

        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&key.ctr_iv);
        let full_cipher = crypto.aes_ctr_xor(&key.aes, &iv, 0, plaintext);

        // Decrypt a slice starting at an offset that is not block-aligned.
        let offset = 20u64;
        let slice = &full_cipher[offset as usize..];
        let decrypted = ctr_decrypt(&crypto, &key, offset, slice);
        assert_eq!(&decrypted[..], &plaintext[offset as usize..]);
    }
}
