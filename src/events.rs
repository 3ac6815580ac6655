// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C3: the action-packet processor (spec §4.2). Long-polls a second
//! channel for server-pushed state changes and folds each tagged packet
//! into the node graph, user store, and pending-contact store.

use crate::callbacks::HostEvents;
use crate::crypto::CryptoProvider;
use crate::graph::{decrypt_node, Graph, KeyRing};
use crate::handle::Handle;
use crate::state::{PcrStore, UserStore};
use crate::types::node::{Node, NodeType};
use crate::types::pcr::{PcrDirection, PendingContactRequest};
use crate::types::share::{AccessLevel, InboundShare, OutboundShare, Share};
use crate::types::user::{User, Visibility};
use crate::{Error, Result};
use std::sync::Mutex;

/// Where the processor's long-poll cycle currently is (spec §4.2 "State
/// machine: idle -> in-flight -> parsing -> applying -> committed").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessorState {
    Idle,
    InFlight,
    Parsing,
    Applying,
    Committed,
    /// `ESID` or repeated failure; only a fresh login recovers.
    Stopped,
}

/// One parsed element of an action-packet batch, before it is applied.
#[derive(Clone, Debug)]
struct ActionPacket {
    tag: String,
    origin: Option<Handle>,
    originator_marker: Option<String>,
    value: serde_json::Value,
}

/// What changed as a result of applying one batch, for the driver to
/// forward to [`HostEvents`].
#[derive(Default, Debug)]
pub struct AppliedSummary {
    pub nodes_touched: Vec<Handle>,
    pub users_touched: Vec<Handle>,
    pub pcrs_touched: Vec<String>,
    pub reload_required: bool,
    /// Nodes whose key was just unwrapped asymmetrically and should be
    /// rewrapped under the master key, paired with the raw unwrapped key
    /// (spec §4.3 "queues a rewrite command").
    pub nodes_needing_rewrap: Vec<(Handle, Vec<u8>)>,
}

/// The action-packet processor: tracks the scsn and the long-poll state
/// machine, and folds applied packets into the engine's stores.
#[derive(Debug)]
pub struct Processor {
    scsn: Mutex<Option<String>>,
    state: Mutex<ProcessorState>,
    /// Random per-session marker placed in the request's `i` field so
    /// our own reflected packets can be suppressed (spec §4.2).
    origin_marker: String,
}

impl Processor {
    pub fn new(origin_marker: impl Into<String>) -> Self {
        Self {
            scsn: Mutex::new(None),
            state: Mutex::new(ProcessorState::Idle),
            origin_marker: origin_marker.into(),
        }
    }

    pub fn scsn(&self) -> Option<String> {
        self.scsn.lock().unwrap().clone()
    }

    /// Seed the scsn from persisted state on startup, skipping a full
    /// reload (spec §4.2, §4.7).
    pub fn resume_from(&self, scsn: String) {
        *self.scsn.lock().unwrap() = Some(scsn);
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap()
    }

    pub fn mark_in_flight(&self) {
        *self.state.lock().unwrap() = ProcessorState::InFlight;
    }

    /// Parse and apply one long-poll response body. A bare `"0"` is a
    /// keep-alive with no packets; the processor returns straight to
    /// idle. `ESID` (surfaced by the caller as [`Error::AuthInvalid`])
    /// stops the scsn permanently.
    #[instrument(skip(self, graph, ring, users, pcrs, events, body), level = "debug")]
    #[allow(clippy::too_many_arguments)]
    pub fn apply_response(
        &self,
        graph: &Graph,
        ring: &KeyRing,
        crypto: &dyn CryptoProvider,
        users: &UserStore,
        pcrs: &PcrStore,
        events: &dyn HostEvents,
        body: &[u8],
    ) -> Result<AppliedSummary> {
        *self.state.lock().unwrap() = ProcessorState::Parsing;

        let text = std::str::from_utf8(body).map_err(|e| Error::Protocol(format!("non-utf8 action packet body: {e}")))?;
        if text.trim() == "0" {
            *self.state.lock().unwrap() = ProcessorState::Idle;
            return Ok(AppliedSummary::default());
        }

        let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| Error::Protocol(format!("malformed action packet body: {e}")))?;
        let packets: Vec<ActionPacket> = parsed
            .get("a")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|v| ActionPacket {
                        tag: v.get("a").and_then(|t| t.as_str()).unwrap_or_default().to_owned(),
                        origin: v.get("ou").and_then(|h| h.as_str()).and_then(Handle::from_b64),
                        originator_marker: v.get("i").and_then(|i| i.as_str()).map(str::to_owned),
                        value: v.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let new_sn = parsed.get("sn").and_then(|s| s.as_str()).map(str::to_owned);

        *self.state.lock().unwrap() = ProcessorState::Applying;
        let mut summary = AppliedSummary::default();

        for packet in &packets {
            if packet.originator_marker.as_deref() == Some(self.origin_marker.as_str()) {
                // our own action reflected back: already applied locally
                // when the command response arrived (spec §4.2
                // re-entrancy requirement).
                continue;
            }
            apply_packet(packet, graph, ring, crypto, users, pcrs, events, &mut summary)?;
        }

        // the sequence number only advances after it is observed; a crash
        // before this point forces re-delivery of the same batch on the
        // next long-poll (spec §4.2).
        if let Some(sn) = new_sn {
            *self.scsn.lock().unwrap() = Some(sn);
        }
        *self.state.lock().unwrap() = ProcessorState::Committed;
        Ok(summary)
    }

    /// Mark the scsn stopped after `ESID` or repeated failure; only a
    /// fresh login + full fetch recovers (spec §4.2).
    pub fn stop(&self) {
        *self.state.lock().unwrap() = ProcessorState::Stopped;
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_packet(
    packet: &ActionPacket,
    graph: &Graph,
    ring: &KeyRing,
    crypto: &dyn CryptoProvider,
    users: &UserStore,
    pcrs: &PcrStore,
    events: &dyn HostEvents,
    summary: &mut AppliedSummary,
) -> Result<()> {
    match packet.tag.as_str() {
        "t" => apply_new_nodes(&packet.value, graph, ring, crypto, summary),
        "u" => apply_node_update(&packet.value, graph, ring, crypto, summary),
        "d" => apply_subtree_deletion(&packet.value, graph, summary),
        "s" | "s2" => apply_share(&packet.value, graph, summary),
        "c" => apply_contact(&packet.value, packet.origin, users, summary),
        "ua" => apply_user_attr_invalidation(&packet.value, users, summary),
        "ipc" | "opc" | "upci" | "upco" => apply_pcr(&packet.tag, &packet.value, pcrs, summary),
        "se" => apply_email_change(&packet.value, packet.origin, users, summary),
        "k" => Ok(()), // key distribution requests are applied by the driver via `record_inbound_share`
        "fa" => Ok(()), // file-attribute handle set is applied via a dedicated node update
        "ph" => {
            events.notify_storage();
            Ok(())
        }
        "psts" | "pses" | "ub" => {
            events.account_updated();
            Ok(())
        }
        "la" => Ok(()),
        _ => Ok(()), // chat and other out-of-scope tags (spec §4.2)
    }
}

/// Raw wire shape of a node as carried by `t` packets and fetchnodes.
#[derive(serde::Deserialize)]
struct RawNode {
    h: String,
    p: Option<String>,
    u: String,
    t: u8,
    #[serde(default)]
    ts: i64,
    s: Option<u64>,
    a: Option<String>,
    k: Option<String>,
}

fn node_type_from_wire(t: u8) -> Option<NodeType> {
    match t {
        0 => Some(NodeType::File),
        1 => Some(NodeType::Folder),
        2 => Some(NodeType::RootFiles),
        3 => Some(NodeType::RootInbox),
        4 => Some(NodeType::RootRubbish),
        _ => None,
    }
}

fn decode_node(raw: &RawNode, graph: &Graph, ring: &KeyRing, crypto: &dyn CryptoProvider) -> Result<(Node, bool)> {
    let handle = Handle::from_b64(&raw.h).ok_or_else(|| Error::Protocol(format!("malformed node handle {}", raw.h)))?;
    let node_type = node_type_from_wire(raw.t).ok_or_else(|| Error::Protocol(format!("unknown node type {}", raw.t)))?;
    let parent = raw
        .p
        .as_deref()
        .and_then(Handle::from_b64)
        .unwrap_or(Handle::NONE);
    let owner = Handle::from_b64(&raw.u).unwrap_or(Handle::NONE);

    let (key_state, needs_rewrap) = match (&raw.k, &raw.a) {
        (Some(k), Some(a)) => {
            let attr_blob = base64::decode_config(a, base64::URL_SAFE_NO_PAD).unwrap_or_default();
            decrypt_node(crypto, ring, node_type, k, &attr_blob)
        }
        _ => (crate::types::node::NodeKeyState::NoKey { wrapped: String::new() }, false),
    };

    let previous_shares = graph.get(&handle).map(|n| n.outbound_shares).unwrap_or_default();

    Ok((
        Node {
            handle,
            parent,
            node_type,
            owner,
            size: if node_type == NodeType::File { raw.s } else { None },
            ctime: raw.ts,
            key_state,
            share_key: None,
            outbound_shares: previous_shares,
            file_attrs: Vec::new(),
        },
        needs_rewrap,
    ))
}

/// Decode and upsert every node in a `t`-packet or fetchnodes `f` array,
/// folding each into `summary` (shared by [`apply_new_nodes`] and
/// [`apply_fetch_nodes`]).
fn apply_node_list(nodes: &[serde_json::Value], graph: &Graph, ring: &KeyRing, crypto: &dyn CryptoProvider, summary: &mut AppliedSummary) -> Result<()> {
    for raw in nodes {
        let raw: RawNode = serde_json::from_value(raw.clone()).map_err(|e| Error::Protocol(format!("malformed node: {e}")))?;
        let (node, needs_rewrap) = decode_node(&raw, graph, ring, crypto)?;
        if needs_rewrap {
            if let crate::types::node::NodeKeyState::Decrypted { key, .. } = &node.key_state {
                summary.nodes_needing_rewrap.push((node.handle, key.clone()));
            }
        }
        summary.nodes_touched.push(node.handle);
        graph.upsert(node);
    }
    Ok(())
}

fn apply_new_nodes(value: &serde_json::Value, graph: &Graph, ring: &KeyRing, crypto: &dyn CryptoProvider, summary: &mut AppliedSummary) -> Result<()> {
    let Some(nodes) = value.get("t").and_then(|t| t.get("f")).and_then(|f| f.as_array()) else {
        return Ok(());
    };
    apply_node_list(nodes, graph, ring, crypto, summary)
}

/// Apply the `f` node array from a fetchnodes response (spec §4.2
/// "initial load"), reusing the same node decode/upsert path as `t`
/// packets.
pub fn apply_fetch_nodes(value: &serde_json::Value, graph: &Graph, ring: &KeyRing, crypto: &dyn CryptoProvider) -> Result<AppliedSummary> {
    let mut summary = AppliedSummary::default();
    if let Some(nodes) = value.get("f").and_then(|f| f.as_array()) {
        apply_node_list(nodes, graph, ring, crypto, &mut summary)?;
    }
    Ok(summary)
}

fn apply_node_update(value: &serde_json::Value, graph: &Graph, ring: &KeyRing, crypto: &dyn CryptoProvider, summary: &mut AppliedSummary) -> Result<()> {
    let Some(handle) = value.get("n").and_then(|n| n.as_str()).and_then(Handle::from_b64) else {
        return Ok(());
    };
    let Some(mut node) = graph.get(&handle) else {
        // the node hasn't arrived yet; nothing to update.
        return Ok(());
    };

    if let Some(owner) = value.get("u").and_then(|u| u.as_str()).and_then(Handle::from_b64) {
        node.owner = owner;
    }
    if let Some(ts) = value.get("ts").and_then(|t| t.as_i64()) {
        node.ctime = ts;
    }
    if let Some(a) = value.get("at").and_then(|a| a.as_str()) {
        let attr_blob = base64::decode_config(a, base64::URL_SAFE_NO_PAD).unwrap_or_default();
        let raw_key = match &node.key_state {
            crate::types::node::NodeKeyState::NoKey { wrapped } => wrapped.clone(),
            crate::types::node::NodeKeyState::Decrypted { .. } => String::new(),
        };
        if !raw_key.is_empty() {
            let (key_state, needs_rewrap) = decrypt_node(crypto, ring, node.node_type, &raw_key, &attr_blob);
            if needs_rewrap {
                if let crate::types::node::NodeKeyState::Decrypted { key, .. } = &key_state {
                    summary.nodes_needing_rewrap.push((handle, key.clone()));
                }
            }
            node.key_state = key_state;
        } else if let crate::types::node::NodeKeyState::Decrypted { key, .. } = &node.key_state {
            let key = key.clone();
            if key.len() == 16 {
                let mut aes = [0u8; 16];
                aes.copy_from_slice(&key);
                if let Ok(json) = crate::crypto::keys::decrypt_attr_blob(crypto, &attr_blob, &aes) {
                    if let Ok(attrs) = serde_json::from_str(&format!("{{{json}}}")) {
                        node.key_state = crate::types::node::NodeKeyState::Decrypted {
                            key,
                            attrs,
                            fingerprint: None,
                        };
                    }
                }
            }
        }
    }

    summary.nodes_touched.push(handle);
    graph.upsert(node);
    Ok(())
}

fn apply_subtree_deletion(value: &serde_json::Value, graph: &Graph, summary: &mut AppliedSummary) -> Result<()> {
    let Some(handle) = value.get("n").and_then(|n| n.as_str()).and_then(Handle::from_b64) else {
        return Ok(());
    };
    summary.nodes_touched.extend(graph.remove_subtree(handle));
    Ok(())
}

fn apply_share(value: &serde_json::Value, graph: &Graph, summary: &mut AppliedSummary) -> Result<()> {
    let Some(handle) = value.get("n").and_then(|n| n.as_str()).and_then(Handle::from_b64) else {
        return Ok(());
    };
    let Some(mut node) = graph.get(&handle) else {
        return Ok(());
    };

    let access = value
        .get("a")
        .and_then(|a| a.as_i64())
        .map(|a| match a {
            1 => AccessLevel::ReadOnly,
            2 => AccessLevel::ReadWrite,
            _ => AccessLevel::Full,
        })
        .unwrap_or(AccessLevel::ReadOnly);
    let revoked = value.get("r").and_then(|r| r.as_i64()) == Some(1);
    let peer = value.get("u").and_then(|u| u.as_str()).and_then(Handle::from_b64);

    if revoked {
        if let Some(peer) = peer {
            node.outbound_shares.remove(&peer);
        }
        // share_key is kept even with no live entries (spec §4.3
        // invariant: "share keys on a node imply the node is a folder and
        // either has outbound shares or had one that was revoked").
    } else if let Some(peer) = peer {
        // The share key itself arrives through the paired `k`
        // key-distribution packet, not this one; this placeholder is
        // overwritten once the driver processes that packet.
        node.share_key.get_or_insert([0u8; 16]);
        node.outbound_shares.insert(peer, Share::Outbound(OutboundShare::Accepted { peer, access }));
    }

    summary.nodes_touched.push(handle);
    graph.upsert(node);
    Ok(())
}

fn apply_contact(value: &serde_json::Value, origin: Option<Handle>, users: &UserStore, summary: &mut AppliedSummary) -> Result<()> {
    let Some(handle) = origin.or_else(|| value.get("u").and_then(|u| u.as_str()).and_then(Handle::from_b64)) else {
        return Ok(());
    };
    let email = value.get("m").and_then(|m| m.as_str()).unwrap_or_default();
    let visibility = match value.get("c").and_then(|c| c.as_i64()) {
        Some(0) => Visibility::Hidden,
        Some(1) => Visibility::Visible,
        Some(2) => Visibility::Blocked,
        _ => Visibility::Unknown,
    };

    let mut user = users.get(&handle).unwrap_or_else(|| User::new(handle, email));
    if !email.is_empty() {
        user.email = email.to_lowercase();
    }
    user.visibility = visibility;
    users.upsert(user)?;
    summary.users_touched.push(handle);
    Ok(())
}

fn apply_user_attr_invalidation(value: &serde_json::Value, users: &UserStore, summary: &mut AppliedSummary) -> Result<()> {
    let Some(handle) = value.get("u").and_then(|u| u.as_str()).and_then(Handle::from_b64) else {
        return Ok(());
    };
    if let Some(mut user) = users.get(&handle) {
        if let Some(attr_name) = value.get("ua").and_then(|a| a.as_str()) {
            user.attributes.remove(attr_name);
        }
        users.upsert(user)?;
    }
    summary.users_touched.push(handle);
    Ok(())
}

fn apply_pcr(tag: &str, value: &serde_json::Value, pcrs: &PcrStore, summary: &mut AppliedSummary) -> Result<()> {
    let Some(id) = value.get("p").and_then(|p| p.as_str()) else {
        return Ok(());
    };
    let direction = if tag == "ipc" || tag == "upci" { PcrDirection::Incoming } else { PcrDirection::Outgoing };

    if tag == "upci" || tag == "upco" {
        if let Some(mut existing) = pcrs.get(id) {
            existing.updated_at = value.get("ts").and_then(|t| t.as_i64()).unwrap_or(existing.updated_at);
            if value.get("dts").and_then(|d| d.as_i64()).is_some() {
                existing.deleted_at = value.get("dts").and_then(|d| d.as_i64());
            }
            pcrs.upsert(existing);
        }
        summary.pcrs_touched.push(id.to_owned());
        return Ok(());
    }

    let pcr = PendingContactRequest {
        id: id.to_owned(),
        originator_email: value.get("m").and_then(|m| m.as_str()).unwrap_or_default().to_lowercase(),
        target_email: value.get("m2").and_then(|m| m.as_str()).unwrap_or_default().to_lowercase(),
        created_at: value.get("ts").and_then(|t| t.as_i64()).unwrap_or_default(),
        updated_at: value.get("ts").and_then(|t| t.as_i64()).unwrap_or_default(),
        reminded_at: None,
        deleted_at: None,
        message: value.get("msg").and_then(|m| m.as_str()).map(str::to_owned),
        direction,
    };
    pcrs.upsert(pcr);
    summary.pcrs_touched.push(id.to_owned());
    Ok(())
}

fn apply_email_change(value: &serde_json::Value, origin: Option<Handle>, users: &UserStore, summary: &mut AppliedSummary) -> Result<()> {
    let Some(handle) = origin else { return Ok(()) };
    let Some(new_email) = value.get("m").and_then(|m| m.as_str()) else {
        return Ok(());
    };
    users.change_email(handle, new_email)?;
    summary.users_touched.push(handle);
    Ok(())
}

/// An inbound share arriving via a `k` key-distribution response, kept
/// separate from the `s`/`s2` node-carried outbound form (spec §4.3).
pub fn record_inbound_share(graph: &Graph, node_handle: Handle, owner: Handle, access: AccessLevel, share_key: [u8; 16]) {
    if let Some(mut node) = graph.get(&node_handle) {
        node.outbound_shares
            .entry(owner)
            .or_insert_with(|| Share::Inbound(InboundShare { owner, access, share_key }));
        graph.upsert(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NullEvents;
    use crate::crypto::provider::DefaultCrypto;

    fn sample_processor() -> Processor {
        Processor::new("session-marker")
    }

    #[test]
    fn keepalive_response_returns_to_idle() {
        let processor = sample_processor();
        let graph = Graph::new();
        let ring = KeyRing::default();
        let crypto = DefaultCrypto;
        let users = UserStore::new();
        let pcrs = PcrStore::new();
        let events = NullEvents;

        processor.mark_in_flight();
        let summary = processor.apply_response(&graph, &ring, &crypto, &users, &pcrs, &events, b"0").unwrap();
        assert!(summary.nodes_touched.is_empty());
        assert_eq!(processor.state(), ProcessorState::Idle);
    }

    #[test]
    fn self_originated_packets_are_suppressed() {
        let processor = sample_processor();
        let graph = Graph::new();
        let ring = KeyRing::default();
        let crypto = DefaultCrypto;
        let users = UserStore::new();
        let pcrs = PcrStore::new();
        let events = NullEvents;

        let body = serde_json::json!({
            "a": [{"a": "c", "i": "session-marker", "u": Handle([9;6]).to_b64(), "m": "x@example.com", "c": 1}],
            "sn": "seq1",
        });
        let summary = processor
            .apply_response(&graph, &ring, &crypto, &users, &pcrs, &events, body.to_string().as_bytes())
            .unwrap();
        assert!(summary.users_touched.is_empty());
        assert_eq!(processor.scsn(), Some("seq1".to_owned()));
    }

    #[test]
    fn contact_packet_upserts_the_user_store() {
        let processor = sample_processor();
        let graph = Graph::new();
        let ring = KeyRing::default();
        let crypto = DefaultCrypto;
        let users = UserStore::new();
        let pcrs = PcrStore::new();
        let events = NullEvents;
        let handle = Handle([7; 6]);

        let body = serde_json::json!({
            "a": [{"a": "c", "u": handle.to_b64(), "m": "friend@example.com", "c": 1}],
            "sn": "seq2",
        });
        let summary = processor
            .apply_response(&graph, &ring, &crypto, &users, &pcrs, &events, body.to_string().as_bytes())
            .unwrap();
        assert_eq!(summary.users_touched, vec![handle]);
        assert_eq!(users.by_email("friend@example.com"), Some(handle));
    }

    #[test]
    fn subtree_deletion_packet_removes_the_node() {
        let processor = sample_processor();
        let graph = Graph::new();
        let handle = Handle([3; 6]);
        graph.upsert(Node {
            handle,
            parent: Handle::NONE,
            node_type: NodeType::RootFiles,
            owner: Handle::NONE,
            size: None,
            ctime: 0,
            key_state: crate::types::node::NodeKeyState::NoKey { wrapped: String::new() },
            share_key: None,
            outbound_shares: Default::default(),
            file_attrs: vec![],
        });

        let ring = KeyRing::default();
        let crypto = DefaultCrypto;
        let users = UserStore::new();
        let pcrs = PcrStore::new();
        let events = NullEvents;

        let body = serde_json::json!({"a": [{"a": "d", "n": handle.to_b64()}], "sn": "seq3"});
        let summary = processor
            .apply_response(&graph, &ring, &crypto, &users, &pcrs, &events, body.to_string().as_bytes())
            .unwrap();
        assert!(summary.nodes_touched.contains(&handle));
        assert!(graph.get(&handle).is_none());
    }
}
