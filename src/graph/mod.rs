// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C4: the in-memory node DAG and key resolver.
//!
//! Nodes live in an arena keyed by [`Handle`] rather than behind raw
//! parent/child pointers (Design Note 1, spec §9): the state cache then
//! serializes as a straightforward map, and there is no lifetime tangle
//! to manage. Parent/child links are handles, dereferenced lazily
//! through the arena.

pub mod fingerprint;

use crate::crypto::keys::{decrypt_attr_blob, fold_file_key, unfold_file_key, FileKeyParts};
use crate::crypto::CryptoProvider;
use crate::handle::Handle;
use crate::types::node::{Node, NodeAttrs, NodeKeyState, NodeType};
use crate::{Error, Result};
use dashmap::DashMap;
use fingerprint::{decode_attr_fingerprint, FingerprintIndex};
use std::collections::BTreeSet;

/// Keys this session currently holds, used to try unwrapping a node's
/// key field (spec §4.3). The master key is stored under our own user
/// handle; share keys are stored under their share-root handle.
#[derive(Debug, Default)]
pub struct KeyRing {
    pub symmetric: std::collections::HashMap<Handle, [u8; 16]>,
    pub our_user_handle: Option<Handle>,
    pub rsa_private_key_der: Option<Vec<u8>>,
}

/// The node graph: an arena of [`Node`]s plus a parent -> children index
/// and the file fingerprint dedup index.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: DashMap<Handle, Node>,
    children: DashMap<Handle, BTreeSet<Handle>>,
    pub fingerprints: FingerprintIndex,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node, maintaining the children index and
    /// fingerprint index (spec §8 invariants 1 and 2).
    pub fn upsert(&self, node: Node) {
        if let Some(existing) = self.nodes.get(&node.handle) {
            if let NodeKeyState::Decrypted {
                fingerprint: Some(fp), ..
            } = &existing.key_state
            {
                self.fingerprints.remove(fp, &node.handle);
            }
            if existing.parent != node.parent {
                if let Some(mut set) = self.children.get_mut(&existing.parent) {
                    set.remove(&node.handle);
                }
            }
        }

        if !node.node_type.is_root() {
            self.children.entry(node.parent).or_default().insert(node.handle);
        }

        if let NodeKeyState::Decrypted {
            fingerprint: Some(fp), ..
        } = &node.key_state
        {
            self.fingerprints.insert(*fp, node.handle);
        }

        self.nodes.insert(node.handle, node);
    }

    pub fn get(&self, handle: &Handle) -> Option<Node> {
        self.nodes.get(handle).map(|n| n.clone())
    }

    pub fn children_of(&self, handle: &Handle) -> Vec<Handle> {
        self.children.get(handle).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    /// Remove a node and its whole subtree (spec C3 tag `d`, "Subtree
    /// deletion"). Returns every removed handle.
    pub fn remove_subtree(&self, root: Handle) -> Vec<Handle> {
        let mut removed = Vec::new();
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            stack.extend(self.children_of(&handle));
            if let Some((_, node)) = self.nodes.remove(&handle) {
                if let NodeKeyState::Decrypted {
                    fingerprint: Some(fp), ..
                } = &node.key_state
                {
                    self.fingerprints.remove(fp, &handle);
                }
                if let Some(mut set) = self.children.get_mut(&node.parent) {
                    set.remove(&handle);
                }
            }
            self.children.remove(&handle);
            removed.push(handle);
        }
        removed
    }

    /// Checks the tree invariants from spec §4.3/§8 that can be verified
    /// cheaply: no parent cycles, every non-root node's parent exists.
    pub fn check_invariants(&self) -> Result<()> {
        for entry in self.nodes.iter() {
            let node = entry.value();
            if node.node_type.is_root() {
                continue;
            }
            if !self.nodes.contains_key(&node.parent) {
                return Err(Error::Protocol(format!(
                    "node {} has missing parent {}",
                    node.handle, node.parent
                )));
            }
            // cycle check: walk ancestors bounded by graph size
            let mut seen = BTreeSet::new();
            let mut cur = node.handle;
            loop {
                if !seen.insert(cur) {
                    return Err(Error::Protocol(format!("parent cycle through {cur}")));
                }
                let Some(n) = self.nodes.get(&cur) else { break };
                if n.node_type.is_root() {
                    break;
                }
                cur = n.parent;
            }
        }
        Ok(())
    }
}

/// Parse a raw key field of the form `h1:key1,h2:key2,...` into its
/// `(handle, base64 key)` pairs (spec §4.3 form (a)).
fn parse_key_candidates(raw: &str) -> Vec<(Handle, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (handle_str, key_b64) = pair.split_once(':')?;
            let handle = Handle::from_b64(handle_str)?;
            Some((handle, key_b64.to_owned()))
        })
        .collect()
}

/// Try to unwrap a node's raw key field against the keys we currently
/// hold, returning the unwrapped key bytes plus, when the match came
/// from an RSA-wrapped pair, a flag telling the caller to queue a
/// rewrite command so future loads skip the asymmetric work
/// (spec §4.3: "it symmetric-encrypts the result ... and queues a
/// rewrite command").
pub fn resolve_node_key(crypto: &dyn CryptoProvider, ring: &KeyRing, raw_key_field: &str) -> Option<(Vec<u8>, bool)> {
    for (handle, key_b64) in parse_key_candidates(raw_key_field) {
        let Ok(wrapped) = base64::decode_config(&key_b64, base64::URL_SAFE_NO_PAD) else {
            continue;
        };

        if let Some(sym_key) = ring.symmetric.get(&handle) {
            if wrapped.len() % 16 == 0 {
                if let Ok(unwrapped) = crypto.aes_ecb_decrypt(sym_key, &wrapped) {
                    return Some((unwrapped, false));
                }
            }
            continue;
        }

        if Some(handle) == ring.our_user_handle {
            if let Some(der) = &ring.rsa_private_key_der {
                if let Ok(unwrapped) = crypto.rsa_decrypt(der, &wrapped) {
                    return Some((unwrapped, true));
                }
            }
        }
    }
    None
}

/// Unwrap and validate a node's key + attribute blob, producing the
/// `NodeKeyState` it should transition to, plus whether the caller
/// should queue a master-key rewrap for this node (spec §4.3: "it
/// symmetric-encrypts the result ... and queues a rewrite command").
/// Leaves the node `NoKey` when no held key unwraps it, or when the
/// magic prefix check fails (spec §4.3, §7 "Crypto" error kind).
pub fn decrypt_node(
    crypto: &dyn CryptoProvider,
    ring: &KeyRing,
    node_type: NodeType,
    raw_key_field: &str,
    attr_blob: &[u8],
) -> (NodeKeyState, bool) {
    let Some((raw_key, needs_rewrite)) = resolve_node_key(crypto, ring, raw_key_field) else {
        return (
            NodeKeyState::NoKey {
                wrapped: raw_key_field.to_owned(),
            },
            false,
        );
    };

    let (aes_key, fingerprint_hint) = if node_type.is_folder() {
        if raw_key.len() != 16 {
            return (
                NodeKeyState::NoKey {
                    wrapped: raw_key_field.to_owned(),
                },
                false,
            );
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&raw_key);
        (key, None)
    } else {
        if raw_key.len() != 32 {
            return (
                NodeKeyState::NoKey {
                    wrapped: raw_key_field.to_owned(),
                },
                false,
            );
        }
        let mut key32 = [0u8; 32];
        key32.copy_from_slice(&raw_key);
        let FileKeyParts { aes, .. } = unfold_file_key(&key32);
        (aes, Some(()))
    };

    match decrypt_attr_blob(crypto, attr_blob, &aes_key) {
        Ok(json) => {
            let attrs: NodeAttrs = serde_json::from_str(&format!("{{{json}}}")).unwrap_or_else(|_| NodeAttrs {
                name: json,
                favourite: false,
                label: None,
                fingerprint_attr: None,
            });
            let fingerprint = fingerprint_hint
                .and_then(|_| attrs.fingerprint_attr.as_deref())
                .and_then(decode_attr_fingerprint);
            (
                NodeKeyState::Decrypted {
                    key: raw_key,
                    attrs,
                    fingerprint,
                },
                needs_rewrite,
            )
        }
        Err(_) => (
            NodeKeyState::NoKey {
                wrapped: raw_key_field.to_owned(),
            },
            false,
        ),
    }
}

/// Re-wrap an unwrapped node key under our own master symmetric key, for
/// the "queues a rewrite command so future loads skip asymmetric work"
/// optimisation (spec §4.3).
pub fn rewrap_under_master_key(crypto: &dyn CryptoProvider, master_key: &[u8; 16], node_key: &[u8]) -> Result<Vec<u8>> {
    if node_key.len() % 16 != 0 {
        return Err(Error::Crypto("node key length not a multiple of 16".into()));
    }
    crypto.aes_ecb_encrypt(master_key, node_key)
}

/// Given the two pieces of a file node key, fold them back into the
/// 32-byte wire form (helper re-export for callers outside `crypto`).
pub fn fold_key(parts: FileKeyParts) -> [u8; 32] {
    fold_file_key(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::DefaultCrypto;

    fn sample_node(handle: Handle, parent: Handle, node_type: NodeType) -> Node {
        Node {
            handle,
            parent,
            node_type,
            owner: Handle([9; 6]),
            size: None,
            ctime: 0,
            key_state: NodeKeyState::NoKey { wrapped: String::new() },
            share_key: None,
            outbound_shares: Default::default(),
            file_attrs: vec![],
        }
    }

    #[test]
    fn upsert_maintains_children_index() {
        let graph = Graph::new();
        let root = Handle([0; 6]);
        let child = Handle([1; 6]);
        graph.upsert(sample_node(root, Handle::NONE, NodeType::RootFiles));
        graph.upsert(sample_node(child, root, NodeType::Folder));
        assert_eq!(graph.children_of(&root), vec![child]);
    }

    #[test]
    fn remove_subtree_removes_descendants() {
        let graph = Graph::new();
        let root = Handle([0; 6]);
        let child = Handle([1; 6]);
        let grandchild = Handle([2; 6]);
        graph.upsert(sample_node(root, Handle::NONE, NodeType::RootFiles));
        graph.upsert(sample_node(child, root, NodeType::Folder));
        graph.upsert(sample_node(grandchild, child, NodeType::File));

        let removed = graph.remove_subtree(child);
        assert!(removed.contains(&child));
        assert!(removed.contains(&grandchild));
        assert!(graph.get(&grandchild).is_none());
        assert!(graph.children_of(&root).is_empty());
    }

    #[test]
    fn detects_missing_parent() {
        let graph = Graph::new();
        graph.upsert(sample_node(Handle([1; 6]), Handle([2; 6]), NodeType::File));
        assert!(graph.check_invariants().is_err());
    }

    #[test]
    fn resolve_node_key_prefers_symmetric_match() {
        let crypto = DefaultCrypto;
        let share_handle = Handle([3; 6]);
        let node_key = [7u8; 16];
        let share_key = [1u8; 16];
        let wrapped = crypto.aes_ecb_encrypt(&share_key, &node_key).unwrap();
        let field = format!("{}:{}", share_handle.to_b64(), base64::encode_config(&wrapped, base64::URL_SAFE_NO_PAD));

        let mut ring = KeyRing::default();
        ring.symmetric.insert(share_handle, share_key);

        let (resolved, needs_rewrite) = resolve_node_key(&crypto, &ring, &field).unwrap();
        assert_eq!(resolved, node_key);
        assert!(!needs_rewrite);
    }

    #[test]
    fn resolve_node_key_returns_none_without_a_matching_key() {
        let crypto = DefaultCrypto;
        let field = format!("{}:{}", Handle([9; 6]).to_b64(), base64::encode_config([1u8; 16], base64::URL_SAFE_NO_PAD));
        let ring = KeyRing::default();
        assert!(resolve_node_key(&crypto, &ring, &field).is_none());
    }
}
