// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The `Node`: a vertex in the rooted DAG (spec §3).

use crate::handle::Handle;
use crate::types::share::Share;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node's place in the tree: the three roots, or an ordinary file/folder.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Folder,
    RootFiles,
    RootInbox,
    RootRubbish,
}

impl NodeType {
    /// Roots have no parent and are never NO_KEY.
    pub fn is_root(self) -> bool {
        matches!(self, NodeType::RootFiles | NodeType::RootInbox | NodeType::RootRubbish)
    }

    pub fn is_folder(self) -> bool {
        matches!(self, NodeType::Folder | NodeType::RootFiles | NodeType::RootInbox | NodeType::RootRubbish)
    }
}

/// The decrypted JSON attribute object carried inside a node's encrypted
/// attribute blob. `favourite`/`label` are supplemental fields the
/// distillation's "at least the UTF-8 name" note leaves room for
/// (SPEC_FULL §3 supplement, grounded on the original SDK's node
/// attribute set).
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct NodeAttrs {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "fav", default)]
    pub favourite: bool,
    #[serde(rename = "lbl", default, skip_serializing_if = "Option::is_none")]
    pub label: Option<u8>,
    /// Base64 fingerprint wire value for file nodes (CRC + mtime,
    /// [`crate::graph::fingerprint::encode_attr_fingerprint`]).
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_attr: Option<String>,
}

/// A file node's fingerprint: a compact content identity used for
/// dedup (spec §3, glossary "fingerprint").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Fingerprint {
    /// CRC of up to four sampled 16-byte blocks.
    pub sample_crc: u32,
    /// Modification time at the point of sampling, UNIX seconds.
    pub mtime: i64,
}

/// A node's key material and decrypted state. Modeled as an enum so a
/// node can never be "half decrypted" (Design Note 1, spec §9: prefer
/// types that make invalid states unrepresentable over optional fields).
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum NodeKeyState {
    /// The key could not be unwrapped with any key currently held. The
    /// node is enumerable but carries no usable name (glossary: NO_KEY).
    NoKey {
        /// The raw `<handle>:<base64key>,...` key field as received, kept
        /// so a later share-key arrival can retry unwrapping without a
        /// refetch.
        wrapped: String,
    },
    /// The key unwrapped and the attribute blob validated.
    Decrypted {
        /// 16 bytes for folders, 32 for files (pre-fold for files).
        key: Vec<u8>,
        attrs: NodeAttrs,
        /// Present only for file nodes.
        fingerprint: Option<Fingerprint>,
    },
}

impl NodeKeyState {
    pub fn is_decrypted(&self) -> bool {
        matches!(self, NodeKeyState::Decrypted { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            NodeKeyState::Decrypted { attrs, .. } => Some(&attrs.name),
            NodeKeyState::NoKey { .. } => None,
        }
    }
}

/// A file or folder attribute reference (thumbnail/preview/media handle).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FileAttrRef {
    pub attr_type: u32,
    pub handle: Handle,
}

/// A vertex in the node graph (spec §3).
#[derive(Clone, Debug)]
pub struct Node {
    pub handle: Handle,
    /// `Handle::NONE` for roots.
    pub parent: Handle,
    pub node_type: NodeType,
    pub owner: Handle,
    /// Files only.
    pub size: Option<u64>,
    pub ctime: i64,
    pub key_state: NodeKeyState,
    /// Present only on folder nodes that are outbound-share roots.
    pub share_key: Option<[u8; 16]>,
    /// Outbound shares rooted at this node, keyed by peer user handle.
    pub outbound_shares: BTreeMap<Handle, Share>,
    pub file_attrs: Vec<FileAttrRef>,
}

impl Node {
    /// True for folder nodes that currently carry outbound shares, or
    /// that carry a share key left over from a revoked one (spec §4.3
    /// tree invariant).
    pub fn is_share_root(&self) -> bool {
        self.share_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_classifies_roots_and_folders() {
        assert!(NodeType::RootFiles.is_root());
        assert!(!NodeType::File.is_root());
        assert!(NodeType::Folder.is_folder());
        assert!(!NodeType::File.is_folder());
    }

    #[test]
    fn no_key_node_has_no_name() {
        let state = NodeKeyState::NoKey {
            wrapped: "abc:xyz".into(),
        };
        assert!(!state.is_decrypted());
        assert_eq!(state.name(), None);
    }
}
