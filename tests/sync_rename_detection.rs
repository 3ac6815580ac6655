// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! A local rename is reconciled as a single remote move, never as a
//! delete-and-reupload pair (spec §8 seed scenario 4).

use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use vault_core::graph::Graph;
use vault_core::handle::Handle;
use vault_core::sync::localnode::LocalNode;
use vault_core::sync::{Reconciler, SyncAction, SyncPair};
use vault_core::types::node::{Fingerprint, Node, NodeAttrs, NodeKeyState, NodeType};

fn folder(handle: Handle, parent: Handle, name: &str) -> Node {
    Node {
        handle,
        parent,
        node_type: NodeType::Folder,
        owner: Handle([1; 6]),
        size: None,
        ctime: 0,
        key_state: NodeKeyState::Decrypted {
            key: vec![0; 16],
            attrs: NodeAttrs { name: name.to_owned(), favourite: false, label: None, fingerprint_attr: None },
            fingerprint: None,
        },
        share_key: None,
        outbound_shares: Default::default(),
        file_attrs: vec![],
    }
}

fn file(handle: Handle, parent: Handle, name: &str, fp: Fingerprint) -> Node {
    let mut node = folder(handle, parent, name);
    node.node_type = NodeType::File;
    node.size = Some(4096);
    if let NodeKeyState::Decrypted { fingerprint, .. } = &mut node.key_state {
        *fingerprint = Some(fp);
    }
    node
}

#[test]
fn renaming_a_local_file_moves_the_remote_node_instead_of_reuploading() {
    let graph = Graph::new();
    let root = Handle([0; 6]);
    let remote_file = Handle([1; 6]);
    let fp = Fingerprint { sample_crc: 0xabcd_ef01, mtime: 1_700_000_000 };

    graph.upsert(folder(root, Handle::NONE, "root"));
    graph.upsert(file(remote_file, root, "a.txt", fp));

    let mut pair = SyncPair::new(PathBuf::from("/local"), root);
    // The filesystem notifier only ever saw "b.txt" — "a.txt" is gone
    // from disk, renamed before the driver's first scan after the
    // rename landed.
    let mut renamed = LocalNode::new(PathBuf::from("/local/b.txt"), false, 4096, SystemTime::UNIX_EPOCH);
    renamed.fingerprint = Some(fp);
    pair.upsert_local(renamed);

    let reconciler = Reconciler::new(Duration::ZERO);
    let actions = reconciler.pass(&mut pair, &graph, 1_700_000_100);

    let moves: Vec<_> = actions
        .iter()
        .filter(|a| matches!(a, SyncAction::RemoteMove { .. }))
        .collect();
    assert_eq!(moves.len(), 1, "expected exactly one remote move, got {actions:?}");
    assert!(
        matches!(moves[0], SyncAction::RemoteMove { remote, new_name, .. } if *remote == remote_file && new_name == "b.txt")
    );

    assert!(
        !actions.iter().any(|a| matches!(a, SyncAction::Upload { .. })),
        "a detected rename must not also queue an upload: {actions:?}"
    );
    assert!(
        !actions.iter().any(|a| matches!(a, SyncAction::Download { .. })),
        "a detected rename must not also queue a download of the old name: {actions:?}"
    );
}

#[test]
fn an_unrelated_new_local_file_still_uploads_normally() {
    let graph = Graph::new();
    let root = Handle([0; 6]);
    graph.upsert(folder(root, Handle::NONE, "root"));

    let mut pair = SyncPair::new(PathBuf::from("/local"), root);
    pair.upsert_local(LocalNode::new(PathBuf::from("/local/fresh.txt"), false, 10, SystemTime::UNIX_EPOCH));

    let reconciler = Reconciler::new(Duration::ZERO);
    let actions = reconciler.pass(&mut pair, &graph, 1_700_000_000);

    assert!(actions.iter().any(|a| matches!(a, SyncAction::Upload { .. })));
    assert!(!actions.iter().any(|a| matches!(a, SyncAction::RemoteMove { .. })));
}
