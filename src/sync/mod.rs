// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C8: the bidirectional sync reconciler (spec §4.5). Each [`SyncPair`]
//! ties a local directory to a remote subtree; [`Reconciler::pass`] runs
//! syncdown then syncup and returns the actions the driver must carry
//! out against the transfer engine and the command pipeline. This
//! module never touches the filesystem or the network directly: it
//! consumes a snapshot of local state the driver built from
//! [`crate::fsadapter::FileSystem`] notifications, and the remote state
//! already applied to the [`crate::graph::Graph`].

pub mod localnode;

use crate::fsadapter::sanitize_name;
use crate::graph::Graph;
use crate::handle::Handle;
use crate::timer::Deadline;
use crate::types::node::{Fingerprint, NodeKeyState, NodeType};
use localnode::LocalNode;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A local file became stable and safe to upload, a remote file needs a
/// local download, or a node needs moving/renaming/deleting. The driver
/// executes these against the transfer engine and command pipeline; the
/// reconciler only decides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncAction {
    Download { remote: Handle, local_path: PathBuf },
    Upload { local_path: PathBuf, remote_parent: Handle },
    CreateRemoteFolder { name: String, remote_parent: Handle },
    CreateLocalFolder { path: PathBuf },
    /// Local deletion mirrored to the remote: moved to debris, not
    /// destroyed outright (spec §4.5 "Debris rotation").
    MoveToDebris { remote: Handle, debris_parent_name: String },
    /// A rename/move detected via fingerprint match (spec §4.5 "Rename/
    /// move detection"): one remote move command instead of copy+delete.
    RemoteMove { remote: Handle, new_parent: Handle, new_name: String },
    RemoveLocalOrphan { path: PathBuf },
}

/// One tracked `(local_root_path, remote_root_handle)` pair (spec §4.5).
#[derive(Debug)]
pub struct SyncPair {
    pub local_root: PathBuf,
    pub remote_root: Handle,
    local_nodes: HashMap<PathBuf, LocalNode>,
    /// Paths with a pending change, armed to fire after the nagle
    /// interval has elapsed with no further change (spec §4.5 "nagle
    /// delay").
    nagle: HashMap<PathBuf, Deadline>,
    /// Count of uploads started in the current rate-limit window, for
    /// the version throttling formula.
    recent_versions: u32,
    scan_backoff: Option<Deadline>,
}

impl SyncPair {
    pub fn new(local_root: PathBuf, remote_root: Handle) -> Self {
        Self {
            local_root,
            remote_root,
            local_nodes: HashMap::new(),
            nagle: HashMap::new(),
            recent_versions: 0,
            scan_backoff: None,
        }
    }

    pub fn upsert_local(&mut self, node: LocalNode) {
        self.local_nodes.insert(node.path.clone(), node);
    }

    pub fn local(&self, path: &Path) -> Option<&LocalNode> {
        self.local_nodes.get(path)
    }

    pub fn remove_local(&mut self, path: &Path) {
        self.local_nodes.remove(path);
        self.nagle.remove(path);
    }

    /// Mark a local path as changed, arming or re-arming its nagle
    /// deadline (spec §4.5: "not uploaded until it has been stable for
    /// the nagle interval").
    pub fn touch(&mut self, path: PathBuf, nagle_interval: Duration) {
        self.nagle.insert(path, Deadline::after(nagle_interval));
    }

    fn nagle_ready(&self, path: &Path) -> bool {
        match self.nagle.get(path) {
            Some(deadline) => deadline.fired(),
            None => true,
        }
    }

    /// Every LocalNode whose associated remote handle no longer exists
    /// in the graph, for garbage collection (spec §4.5 "LocalNode<->Node
    /// association").
    pub fn orphans(&self, graph: &Graph) -> Vec<PathBuf> {
        self.local_nodes
            .values()
            .filter(|n| match n.remote {
                Some(h) => graph.get(&h).is_none(),
                None => false,
            })
            .map(|n| n.path.clone())
            .collect()
    }

    pub fn sweep_orphans(&mut self, graph: &Graph) -> Vec<SyncAction> {
        let orphaned = self.orphans(graph);
        for path in &orphaned {
            self.local_nodes.remove(path);
        }
        orphaned.into_iter().map(|path| SyncAction::RemoveLocalOrphan { path }).collect()
    }

    /// Schedule a full rescan after a notification failure/overflow
    /// (spec §4.5 "Scan failure recovery"): `300ds + total_nodes/128`.
    pub fn schedule_rescan(&mut self, total_nodes: usize) {
        let delay = scan_failure_backoff(total_nodes);
        self.scan_backoff = Some(Deadline::after(delay));
    }

    pub fn rescan_due(&self) -> bool {
        self.scan_backoff.map(|d| d.fired()).unwrap_or(false)
    }

    pub fn clear_rescan(&mut self) {
        self.scan_backoff = None;
    }

    pub fn record_version_upload(&mut self) {
        self.recent_versions = self.recent_versions.saturating_add(1);
    }

    pub fn decay_version_window(&mut self) {
        self.recent_versions = self.recent_versions.saturating_sub(1);
    }
}

/// `300 deciseconds + total_nodes/128` (spec §4.5), expressed as a
/// `Duration`. `total_nodes/128` is itself in deciseconds, matching the
/// original SDK's scan-failure backoff units.
pub fn scan_failure_backoff(total_nodes: usize) -> Duration {
    let deciseconds = 300 + (total_nodes / 128) as u64;
    Duration::from_millis(deciseconds * 100)
}

/// `7 * (recentVersions/10) * (recentVersions-10)` seconds once more
/// than 10 versions have landed in the current window, else zero
/// (spec §4.5 "version rate-limiting").
pub fn version_rate_limit_delay(recent_versions: u32) -> Duration {
    if recent_versions <= 10 {
        return Duration::ZERO;
    }
    let secs = 7 * (recent_versions / 10) * (recent_versions - 10);
    Duration::from_secs(u64::from(secs))
}

/// Drives `syncdown`/`syncup` passes over a single [`SyncPair`] (spec
/// §4.5). Stateless beyond the pair itself; one instance is reused
/// across every pair the driver manages.
#[derive(Debug, Default)]
pub struct Reconciler {
    pub nagle_interval: Duration,
}

impl Reconciler {
    pub fn new(nagle_interval: Duration) -> Self {
        Self { nagle_interval }
    }

    /// Run one full pass: syncdown then syncup (spec §4.5: "two passes
    /// per driver tick when the remote state is current"). `now_unix_secs`
    /// is the wall-clock time the driver observed this tick, needed only
    /// to name a freshly created debris folder.
    pub fn pass(&self, pair: &mut SyncPair, graph: &Graph, now_unix_secs: i64) -> Vec<SyncAction> {
        let mut actions = pair.sweep_orphans(graph);
        actions.extend(self.syncdown(pair, graph, now_unix_secs));
        actions.extend(self.syncup(pair, graph));
        actions
    }

    /// Propagate remote changes to local (spec §4.5 "syncdown").
    fn syncdown(&self, pair: &SyncPair, graph: &Graph, now_unix_secs: i64) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        let remote_children = children_by_name(graph, pair.remote_root);

        let local_by_name: HashMap<String, &LocalNode> = pair
            .local_nodes
            .values()
            .filter_map(|n| n.path.file_name().map(|name| (name.to_string_lossy().to_string(), n)))
            .collect();

        for (name, (remote_handle, remote_node)) in &remote_children {
            let local_path = pair.local_root.join(name);
            match local_by_name.get(name) {
                None => {
                    // Not present locally under this name: before
                    // downloading, check whether the content is already
                    // sitting under a different local path (a pending
                    // rename syncup hasn't pushed up yet, or genuine
                    // orphaned debris). Either way, redownloading
                    // identical bytes here would be wasted work and
                    // would race with syncup's own rename handling.
                    if let Some(fp) = node_fingerprint(remote_node) {
                        if let Some(existing) = find_local_with_fingerprint(pair, fp) {
                            if existing.orphaned {
                                actions.push(SyncAction::RemoveLocalOrphan { path: existing.path.clone() });
                            }
                            continue;
                        }
                    }
                    if remote_node.node_type.is_folder() {
                        actions.push(SyncAction::CreateLocalFolder { path: local_path });
                    } else {
                        actions.push(SyncAction::Download {
                            remote: *remote_handle,
                            local_path,
                        });
                    }
                }
                Some(local) => {
                    let remote_is_folder = remote_node.node_type.is_folder();
                    if remote_is_folder != local.is_dir {
                        continue; // type mismatch: leave for the host to resolve
                    }
                    if !remote_is_folder {
                        if let (Some(local_fp), Some(remote_fp)) = (local.fingerprint, node_fingerprint(remote_node)) {
                            if local_fp.mtime >= remote_fp.mtime {
                                continue; // local is newer or equal: skip
                            }
                        }
                        actions.push(SyncAction::Download {
                            remote: *remote_handle,
                            local_path,
                        });
                    }
                    // both folders: nothing to do here, their own children
                    // recurse through the same pass at the next level.
                }
            }
        }

        for local in pair.local_nodes.values() {
            if local.remote.is_none() {
                continue;
            }
            let still_present = local
                .path
                .file_name()
                .map(|n| remote_children.contains_key(&n.to_string_lossy().to_string()))
                .unwrap_or(false);
            if !still_present && local.orphaned {
                actions.push(SyncAction::MoveToDebris {
                    remote: local.remote.unwrap(),
                    debris_parent_name: localnode::debris_folder_name(now_unix_secs),
                });
            }
        }

        actions
    }

    /// Propagate local changes to remote (spec §4.5 "syncup"), honouring
    /// the nagle delay and version rate limit.
    fn syncup(&self, pair: &mut SyncPair, graph: &Graph) -> Vec<SyncAction> {
        let mut actions = Vec::new();
        let remote_children = children_by_name(graph, pair.remote_root);

        let rate_limit_delay = version_rate_limit_delay(pair.recent_versions);
        if rate_limit_delay > Duration::ZERO {
            return actions;
        }

        let paths: Vec<PathBuf> = pair.local_nodes.keys().cloned().collect();
        for path in paths {
            if !pair.nagle_ready(&path) {
                continue;
            }
            let Some(local) = pair.local_nodes.get(&path) else { continue };
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let sanitized = sanitize_name(&name);

            match remote_children.get(&sanitized) {
                Some((remote_handle, remote_node)) => {
                    if remote_node.node_type.is_folder() != local.is_dir {
                        continue;
                    }
                    if !local.is_dir {
                        if let (Some(local_fp), Some(remote_fp)) = (local.fingerprint, node_fingerprint(remote_node)) {
                            if local_fp.mtime > remote_fp.mtime && local_fp != remote_fp {
                                actions.push(SyncAction::Upload {
                                    local_path: path.clone(),
                                    remote_parent: pair.remote_root,
                                });
                            }
                        }
                    }
                    let _ = remote_handle;
                }
                None => {
                    if local.is_dir {
                        actions.push(SyncAction::CreateRemoteFolder {
                            name: sanitized,
                            remote_parent: pair.remote_root,
                        });
                    } else if let Some(fp) = local.fingerprint {
                        match find_rename_candidate(graph, pair.remote_root, fp, &sanitized) {
                            Some((candidate, new_name)) => actions.push(SyncAction::RemoteMove {
                                remote: candidate,
                                new_parent: pair.remote_root,
                                new_name,
                            }),
                            None => actions.push(SyncAction::Upload {
                                local_path: path.clone(),
                                remote_parent: pair.remote_root,
                            }),
                        }
                    } else {
                        actions.push(SyncAction::Upload {
                            local_path: path.clone(),
                            remote_parent: pair.remote_root,
                        });
                    }
                }
            }
        }

        actions
    }
}

fn node_fingerprint(node: &crate::types::node::Node) -> Option<Fingerprint> {
    match &node.key_state {
        NodeKeyState::Decrypted { fingerprint, .. } => *fingerprint,
        NodeKeyState::NoKey { .. } => None,
    }
}

/// Decrypted children of `parent`, indexed by sanitized name (spec
/// §4.5: "Build a name-indexed map of R's decrypted children").
fn children_by_name(graph: &Graph, parent: Handle) -> HashMap<String, (Handle, crate::types::node::Node)> {
    let mut map = HashMap::new();
    for handle in graph.children_of(&parent) {
        let Some(node) = graph.get(&handle) else { continue };
        let Some(name) = node.key_state.name() else { continue };
        map.insert(sanitize_name(name), (handle, node));
    }
    map
}

/// Look for a remote node elsewhere in the tree with a matching
/// fingerprint and a plausible name match, to treat a new local file as
/// a move rather than a fresh upload (spec §4.5 "Rename/move
/// detection"). Only candidates currently parented under `search_root`
/// qualify, keeping the search bounded to this sync pair's subtree.
fn find_rename_candidate(graph: &Graph, search_root: Handle, fp: Fingerprint, target_name: &str) -> Option<(Handle, String)> {
    for handle in graph.fingerprints.lookup(&fp) {
        let Some(node) = graph.get(&handle) else { continue };
        if !is_descendant_or_self(graph, search_root, node.parent) {
            continue;
        }
        if node.key_state.name() != Some(target_name) {
            return Some((handle, target_name.to_owned()));
        }
    }
    None
}

fn find_local_with_fingerprint(pair: &SyncPair, fp: Fingerprint) -> Option<&LocalNode> {
    pair.local_nodes.values().find(|n| n.fingerprint == Some(fp))
}

fn is_descendant_or_self(graph: &Graph, root: Handle, mut candidate: Handle) -> bool {
    let mut guard = 0;
    loop {
        if candidate == root {
            return true;
        }
        let Some(node) = graph.get(&candidate) else { return false };
        if node.node_type.is_root() {
            return false;
        }
        candidate = node.parent;
        guard += 1;
        if guard > 10_000 {
            return false;
        }
    }
}
