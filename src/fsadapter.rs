// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The filesystem-access boundary (spec §6): the only interface the
//! core needs from the OS.

use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A single directory-notify event.
#[derive(Clone, Debug)]
pub enum NotifyEvent {
    Changed(PathBuf),
    Created(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// The watch failed or its event queue overflowed; the sync
    /// reconciler must fall back to a full rescan (spec §4.5 "Scan
    /// failure recovery").
    FailedOrOverflowed,
}

/// File metadata the reconciler needs.
#[derive(Clone, Copy, Debug)]
pub struct Stat {
    pub size: u64,
    pub mtime: SystemTime,
    pub is_dir: bool,
}

/// The filesystem operations the core needs from the host (spec §6).
#[async_trait]
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    async fn stat(&self, path: &Path) -> Result<Stat>;
    async fn open_read(&self, path: &Path) -> Result<Box<dyn AsyncFileHandle>>;
    async fn open_write(&self, path: &Path) -> Result<Box<dyn AsyncFileHandle>>;
    async fn truncate(&self, path: &Path, len: u64) -> Result<()>;
    async fn mkdir(&self, path: &Path) -> Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    async fn unlink(&self, path: &Path) -> Result<()>;
    async fn rmdir(&self, path: &Path) -> Result<()>;
    async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
    async fn set_mtime(&self, path: &Path, mtime: SystemTime) -> Result<()>;
    /// Case-preserving short name, for filesystems that need it (spec §6).
    async fn shortname(&self, path: &Path) -> Result<Option<String>>;
    fn normalize_path(&self, path: &Path) -> PathBuf;

    /// Subscribe to notifications under `root`. Delivery order is not
    /// guaranteed across distinct roots.
    async fn notify(&self, root: &Path) -> Result<tokio::sync::mpsc::Receiver<NotifyEvent>>;
}

/// A handle to an open file supporting positioned reads/writes, used by
/// the transfer engine to place chunks out of order (spec §4.4).
#[async_trait]
pub trait AsyncFileHandle: Send + Sync {
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    async fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;
}

/// Idempotent filesystem-safe name sanitisation (spec §8 invariant 6:
/// `sanitized_name` must be idempotent). Replaces characters invalid on
/// common host filesystems with `_`.
pub fn sanitize_name(name: &str) -> String {
    const INVALID: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
    let sanitized: String = name
        .chars()
        .map(|c| if INVALID.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = sanitized.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "_".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_is_idempotent() {
        for raw in ["a/b\\c:d*e?f\"g<h>i|j", "trailing.", "   ", "", "plain-name.txt"] {
            let once = sanitize_name(raw);
            let twice = sanitize_name(&once);
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn sanitize_name_never_produces_empty_string() {
        assert_eq!(sanitize_name(""), "_");
        assert_eq!(sanitize_name("..."), "_");
    }
}
