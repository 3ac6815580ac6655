// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C5: the user/contact/share state store (spec §4.2, §3).

use crate::handle::Handle;
use crate::types::pcr::PendingContactRequest;
use crate::types::user::{User, Visibility};
use crate::{Error, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::RwLock;

/// Known users, keyed by handle, with a bijective email index (spec §3:
/// "The email/handle mapping is bijective among active users"). The
/// email index is a plain `RwLock<HashMap>` rather than a second
/// `DashMap`: every mutation must touch both the user record and the
/// index atomically, which a single lock gives for free.
#[derive(Debug, Default)]
pub struct UserStore {
    users: DashMap<Handle, User>,
    by_email: RwLock<HashMap<String, Handle>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user, maintaining the email index. Rejects an
    /// insert that would bind an email already bound to a different,
    /// still-visible handle (spec §3 bijectivity).
    pub fn upsert(&self, user: User) -> Result<()> {
        let mut index = self.by_email.write().unwrap();

        if let Some(&existing_handle) = index.get(&user.email) {
            if existing_handle != user.handle {
                if let Some(existing) = self.users.get(&existing_handle) {
                    if existing.visibility != Visibility::Hidden && existing.visibility != Visibility::Unknown {
                        return Err(Error::Protocol(format!(
                            "email {} already bound to a different active user",
                            user.email
                        )));
                    }
                }
                index.remove(&user.email);
            }
        }

        if let Some(previous) = self.users.get(&user.handle) {
            if previous.email != user.email {
                index.remove(&previous.email);
            }
        }

        index.insert(user.email.clone(), user.handle);
        self.users.insert(user.handle, user);
        Ok(())
    }

    pub fn get(&self, handle: &Handle) -> Option<User> {
        self.users.get(handle).map(|u| u.clone())
    }

    pub fn by_email(&self, email: &str) -> Option<Handle> {
        self.by_email.read().unwrap().get(&email.to_lowercase()).copied()
    }

    /// Apply an email change (`se` action packet): re-keys the index
    /// without touching the handle.
    pub fn change_email(&self, handle: Handle, new_email: &str) -> Result<()> {
        let mut user = self.get(&handle).ok_or_else(|| Error::Protocol(format!("unknown user {handle}")))?;
        let mut index = self.by_email.write().unwrap();
        index.remove(&user.email);
        user.email = new_email.to_lowercase();
        index.insert(user.email.clone(), handle);
        drop(index);
        self.users.insert(handle, user);
        Ok(())
    }

    pub fn set_visibility(&self, handle: Handle, visibility: Visibility) {
        if let Some(mut user) = self.users.get_mut(&handle) {
            user.visibility = visibility;
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Pending contact requests, keyed by their server-assigned id.
#[derive(Debug, Default)]
pub struct PcrStore {
    by_id: DashMap<String, PendingContactRequest>,
}

impl PcrStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, pcr: PendingContactRequest) {
        self.by_id.insert(pcr.id.clone(), pcr);
    }

    pub fn get(&self, id: &str) -> Option<PendingContactRequest> {
        self.by_id.get(id).map(|p| p.clone())
    }

    /// Mark deleted rather than remove, matching the server's soft-delete
    /// semantics for PCR history.
    pub fn mark_deleted(&self, id: &str, deleted_at: i64) {
        if let Some(mut pcr) = self.by_id.get_mut(id) {
            pcr.deleted_at = Some(deleted_at);
        }
    }

    pub fn active(&self) -> Vec<PendingContactRequest> {
        self.by_id.iter().filter(|e| e.deleted_at.is_none()).map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pcr::PcrDirection;

    fn sample_user(handle: Handle, email: &str) -> User {
        let mut user = User::new(handle, email);
        user.visibility = Visibility::Visible;
        user
    }

    #[test]
    fn upsert_indexes_by_lowercased_email() {
        let store = UserStore::new();
        let h = Handle([1; 6]);
        store.upsert(sample_user(h, "Alice@Example.com")).unwrap();
        assert_eq!(store.by_email("alice@example.com"), Some(h));
    }

    #[test]
    fn rejects_email_collision_with_another_active_user() {
        let store = UserStore::new();
        let a = Handle([1; 6]);
        let b = Handle([2; 6]);
        store.upsert(sample_user(a, "shared@example.com")).unwrap();
        assert!(store.upsert(sample_user(b, "shared@example.com")).is_err());
    }

    #[test]
    fn change_email_rekeys_the_index() {
        let store = UserStore::new();
        let h = Handle([1; 6]);
        store.upsert(sample_user(h, "old@example.com")).unwrap();
        store.change_email(h, "new@example.com").unwrap();
        assert_eq!(store.by_email("old@example.com"), None);
        assert_eq!(store.by_email("new@example.com"), Some(h));
    }

    #[test]
    fn pcr_store_hides_deleted_requests_from_active() {
        let store = PcrStore::new();
        store.upsert(PendingContactRequest {
            id: "pcr-1".into(),
            originator_email: "a@example.com".into(),
            target_email: "b@example.com".into(),
            created_at: 0,
            updated_at: 0,
            reminded_at: None,
            deleted_at: None,
            message: None,
            direction: PcrDirection::Outgoing,
        });
        assert_eq!(store.active().len(), 1);
        store.mark_deleted("pcr-1", 100);
        assert_eq!(store.active().len(), 0);
    }
}
