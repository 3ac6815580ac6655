// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! Uniform error kinds surfaced to the host, independent of whatever
//! transport/filesystem/crypto error produced them (spec §7).

use crate::handle::Handle;
use thiserror::Error;

/// Specialisation of `std::Result` for the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every fallible operation in the crate returns one of these kinds.
/// The host is never given a raw HTTP status or JSON value, only a kind.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Connectivity lost, HTTP 5xx, or the long-poll reported the
    /// server-busy marker. Handled internally with backoff; surfaced
    /// to the host only as a `notify_retry` tick.
    #[error("transient network failure: {0}")]
    NetworkTransient(String),

    /// `EAGAIN`/`ERATELIMIT` from the command pipeline.
    #[error("rate limited, retry scheduled")]
    RateLimited,

    /// `ESID` (session invalidated) or `EBLOCKED` (account locked).
    #[error("authentication invalid: {reason}")]
    AuthInvalid {
        /// Human-readable reason, not derived from raw server text.
        reason: &'static str,
    },

    /// `ETOOMANY`: the server wants a full reload of node state.
    #[error("server requested a full reload")]
    ReloadRequired,

    /// Certificate pinning failure (`ESSL`).
    #[error("certificate pinning failure")]
    CertificatePinning,

    /// `EOVERQUOTA`, with the server-specified cooldown.
    #[error("storage/bandwidth overquota, retry after {retry_after_secs}s")]
    Overquota {
        /// Seconds until the quota window elapses.
        retry_after_secs: u32,
    },

    /// Account requires payment before the operation can proceed.
    #[error("paywall")]
    Paywall,

    /// A node's key could not be unwrapped with any key currently held.
    /// Not retried as transient; the node stays `NoKey`.
    #[error("node {0} could not be decrypted with any available key")]
    KeyUnwrapFailed(Handle),

    /// A transfer's computed meta-MAC does not match the value embedded
    /// in the node key. Terminal for the transfer.
    #[error("meta-MAC mismatch for node {0}")]
    MacMismatch(Handle),

    /// The attribute blob decrypted but the "MEGA{" magic was absent.
    #[error("attribute blob magic prefix missing")]
    AttrMagicMissing,

    /// Filesystem operation failed but is expected to succeed on retry
    /// (sharing violation, access denied, disk full during a held lock).
    #[error("transient filesystem error: {0}")]
    FsTransient(String),

    /// Filesystem operation failed for a reason retrying cannot fix
    /// (ENOENT on a required path, invalid path).
    #[error("permanent filesystem error: {0}")]
    FsPermanent(String),

    /// Malformed JSON or an action packet of unexpected shape. The
    /// element is skipped and processing advances; repeated violations
    /// upgrade to [`Error::ReloadRequired`].
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Per-command semantic error returned by a specific command handler.
    #[error("command error: {0}")]
    Command(#[from] crate::pipeline::CommandError),

    /// A cryptographic primitive failed for a reason that is not a key
    /// mismatch (e.g. RSA decrypt padding error on a malformed blob).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The local cache holds a serialized record newer than this build
    /// understands how to read.
    #[error("persisted record version mismatch for key {0}")]
    PersistenceVersion(String),

    /// No more local storage slots to place an in-flight download's
    /// temporary file; the caller should retry after backoff.
    #[error("no local storage available")]
    NoLocalStorage,
}

impl Error {
    /// True for the subset of kinds the pipeline/transfer engine retries
    /// automatically rather than surfacing to the host as terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NetworkTransient(_) | Error::RateLimited | Error::FsTransient(_)
        )
    }
}
