// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! The HTTP transport boundary (spec §1, §6): out of scope for the
//! core, specified only as the interface it consumes.

use async_trait::async_trait;
use bytes::Bytes;

/// Outcome of a single HTTP round trip, reduced to what the pipeline
/// needs to decide retry/backoff (spec §4.1, §7): the core never
/// inspects a raw status code beyond this classification.
#[derive(Debug)]
pub enum TransportOutcome {
    /// 2xx with a body.
    Ok(Bytes),
    /// Connectivity lost, timeout, or 5xx: retry with backoff.
    Transient,
    /// 509: quota exhausted, with the server-specified cooldown if present.
    Overquota { retry_after_secs: Option<u32> },
    /// 403/404: the resource (e.g. a temp URL) is gone and must be
    /// re-requested rather than retried as-is.
    Gone,
    /// TLS/certificate pinning failure.
    CertificateError,
}

/// What the host's HTTP client must provide. Implementations own actual
/// connection pooling, TLS, and retries at the socket level; the core
/// only asks for round trips and classifies the result.
#[async_trait]
pub trait CommandTransport: Send + Sync + std::fmt::Debug {
    /// POST a command batch to `/cs?id=<reqid>&sid=<session>` (plus any
    /// other query parameters already baked into `url` by the caller).
    async fn post(&self, url: &str, body: Bytes) -> TransportOutcome;

    /// GET a long-poll response from `/wsc?sn=<scsn>`, returning once the
    /// server replies or `timeout` elapses (caller treats a local
    /// timeout as [`TransportOutcome::Transient`]).
    async fn long_poll(&self, url: &str, timeout: std::time::Duration) -> TransportOutcome;

    /// GET a byte range from a temporary transfer/direct-read URL.
    async fn get_range(&self, url: &str, range: std::ops::Range<u64>) -> TransportOutcome;

    /// POST ciphertext bytes to an upload temp URL, optionally at a
    /// specific chunk offset (`?c=<offset>`).
    async fn put_chunk(&self, url: &str, offset: Option<u64>, data: Bytes) -> TransportOutcome;
}
