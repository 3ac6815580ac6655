// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C2: the command pipeline. Batches outstanding commands into a single
//! JSON array request, posts it through [`CommandTransport`], and routes
//! each element of the JSON array response back to its caller.

use crate::timer::Backoff;
use crate::transport::{CommandTransport, TransportOutcome};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::sync::{oneshot, Mutex};

/// Per-command semantic failure, one of the server's documented negative
/// error codes that is not handled internally as a pipeline-wide
/// condition (spec §4.1, §7: "special codes are handled internally ...
/// everything else is surfaced per-command").
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
#[error("command failed: {name} ({code})")]
pub struct CommandError {
    pub code: i32,
    pub name: &'static str,
}

impl CommandError {
    fn from_code(code: i32) -> Self {
        let name = match code {
            -1 => "EINTERNAL",
            -2 => "EARGS",
            -5 => "EFAILED",
            -7 => "ERANGE",
            -8 => "EEXPIRED",
            -9 => "ENOENT",
            -10 => "ECIRCULAR",
            -11 => "EACCESS",
            -12 => "EEXIST",
            -13 => "EINCOMPLETE",
            -14 => "EKEY",
            _ => "EUNKNOWN",
        };
        CommandError { code, name }
    }
}

/// Negative top-level codes the pipeline resolves itself rather than
/// handing back to the caller as a [`CommandError`] (spec §4.1, §7).
fn classify_pipeline_wide(code: i32) -> Option<Error> {
    match code {
        -3 => Some(Error::RateLimited), // EAGAIN
        -4 => Some(Error::RateLimited), // ERATELIMIT
        -6 => Some(Error::ReloadRequired), // ETOOMANY
        -15 => Some(Error::AuthInvalid { reason: "ESID" }),
        -16 => Some(Error::AuthInvalid { reason: "EBLOCKED" }),
        -17 => Some(Error::Overquota { retry_after_secs: 0 }),
        -24 => Some(Error::Overquota { retry_after_secs: 0 }), // EGOINGOVERQUOTA
        _ => None,
    }
}

struct PendingCommand {
    reqid: u64,
    body: serde_json::Value,
    responder: oneshot::Sender<Result<serde_json::Value>>,
}

/// A single queued command plus its eventual result, returned by
/// [`Pipeline::enqueue`] so the caller can await it independently of
/// when the batch it lands in actually ships.
pub struct Enqueued {
    pub reqid: u64,
    receiver: oneshot::Receiver<Result<serde_json::Value>>,
}

impl Enqueued {
    pub async fn wait(self) -> Result<serde_json::Value> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(Error::Protocol("pipeline dropped without a response".into())))
    }
}

/// Batches commands and drives the request/response cycle against the
/// `/cs` endpoint (spec §4.1). One instance per logged-in session.
#[derive(Debug)]
pub struct Pipeline {
    transport: Arc<dyn CommandTransport>,
    base_url: String,
    queue: Mutex<VecDeque<PendingCommand>>,
    next_reqid: AtomicU64,
    backoff: Mutex<Backoff>,
}

impl std::fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommand").field("reqid", &self.reqid).finish()
    }
}

impl Pipeline {
    pub fn new(transport: Arc<dyn CommandTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            queue: Mutex::new(VecDeque::new()),
            next_reqid: AtomicU64::new(1),
            backoff: Mutex::new(Backoff::new(Duration::from_millis(250), Duration::from_secs(30), 0.2)),
        }
    }

    /// Queue one command for the next batch. Does not send anything; the
    /// driver calls [`Pipeline::exec`] on its own schedule so independent
    /// commands issued in the same tick still coalesce into one request.
    #[instrument(skip(self, body), level = "debug")]
    pub async fn enqueue(&self, body: serde_json::Value) -> Enqueued {
        let reqid = self.next_reqid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.queue.lock().await.push_back(PendingCommand {
            reqid,
            body,
            responder: tx,
        });
        Enqueued { reqid, receiver: rx }
    }

    /// True when commands are queued but not yet sent; the driver uses
    /// this to decide whether a tick has work to do.
    pub async fn has_pending(&self) -> bool {
        !self.queue.lock().await.is_empty()
    }

    /// Drain the queue into one batch, post it, and dispatch each
    /// response element back to its waiter. Returns the delay the caller
    /// should wait before the next `exec` if the whole batch needs a
    /// retry (lock-probe or transient failure), or `None` if it shipped
    /// (regardless of whether individual commands then failed).
    #[instrument(skip(self), level = "debug")]
    pub async fn exec(&self) -> Option<Duration> {
        let mut guard = self.queue.lock().await;
        if guard.is_empty() {
            return None;
        }
        let batch: Vec<PendingCommand> = guard.drain(..).collect();
        drop(guard);

        let ids: Vec<u64> = batch.iter().map(|c| c.reqid).collect();
        let values: Vec<&serde_json::Value> = batch.iter().map(|c| &c.body).collect();
        let url = format!("{}/cs?id={}", self.base_url, ids.first().copied().unwrap_or(0));
        let payload = Bytes::from(serde_json::to_vec(&values).unwrap_or_default());

        match self.transport.post(&url, payload).await {
            TransportOutcome::Ok(bytes) => self.handle_response(batch, &bytes).await,
            TransportOutcome::Transient => {
                let delay = self.backoff.lock().await.fail();
                self.requeue(batch).await;
                Some(delay)
            }
            TransportOutcome::Overquota { retry_after_secs } => {
                let retry_after_secs = retry_after_secs.unwrap_or(60);
                self.fail_all(batch, || Error::Overquota { retry_after_secs });
                Some(Duration::from_secs(u64::from(retry_after_secs)))
            }
            TransportOutcome::Gone => {
                self.fail_all(batch, || Error::ReloadRequired);
                None
            }
            TransportOutcome::CertificateError => {
                self.fail_all(batch, || Error::CertificatePinning);
                None
            }
        }
    }

    /// Re-push at the front of the queue so ordering with anything
    /// enqueued meanwhile is preserved as closely as possible (spec
    /// §4.1: a whole batch retried after a transient failure keeps its
    /// original relative order against new arrivals).
    async fn requeue(&self, batch: Vec<PendingCommand>) {
        let mut guard = self.queue.lock().await;
        for item in batch.into_iter().rev() {
            guard.push_front(item);
        }
    }

    fn fail_all(&self, batch: Vec<PendingCommand>, err: impl Fn() -> Error) {
        for cmd in batch {
            let _ = cmd.responder.send(Err(err()));
        }
    }

    /// Parse the top-level JSON array response and route each element,
    /// or fall back to a full-batch retry for a lock probe.
    ///
    /// A bare negative integer at the top level (not per-element) means
    /// the whole batch failed before any command ran (spec §4.1 "lock
    /// probe": the server responds with a single `-3` while a concurrent
    /// actor holds the write lock). When that code is one the pipeline
    /// treats as retryable the batch is requeued whole rather than
    /// surfaced to callers; any other top-level code is terminal for the
    /// batch and is reported to every caller.
    async fn handle_response(&self, batch: Vec<PendingCommand>, bytes: &[u8]) -> Option<Duration> {
        let parsed: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                self.fail_all(batch, || Error::Protocol(format!("malformed response: {e}")));
                return None;
            }
        };

        if let Some(code) = parsed.as_i64() {
            let code = code as i32;
            if let Some(err) = classify_pipeline_wide(code) {
                if err.is_transient() {
                    let delay = self.backoff.lock().await.fail();
                    self.requeue(batch).await;
                    return Some(delay);
                }
            }
            self.backoff.lock().await.reset();
            self.fail_all(batch, move || {
                classify_pipeline_wide(code).unwrap_or(Error::Command(CommandError::from_code(code)))
            });
            return None;
        }

        self.backoff.lock().await.reset();

        let Some(elements) = parsed.as_array() else {
            self.fail_all(batch, || Error::Protocol("response was not an array".into()));
            return None;
        };

        for (cmd, element) in batch.into_iter().zip(elements.iter()) {
            let result = match element.as_i64() {
                Some(code) if code < 0 => {
                    let code = code as i32;
                    Err(classify_pipeline_wide(code).unwrap_or(Error::Command(CommandError::from_code(code))))
                }
                _ => Ok(element.clone()),
            };
            let _ = cmd.responder.send(result);
        }
        None
    }
}
