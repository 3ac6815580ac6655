// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option.

//! C1: exponential backoff and deadline primitives shared by the
//! pipeline, transfer engine, and sync reconciler.

use rand::Rng;
use std::time::{Duration, Instant};

/// A capped exponential backoff with jitter, armed on first failure and
/// disarmed on success. Doubling from an initial delay up to a cap, with
/// a jitter fraction applied symmetrically around the computed delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Build a backoff that starts at `initial`, doubles each failure,
    /// and never exceeds `max`, jittered by `± jitter` (e.g. `0.2`).
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max,
            jitter,
            attempt: 0,
        }
    }

    /// Record a failure and return the delay to wait before retrying.
    pub fn fail(&mut self) -> Duration {
        let factor = 1u64 << self.attempt.min(20);
        let base = self.initial.saturating_mul(factor as u32).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        jittered(base, self.jitter)
    }

    /// Reset to the unarmed state after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of consecutive failures recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    let nanos = (base.as_nanos() as f64 * factor).max(0.0);
    Duration::from_nanos(nanos as u64)
}

/// A one-shot deadline: armed with a duration from "now", fires once
/// `Instant::now() >= deadline`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Arm a deadline `delay` from now.
    pub fn after(delay: Duration) -> Self {
        Self {
            at: Instant::now() + delay,
        }
    }

    /// Arm a deadline at an explicit instant (for resumed/persisted state).
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// True once the deadline has passed.
    pub fn fired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Remaining time until the deadline, zero if already fired.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// The instant the deadline fires, for computing a driver wake time.
    pub fn instant(&self) -> Instant {
        self.at
    }
}

/// Reduces a set of pending deadlines to the single instant the driver
/// should sleep until, or `None` if nothing is pending (host waits for
/// the next external event only).
pub fn earliest(deadlines: impl IntoIterator<Item = Deadline>) -> Option<Instant> {
    deadlines.into_iter().map(|d| d.instant()).min()
}
