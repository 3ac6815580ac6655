// Copyright (c) 2026 Vault Core Contributors
//
// Licensed under either of Apache License, Version 2.0 or MIT license
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Client-side engine for an encrypted cloud storage service.
//!
//! This crate does not talk to a network or a filesystem directly: the
//! host application supplies concrete implementations of
//! [`transport::CommandTransport`], [`fsadapter::FileSystem`],
//! [`crypto::CryptoProvider`] and [`persistence::KvStore`], and drives
//! the engine by calling [`driver::Driver::tick`] in a loop.
//!
//! ## Basic usage
//!
//! Construct a [`driver::Driver`] with a [`config::Config`] and the four
//! adapters above, establish a session with [`driver::Driver::set_session_key`]
//! and [`driver::Driver::fetch_nodes`], then call `tick()` whenever the
//! host's waiter wakes up (network I/O ready, filesystem notification, or
//! a computed deadline elapses).

#![forbid(unsafe_code)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]

#[macro_use]
extern crate tracing;

pub mod config;
pub mod crypto;
pub mod directread;
pub mod driver;
pub mod error;
pub mod events;
pub mod fsadapter;
pub mod graph;
pub mod handle;
pub mod link;
pub mod mediaattr;
pub mod persistence;
pub mod pipeline;
pub mod state;
pub mod sync;
pub mod timer;
pub mod transport;
pub mod transfer;
pub mod types;
pub mod callbacks;

pub use error::{Error, Result};
pub use handle::Handle;
