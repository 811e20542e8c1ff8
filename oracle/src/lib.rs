//! Map event traces to abstract state sequences with an external model checker.
//!
//! The oracle is a TLC instance that replays an [EventTrace] against a model of the protocol
//! and reports every abstract state the model visited, in order. [TlcClient] talks to it over
//! HTTP; [mocks::Scripted] stands in for it in tests.
//!
//! # Status
//!
//! `modelfuzz-oracle` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use modelfuzz_trace::{EventTrace, TlcState};
use std::sync::Arc;
use thiserror::Error;

mod client;
pub use client::{Config, TlcClient};
pub mod mocks;

/// Errors that can occur when communicating with an [Oracle].
#[derive(Debug, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status: {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Interface to a model checker that maps an [EventTrace] to the abstract states it visits.
pub trait Oracle {
    /// Replay `events` and return the visited states in order.
    ///
    /// Returned representations are raw (not canonicalized).
    fn send_trace(&self, events: &EventTrace) -> Result<Vec<TlcState>, Error>;
}

impl<O: Oracle + ?Sized> Oracle for Arc<O> {
    fn send_trace(&self, events: &EventTrace) -> Result<Vec<TlcState>, Error> {
        (**self).send_trace(events)
    }
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn send_trace(&self, events: &EventTrace) -> Result<Vec<TlcState>, Error> {
        (**self).send_trace(events)
    }
}
