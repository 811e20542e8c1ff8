//! Intercept, buffer, and deliberately deliver messages between replicas of a system under test.
//!
//! Replicas are instrumented to route every outgoing message through the [Network] (over HTTP)
//! instead of sending it directly. The fuzzing driver decides when (and how many) messages flow
//! between each pair of replicas with [Network::schedule], and every delivery, lifecycle event,
//! and client request is recorded as an [modelfuzz_trace::Event] for the oracle to replay.
//!
//! # Endpoints
//!
//! * `POST /replica`: `{"id": .., "addr": "host:port"}` registers a replica.
//! * `POST /message`: `{"from", "to", "type", "data", "params"}` buffers a message.
//! * `POST /event`: a lifecycle event (optionally encoded twice) with at least `type` and
//!   `server_id`.
//!
//! Successful requests receive `{"message": "ok"}`. Malformed requests receive a 400 with
//! `{"error": ..}` and have no effect.
//!
//! Scheduled messages are delivered with `POST http://<addr>/schedule_<from>`, carrying the
//! message JSON encoded as a JSON string.
//!
//! # Status
//!
//! `modelfuzz-network` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

mod ingress;
pub mod mapping;
mod network;
pub mod telemetry;

pub use mapping::{Lifecycle, Message};
pub use network::{Config, Network};

use thiserror::Error;

/// Errors that can occur when interacting with the [Network].
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("expected a json object")]
    UnexpectedJson,
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
    #[error("failed to bind: {0}")]
    Bind(std::io::Error),
    #[error("already started")]
    AlreadyStarted,
    #[error("not running within a tokio runtime")]
    NoRuntime,
    #[error("client error: {0}")]
    Client(#[from] reqwest::Error),
}
