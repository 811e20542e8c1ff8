//! Score executions by the novelty of the abstract states and event orders they reach.
//!
//! A [Guider] consumes the [EventTrace] of a finished execution and reports how much previously
//! unseen coverage it contributed. The search driver keeps (and mutates) executions with a
//! non-zero [Novelty].
//!
//! Three signals are available:
//!
//! * [state::StateGuider]: distinct abstract states returned by the oracle.
//! * [trace::TraceGuider]: distinct per-replica causal orderings of events, layered over
//!   another guider that keeps tracking state coverage.
//! * [kpath::KPathGuider]: distinct windows of `k` consecutive abstract states.
//!
//! Coverage sets only grow between calls to [Guider::reset]. Guiders are not safe for concurrent
//! use: each campaign drives its own instance from a single loop.
//!
//! # Oracle Failures
//!
//! Each guider carries a [FailurePolicy]. With [FailurePolicy::Ignore], an unreachable or
//! misbehaving oracle is logged and the execution is scored as contributing nothing. With
//! [FailurePolicy::Fail], [Guider::check] returns [Error::Oracle] and the caller is expected to
//! stop the campaign (a k-path campaign without oracle answers measures nothing).
//!
//! # Status
//!
//! `modelfuzz-guider` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use modelfuzz_oracle::Oracle;
use modelfuzz_trace::{canonicalize_all, EventTrace, TlcState, Trace};
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

pub mod kpath;
mod record;
pub use record::{read_stats, read_unique_states, Stats, UniqueStates};
pub mod state;
pub mod trace;

/// Errors that can occur when checking an execution.
#[derive(Debug, Error)]
pub enum Error {
    #[error("oracle error: {0}")]
    Oracle(#[from] modelfuzz_oracle::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("window length must be positive")]
    InvalidWindow,
}

/// What to do when the oracle cannot map an execution to states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure and report no new coverage.
    Ignore,
    /// Surface the failure to the caller.
    Fail,
}

/// Coverage contributed by a single execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Novelty {
    /// Number of previously unseen items the execution covered.
    pub count: usize,
}

impl Novelty {
    /// No new coverage.
    pub const fn none() -> Self {
        Self { count: 0 }
    }

    /// `count` previously unseen items.
    pub const fn new(count: usize) -> Self {
        Self { count }
    }

    /// Returns true if the execution covered anything new.
    pub const fn found(&self) -> bool {
        self.count != 0
    }
}

/// Interface for scoring executions.
pub trait Guider {
    /// Score the execution identified by `iteration`.
    ///
    /// `trace` holds the scheduling choices that produced `events`. If `record` is set, the
    /// execution is persisted for offline analysis.
    fn check(
        &mut self,
        iteration: &str,
        trace: &Trace,
        events: &EventTrace,
        record: bool,
    ) -> Result<Novelty, Error>;

    /// Number of distinct abstract states seen since the last [Guider::reset].
    fn coverage(&self) -> usize;

    /// Forget all coverage seen so far.
    fn reset(&mut self);
}

impl<G: Guider + ?Sized> Guider for Box<G> {
    fn check(
        &mut self,
        iteration: &str,
        trace: &Trace,
        events: &EventTrace,
        record: bool,
    ) -> Result<Novelty, Error> {
        (**self).check(iteration, trace, events, record)
    }

    fn coverage(&self) -> usize {
        (**self).coverage()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Ask `oracle` for the canonical states visited by `events`.
///
/// Returns `None` if the oracle failed and `policy` allows continuing.
fn consult<O: Oracle>(
    oracle: &O,
    events: &EventTrace,
    policy: FailurePolicy,
) -> Result<Option<Vec<TlcState>>, Error> {
    match oracle.send_trace(events) {
        Ok(states) => Ok(Some(canonicalize_all(&states))),
        Err(err) => match policy {
            FailurePolicy::Ignore => {
                warn!(?err, events = events.len(), "oracle failed, skipping coverage");
                Ok(None)
            }
            FailurePolicy::Fail => Err(Error::Oracle(err)),
        },
    }
}

/// Guidance signal used by a campaign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Abstract state coverage.
    Model,
    /// Random search; scored like [Kind::Model] so runs remain comparable.
    Random,
    /// Per-replica event order coverage.
    Trace,
    /// Coverage of windows of `k` consecutive abstract states.
    KPath { k: usize },
}

/// Construct the [Guider] for `kind`.
///
/// `dir` receives per-iteration records (or, for [Kind::KPath], coverage statistics).
pub fn build<O: Oracle + 'static>(
    kind: Kind,
    oracle: O,
    dir: PathBuf,
) -> Result<Box<dyn Guider>, Error> {
    let guider: Box<dyn Guider> = match kind {
        Kind::Model | Kind::Random => {
            Box::new(state::StateGuider::new(oracle, state::Config::new(dir)))
        }
        Kind::Trace => Box::new(trace::TraceGuider::new(state::StateGuider::new(
            oracle,
            state::Config::new(dir),
        ))),
        Kind::KPath { k } => Box::new(kpath::KPathGuider::new(
            oracle,
            kpath::Config {
                k,
                ..kpath::Config::new(dir)
            },
        )?),
    };
    Ok(guider)
}
