//! Guide executions towards short runs of abstract states that have not been seen before.
//!
//! Rather than scoring whole paths, every window of `k` consecutive states in the path returned
//! by the oracle is fingerprinted. Consecutive windows share `k - 1` states, so an execution that
//! reorders a few local steps is rewarded even if all of its states were seen before.

use crate::{consult, record, Error, FailurePolicy, Guider, Novelty};
use modelfuzz_oracle::Oracle;
use modelfuzz_trace::{EventTrace, TlcState, Trace};
use modelfuzz_utils::Fnv64;
use std::{
    collections::{BTreeMap, HashSet},
    hash::Hasher,
    path::PathBuf,
};
use tracing::{debug, warn};

/// Configuration for a [KPathGuider].
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory that receives coverage statistics and records.
    pub working_dir: PathBuf,

    /// Number of consecutive states in a window.
    pub k: usize,

    /// What to do when the oracle fails.
    pub policy: FailurePolicy,
}

impl Config {
    /// Windows of 2 states, failing on oracle errors.
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            k: 2,
            policy: FailurePolicy::Fail,
        }
    }
}

/// Every window of `k` consecutive states in `states`, in order.
///
/// A sequence shorter than `k` forms a single window. `k` must be positive.
pub fn windows(states: &[TlcState], k: usize) -> impl Iterator<Item = &[TlcState]> {
    let (size, count) = if k > states.len() {
        (states.len(), 1)
    } else {
        (k, states.len() - k + 1)
    };
    (0..count).map(move |start| &states[start..start + size])
}

/// Order-sensitive fingerprint of the keys in `window`.
pub fn fingerprint(window: &[TlcState]) -> u64 {
    let mut hasher = Fnv64::new();
    for state in window {
        hasher.write(&(state.key as u64).to_le_bytes());
    }
    hasher.finish()
}

/// [Guider] that counts windows of `k` consecutive states never seen before.
pub struct KPathGuider<O: Oracle> {
    oracle: O,
    cfg: Config,

    states: BTreeMap<i64, String>,
    windows: HashSet<u64>,
}

impl<O: Oracle> KPathGuider<O> {
    /// Create a new guider.
    pub fn new(oracle: O, cfg: Config) -> Result<Self, Error> {
        if cfg.k == 0 {
            return Err(Error::InvalidWindow);
        }
        Ok(Self {
            oracle,
            cfg,
            states: BTreeMap::new(),
            windows: HashSet::new(),
        })
    }

    /// Number of distinct windows seen since the last reset.
    pub fn windows(&self) -> usize {
        self.windows.len()
    }
}

impl<O: Oracle> Guider for KPathGuider<O> {
    fn check(
        &mut self,
        iteration: &str,
        trace: &Trace,
        events: &EventTrace,
        record: bool,
    ) -> Result<Novelty, Error> {
        let Some(states) = consult(&self.oracle, events, self.cfg.policy)? else {
            return Ok(Novelty::none());
        };

        // Persist execution
        if record {
            let dir = self.cfg.working_dir.join("records");
            if let Err(err) = record::write_record(&dir, iteration, trace, events, &states) {
                warn!(?err, iteration, "failed to record execution");
            }
        }

        // Track distinct states
        for state in &states {
            self.states
                .entry(state.key)
                .or_insert_with(|| state.repr.clone());
        }

        // Count unseen windows
        let mut count = 0;
        for window in windows(&states, self.cfg.k) {
            if self.windows.insert(fingerprint(window)) {
                count += 1;
            }
        }
        debug!(
            iteration,
            states = states.len(),
            k = self.cfg.k,
            new = count,
            "checked windows"
        );
        Ok(Novelty::new(count))
    }

    /// Also appends the window and state counts to the statistics time series and logs states
    /// first seen since the previous report.
    fn coverage(&self) -> usize {
        let dir = &self.cfg.working_dir;
        if let Err(err) = record::append_stats(dir, self.windows.len(), self.states.len()) {
            warn!(?err, "failed to persist coverage statistics");
        }
        if let Err(err) = record::append_unique_states(dir, &self.states) {
            warn!(?err, "failed to persist unique states");
        }
        self.states.len()
    }

    fn reset(&mut self) {
        self.states.clear();
        self.windows.clear();
    }
}
