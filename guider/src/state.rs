//! Guide executions towards abstract states that have not been seen before.

use crate::{consult, record, Error, FailurePolicy, Guider, Novelty};
use modelfuzz_oracle::Oracle;
use modelfuzz_trace::{EventTrace, Paths, Trace};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Configuration for a [StateGuider].
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory that receives one record file per recorded iteration.
    pub record_dir: PathBuf,

    /// What to do when the oracle fails.
    pub policy: FailurePolicy,
}

impl Config {
    /// Record into `record_dir`, ignoring oracle failures.
    pub fn new(record_dir: PathBuf) -> Self {
        Self {
            record_dir,
            policy: FailurePolicy::Ignore,
        }
    }
}

/// [Guider] that counts abstract states never returned by the oracle before.
///
/// Every path the oracle returns is also kept (see [StateGuider::paths]) so the campaign can be
/// analyzed offline.
pub struct StateGuider<O: Oracle> {
    oracle: O,
    cfg: Config,

    states: HashSet<i64>,
    paths: Paths,
}

impl<O: Oracle> StateGuider<O> {
    /// Create a new guider.
    pub fn new(oracle: O, cfg: Config) -> Self {
        Self {
            oracle,
            cfg,
            states: HashSet::new(),
            paths: Paths::new(),
        }
    }

    /// Every non-empty path observed, in the order executions were checked.
    ///
    /// Unlike the state set, paths survive [Guider::reset].
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Write [StateGuider::paths] to `file` as JSON.
    pub fn dump_paths(&self, file: &Path) -> Result<(), Error> {
        record::write_json(file, &self.paths)
    }
}

impl<O: Oracle> Guider for StateGuider<O> {
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
        if !states.is_empty() {
            self.paths.push(states.clone());
        }

        // Persist execution
        if record {
            if let Err(err) =
                record::write_record(&self.cfg.record_dir, iteration, trace, events, &states)
            {
                warn!(?err, iteration, "failed to record execution");
            }
        }

        // Count unseen states
        let mut count = 0;
        for state in &states {
            if self.states.insert(state.key) {
                count += 1;
            }
        }
        debug!(iteration, states = states.len(), new = count, "checked states");
        Ok(Novelty::new(count))
    }

    fn coverage(&self) -> usize {
        self.states.len()
    }

    fn reset(&mut self) {
        self.states.clear();
    }
}
