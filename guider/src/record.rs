//! Artifacts persisted for offline analysis.

use crate::Error;
use modelfuzz_trace::{EventTrace, TlcState, Trace};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs, io,
    path::Path,
};
use tracing::warn;

/// Time series of coverage sizes, one entry per coverage report.
const STATS_FILE: &str = "kpath_stats.json";

/// Newly seen states, one batch per coverage report.
const UNIQUE_STATES_FILE: &str = "unique_states.json";

/// Everything known about one execution.
#[derive(Serialize)]
struct Record<'a> {
    trace: &'a Trace,
    event_trace: &'a EventTrace,
    state_trace: &'a [TlcState],
}

/// Persist one execution to `<dir>/<iteration>.json`.
pub(crate) fn write_record(
    dir: &Path,
    iteration: &str,
    trace: &Trace,
    events: &EventTrace,
    states: &[TlcState],
) -> Result<(), Error> {
    let record = Record {
        trace,
        event_trace: events,
        state_trace: states,
    };
    let data = serde_json::to_vec_pretty(&record)?;
    fs::create_dir_all(dir)?;
    fs::write(dir.join(format!("{iteration}.json")), data)?;
    Ok(())
}

/// Serialize `value` as pretty JSON to `file`.
pub(crate) fn write_json<T: Serialize + ?Sized>(file: &Path, value: &T) -> Result<(), Error> {
    let data = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file, data)?;
    Ok(())
}

/// Read `file` as JSON, falling back to the default if it is missing or unreadable as `T`.
fn read_json<T: for<'de> Deserialize<'de> + Default>(file: &Path) -> Result<T, Error> {
    let data = match fs::read(file) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => return Err(err.into()),
    };
    match serde_json::from_slice(&data) {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(?err, file = %file.display(), "discarding unreadable contents");
            Ok(T::default())
        }
    }
}

/// Coverage sizes reported over a campaign.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Distinct k-windows at each report.
    #[serde(default)]
    pub coverages: Vec<usize>,

    /// Distinct abstract states at each report.
    #[serde(default)]
    pub states: Vec<usize>,
}

/// Append one coverage report to `<dir>/kpath_stats.json`.
pub(crate) fn append_stats(dir: &Path, windows: usize, states: usize) -> Result<(), Error> {
    let file = dir.join(STATS_FILE);
    let mut stats: Stats = read_json(&file)?;
    stats.coverages.push(windows);
    stats.states.push(states);
    write_json(&file, &stats)
}

/// Read `<dir>/kpath_stats.json`.
pub fn read_stats(dir: &Path) -> Result<Stats, Error> {
    read_json(&dir.join(STATS_FILE))
}

/// Batches of newly seen states.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueStates {
    /// One batch per coverage report.
    #[serde(default)]
    pub states: Vec<Vec<TlcState>>,
}

/// Append the states in `known` that no earlier batch in `<dir>/unique_states.json` contains.
///
/// Earlier batches may come from a previous process, so nothing is logged twice across restarts.
/// Returns the number of states appended.
pub(crate) fn append_unique_states(
    dir: &Path,
    known: &BTreeMap<i64, String>,
) -> Result<usize, Error> {
    let file = dir.join(UNIQUE_STATES_FILE);
    let mut log: UniqueStates = read_json(&file)?;
    let logged: HashSet<i64> = log.states.iter().flatten().map(|s| s.key).collect();

    let batch: Vec<TlcState> = known
        .iter()
        .filter(|(key, _)| !logged.contains(*key))
        .map(|(key, repr)| TlcState::new(*key, repr.clone()))
        .collect();
    let appended = batch.len();
    log.states.push(batch);
    write_json(&file, &log)?;
    Ok(appended)
}

/// Read `<dir>/unique_states.json`.
pub fn read_unique_states(dir: &Path) -> Result<UniqueStates, Error> {
    read_json(&dir.join(UNIQUE_STATES_FILE))
}
