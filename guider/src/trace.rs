//! Guide executions towards event orderings that have not been seen before.
//!
//! Each execution is folded into a content-addressed graph: one vertex per event, linked to the
//! previous vertex observed at the same replica. A vertex's identifier is the digest of its event,
//! its replica, and its predecessor's identifier, so the digest of the whole graph changes with
//! any event's content or with the order of events at any one replica, but not with how events at
//! different replicas happen to interleave.

use crate::{Error, Guider, Novelty};
use modelfuzz_trace::{EventTrace, Params, Trace};
use modelfuzz_utils::{hash, hex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// One event and its predecessor at the same replica.
#[derive(Serialize)]
struct Vertex<'a> {
    name: &'a str,
    params: &'a Params,
    node: &'a str,
    prev: Option<String>,
}

/// Hex-encoded SHA-256 digest of the JSON encoding of `value`.
fn digest<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    let encoded = serde_json::to_vec(value)?;
    Ok(hex(&hash(&encoded)))
}

/// Fingerprint of the per-replica causal ordering of `events`.
pub fn fingerprint(events: &EventTrace) -> Result<String, Error> {
    let mut latest: HashMap<&str, String> = HashMap::new();
    let mut vertices: BTreeMap<String, Vertex<'_>> = BTreeMap::new();
    for event in events {
        let vertex = Vertex {
            name: &event.name,
            params: &event.params,
            node: &event.node,
            prev: latest.get(event.node.as_str()).cloned(),
        };
        let id = digest(&vertex)?;
        latest.insert(&event.node, id.clone());
        vertices.insert(id, vertex);
    }
    digest(&vertices)
}

/// [Guider] that reports executions whose event ordering (see [fingerprint]) is new.
///
/// State coverage is delegated to the wrapped guider, which still sees every execution (and
/// records it if asked), but only the novelty of the fingerprint is returned.
pub struct TraceGuider<G: Guider> {
    inner: G,
    traces: HashSet<String>,
}

impl<G: Guider> TraceGuider<G> {
    /// Wrap `inner`.
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            traces: HashSet::new(),
        }
    }

    /// The wrapped guider.
    pub fn inner(&self) -> &G {
        &self.inner
    }

    /// Number of distinct fingerprints seen since the last reset.
    pub fn traces(&self) -> usize {
        self.traces.len()
    }
}

impl<G: Guider> Guider for TraceGuider<G> {
    fn check(
        &mut self,
        iteration: &str,
        trace: &Trace,
        events: &EventTrace,
        record: bool,
    ) -> Result<Novelty, Error> {
        self.inner.check(iteration, trace, events, record)?;

        let key = fingerprint(events)?;
        let count = usize::from(self.traces.insert(key));
        debug!(iteration, new = count, "checked trace");
        Ok(Novelty::new(count))
    }

    fn coverage(&self) -> usize {
        self.inner.coverage()
    }

    fn reset(&mut self) {
        self.traces.clear();
        self.inner.reset();
    }
}
