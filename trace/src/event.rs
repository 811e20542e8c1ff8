//! Events observed at replicas and the global trace they are appended to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event-kind-specific parameters.
///
/// Keys are kept in sorted order, so serializing the same parameters always yields the same bytes.
pub type Params = Map<String, Value>;

/// One occurrence observed at one replica.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Kind of event (e.g. `BecomeLeader`, `DeliverMessage`).
    pub name: String,

    /// Replica the event occurred at.
    ///
    /// Never serialized: the oracle identifies replicas through [Event::params].
    #[serde(skip)]
    pub node: String,

    /// Parameters specific to [Event::name].
    #[serde(default)]
    pub params: Params,
}

impl Event {
    /// Create a new event.
    pub fn new(name: impl Into<String>, node: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            params,
        }
    }
}

/// Ordered, append-only sequence of [Event]s.
///
/// Order reflects the order events were appended, not the order they occurred at the replicas.
/// Cloning produces an independent deep copy (each event's parameters included), so a snapshot
/// can be handed off while the original keeps accumulating.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTrace {
    events: Vec<Event>,
}

impl EventTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn add(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over events in append order.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Events in append order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl<'a> IntoIterator for &'a EventTrace {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<Event> for EventTrace {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}
