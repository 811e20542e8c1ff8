//! Oracles for testing guiders without a model checker.

use crate::{Error, Oracle};
use modelfuzz_trace::{EventTrace, TlcState};
use std::{collections::VecDeque, sync::Mutex};

/// [Oracle] that answers with pre-recorded responses, in order.
///
/// A `None` response simulates an unavailable oracle. Once the script is exhausted, every call
/// fails.
#[derive(Default)]
pub struct Scripted {
    responses: Mutex<VecDeque<Option<Vec<TlcState>>>>,
    received: Mutex<Vec<EventTrace>>,
}

impl Scripted {
    /// Create an oracle with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an oracle that answers with each of `responses` in turn.
    pub fn with(responses: impl IntoIterator<Item = Vec<TlcState>>) -> Self {
        let oracle = Self::new();
        for response in responses {
            oracle.respond(response);
        }
        oracle
    }

    /// Queue a successful response.
    pub fn respond(&self, states: Vec<TlcState>) {
        self.responses.lock().unwrap().push_back(Some(states));
    }

    /// Queue a failure.
    pub fn fail(&self) {
        self.responses.lock().unwrap().push_back(None);
    }

    /// Every trace submitted so far.
    pub fn received(&self) -> Vec<EventTrace> {
        self.received.lock().unwrap().clone()
    }
}

impl Oracle for Scripted {
    fn send_trace(&self, events: &EventTrace) -> Result<Vec<TlcState>, Error> {
        self.received.lock().unwrap().push(events.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Some(states)) => Ok(states),
            Some(None) => Err(Error::Status(503)),
            None => Err(Error::Malformed("no response scripted".into())),
        }
    }
}
