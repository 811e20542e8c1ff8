//! Scheduling choices made by the fuzzer during one execution.

use serde::{Deserialize, Serialize};

/// One decision taken by the fuzzer while driving an execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Choice {
    /// Deliver up to `max_messages` buffered messages from `from` to `to`.
    Schedule {
        from: String,
        to: String,
        max_messages: usize,
    },
    /// Crash `node` at `step`.
    Crash { node: String, step: usize },
    /// Restart `node` at `step`.
    Restart { node: String, step: usize },
    /// Submit client request number `request`.
    ClientRequest { request: u64 },
}

/// Ordered [Choice]s of one execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    choices: Vec<Choice>,
}

impl Trace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a choice.
    pub fn add(&mut self, choice: Choice) {
        self.choices.push(choice);
    }

    /// Number of choices recorded.
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// Returns true if no choices have been recorded.
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Iterate over choices in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Choice> {
        self.choices.iter()
    }
}

impl FromIterator<Choice> for Trace {
    fn from_iter<I: IntoIterator<Item = Choice>>(iter: I) -> Self {
        Self {
            choices: iter.into_iter().collect(),
        }
    }
}
