//! Translate raw replica payloads into the canonical event parameters the oracle understands.

use crate::Error;
use modelfuzz_trace::Params;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Message intercepted between two replicas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sending replica.
    pub from: String,

    /// Receiving replica.
    pub to: String,

    /// Protocol message kind (e.g. `append_entries_request`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload, forwarded untouched.
    pub data: String,

    /// Protocol-specific fields (e.g. `term`, `entries`).
    pub params: Params,
}

/// Decode a JSON object that may have been encoded twice (a JSON string containing the object).
pub fn decode(body: &[u8]) -> Result<Params, Error> {
    match serde_json::from_slice(body)? {
        Value::Object(map) => Ok(map),
        Value::String(inner) => match serde_json::from_str(&inner)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::UnexpectedJson),
        },
        _ => Err(Error::UnexpectedJson),
    }
}

/// Read `field` as a string, accepting numbers.
pub(crate) fn text(raw: &Params, field: &'static str) -> Result<String, Error> {
    match raw.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(Value::Number(value)) => Ok(value.to_string()),
        Some(_) => Err(Error::InvalidField(field)),
        None => Err(Error::MissingField(field)),
    }
}

/// Interpret `value` as a non-negative integer (accepting integral floats and decimal strings).
fn integer(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(value) => value.parse().ok(),
        _ => None,
    }
}

/// Read `field` as a non-negative integer.
fn uint(raw: &Params, field: &'static str) -> Result<u64, Error> {
    let value = raw.get(field).ok_or(Error::MissingField(field))?;
    integer(value).ok_or(Error::InvalidField(field))
}

/// Read `field` as an integer, defaulting to zero if it is absent or not numeric.
fn uint_or_zero(raw: &Params, field: &str) -> u64 {
    raw.get(field).and_then(integer).unwrap_or(0)
}

/// Read `field`, defaulting to zero if it is absent or null.
fn value_or_zero(raw: &Params, field: &str) -> Value {
    match raw.get(field) {
        None | Some(Value::Null) => json!(0),
        Some(value) => value.clone(),
    }
}

/// Lifecycle event reported by a replica.
#[derive(Clone, Debug, PartialEq)]
pub enum Lifecycle {
    BecomeLeader { node: u64, term: u64 },
    Timeout { node: u64 },
    UpdateSnapshot { node: u64, snapshot_index: u64 },
    AdvanceCommitIndex { node: u64 },
    MembershipChange { node: u64, action: String },
    /// Any other kind, carried through with its raw fields as parameters.
    Other { name: String, fields: Params },
}

impl Lifecycle {
    /// Parse a raw event (which must carry `type` and `server_id`).
    pub fn parse(raw: &Params) -> Result<Self, Error> {
        let name = match raw.get("type") {
            Some(Value::String(name)) => name.as_str(),
            Some(_) => return Err(Error::InvalidField("type")),
            None => return Err(Error::MissingField("type")),
        };
        let lifecycle = match name {
            "BecomeLeader" => Self::BecomeLeader {
                node: uint(raw, "node")?,
                term: uint(raw, "term")?,
            },
            "Timeout" => Self::Timeout {
                node: uint(raw, "node")?,
            },
            "UpdateSnapshot" => Self::UpdateSnapshot {
                node: uint(raw, "node")?,
                snapshot_index: uint(raw, "snapshot_index")?,
            },
            "AdvanceCommitIndex" => Self::AdvanceCommitIndex {
                node: uint(raw, "server_id")?,
            },
            "MembershipChange" => Self::MembershipChange {
                node: uint(raw, "node")?,
                action: text(raw, "action")?,
            },
            _ => Self::Other {
                name: name.to_string(),
                fields: raw.clone(),
            },
        };
        Ok(lifecycle)
    }

    /// Event name recorded in the trace.
    pub fn name(&self) -> &str {
        match self {
            Self::BecomeLeader { .. } => "BecomeLeader",
            Self::Timeout { .. } => "Timeout",
            Self::UpdateSnapshot { .. } => "UpdateSnapshot",
            Self::AdvanceCommitIndex { .. } => "AdvanceCommitIndex",
            Self::MembershipChange { .. } => "MembershipChange",
            Self::Other { name, .. } => name,
        }
    }

    /// Canonical parameters recorded in the trace.
    pub fn params(&self) -> Params {
        let value = match self {
            Self::BecomeLeader { node, term } => json!({"node": node, "term": term}),
            Self::Timeout { node } => json!({"node": node}),
            Self::UpdateSnapshot {
                node,
                snapshot_index,
            } => json!({"node": node, "snapshot_index": snapshot_index}),
            Self::AdvanceCommitIndex { node } => json!({"node": node, "i": node}),
            Self::MembershipChange { node, action } => json!({"node": node, "action": action}),
            Self::Other { fields, .. } => return fields.clone(),
        };
        match value {
            Value::Object(params) => params,
            _ => unreachable!("parameters are always an object"),
        }
    }
}

/// Protocol message kinds with a canonical translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    AppendEntriesRequest,
    AppendEntriesReply,
    RequestVoteRequest,
    RequestVoteReply,
    Other,
}

impl From<&str> for Kind {
    fn from(kind: &str) -> Self {
        match kind {
            "append_entries_request" => Self::AppendEntriesRequest,
            "append_entries_reply" => Self::AppendEntriesReply,
            "request_vote_request" => Self::RequestVoteRequest,
            "request_vote_reply" => Self::RequestVoteReply,
            _ => Self::Other,
        }
    }
}

/// Compact identifiers for log entry payloads.
///
/// The same payload always maps to the same identifier; identifiers are assigned from zero in
/// the order payloads are first seen.
#[derive(Debug, Default)]
pub(crate) struct Entries {
    ids: HashMap<String, u64>,
}

impl Entries {
    /// Identifier of `data`, assigning the next one if it is new.
    pub(crate) fn id(&mut self, data: &str) -> u64 {
        let next = self.ids.len() as u64;
        *self.ids.entry(data.to_string()).or_insert(next)
    }

    /// Translate the raw entries of an append request, skipping entries without a payload or term.
    ///
    /// Entries keyed by index (an object) are visited in ascending index order.
    fn translate(&mut self, raw: Option<&Value>) -> Vec<Value> {
        let entries: Vec<&Value> = match raw {
            Some(Value::Array(entries)) => entries.iter().collect(),
            Some(Value::Object(entries)) => {
                let mut keyed: Vec<(&String, &Value)> = entries.iter().collect();
                keyed.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(a), Ok(b)) => a.cmp(&b),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => a.cmp(b),
                });
                keyed.into_iter().map(|(_, entry)| entry).collect()
            }
            _ => Vec::new(),
        };

        let mut translated = Vec::with_capacity(entries.len());
        for entry in entries {
            let data = match entry.get("data").and_then(Value::as_str) {
                Some(data) if !data.is_empty() => data,
                _ => continue,
            };
            let Some(term) = entry.get("term").and_then(integer) else {
                continue;
            };
            translated.push(json!({"Term": term, "Data": self.id(data).to_string()}));
        }
        translated
    }
}

/// Parameters of the `DeliverMessage` event recorded when `message` is scheduled.
pub(crate) fn deliver(message: &Message, entries: &mut Entries) -> Params {
    let raw = &message.params;
    let mut params = Params::new();
    params.insert("term".into(), json!(uint_or_zero(raw, "term")));
    params.insert("from".into(), json!(message.from.parse::<u64>().unwrap_or(0)));
    params.insert("to".into(), json!(message.to.parse::<u64>().unwrap_or(0)));

    let (kind, log_term, entries, index, commit, reject) = match Kind::from(message.kind.as_str())
    {
        Kind::AppendEntriesRequest => (
            "MsgApp",
            value_or_zero(raw, "prev_log_term"),
            entries.translate(raw.get("entries")),
            value_or_zero(raw, "prev_log_idx"),
            value_or_zero(raw, "leader_commit"),
            false,
        ),
        Kind::AppendEntriesReply => (
            "MsgAppResp",
            json!(0),
            Vec::new(),
            value_or_zero(raw, "current_idx"),
            json!(0),
            uint_or_zero(raw, "success") == 0,
        ),
        Kind::RequestVoteRequest => (
            "MsgVote",
            value_or_zero(raw, "last_log_term"),
            Vec::new(),
            value_or_zero(raw, "last_log_idx"),
            json!(0),
            false,
        ),
        // The replica's `reject` field is set when the vote is granted
        Kind::RequestVoteReply => (
            "MsgVoteResp",
            json!(0),
            Vec::new(),
            json!(0),
            json!(0),
            uint_or_zero(raw, "reject") == 0,
        ),
        Kind::Other => return params,
    };
    params.insert("type".into(), json!(kind));
    params.insert("log_term".into(), log_term);
    params.insert("entries".into(), Value::Array(entries));
    params.insert("index".into(), index);
    params.insert("commit".into(), commit);
    params.insert("reject".into(), json!(reject));
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn message(kind: &str, params: Value) -> Message {
        Message {
            from: "1".into(),
            to: "2".into(),
            kind: kind.into(),
            data: "payload".into(),
            params: object(params),
        }
    }

    #[test]
    fn test_decode() {
        // Plain object
        let raw = decode(br#"{"type": "Timeout", "server_id": "1"}"#).unwrap();
        assert_eq!(raw["type"], "Timeout");

        // Object encoded as a JSON string
        let inner = r#"{"type": "Timeout", "server_id": "1"}"#;
        let body = serde_json::to_vec(&inner).unwrap();
        assert_eq!(decode(&body).unwrap(), raw);

        // Anything else is rejected
        assert!(matches!(decode(b"[1, 2]"), Err(Error::UnexpectedJson)));
        assert!(matches!(decode(b"\"[1]\""), Err(Error::UnexpectedJson)));
        assert!(matches!(decode(b"{oops"), Err(Error::InvalidJson(_))));
    }

    #[test]
    fn test_parse_lifecycle() {
        let cases = [
            (
                json!({"type": "BecomeLeader", "server_id": "2", "node": "2", "term": 3.0}),
                Lifecycle::BecomeLeader { node: 2, term: 3 },
                json!({"node": 2, "term": 3}),
            ),
            (
                json!({"type": "Timeout", "server_id": "1", "node": "1"}),
                Lifecycle::Timeout { node: 1 },
                json!({"node": 1}),
            ),
            (
                json!({"type": "UpdateSnapshot", "server_id": "3", "node": 3, "snapshot_index": 9}),
                Lifecycle::UpdateSnapshot {
                    node: 3,
                    snapshot_index: 9,
                },
                json!({"node": 3, "snapshot_index": 9}),
            ),
            (
                json!({"type": "AdvanceCommitIndex", "server_id": "4"}),
                Lifecycle::AdvanceCommitIndex { node: 4 },
                json!({"node": 4, "i": 4}),
            ),
            (
                json!({"type": "MembershipChange", "server_id": "1", "node": "5", "action": "add"}),
                Lifecycle::MembershipChange {
                    node: 5,
                    action: "add".into(),
                },
                json!({"node": 5, "action": "add"}),
            ),
        ];
        for (raw, expected, params) in cases {
            let lifecycle = Lifecycle::parse(&object(raw)).unwrap();
            assert_eq!(lifecycle, expected);
            assert_eq!(Value::Object(lifecycle.params()), params);
        }
    }

    #[test]
    fn test_parse_other_passes_through() {
        let raw = object(json!({"type": "LogUpdate", "server_id": "1", "log_index": 4}));
        let lifecycle = Lifecycle::parse(&raw).unwrap();
        assert_eq!(lifecycle.name(), "LogUpdate");
        assert_eq!(lifecycle.params(), raw);
    }

    #[test]
    fn test_parse_malformed() {
        let missing = object(json!({"server_id": "1"}));
        assert!(matches!(
            Lifecycle::parse(&missing),
            Err(Error::MissingField("type"))
        ));

        let mistyped = object(json!({"type": 7, "server_id": "1"}));
        assert!(matches!(
            Lifecycle::parse(&mistyped),
            Err(Error::InvalidField("type"))
        ));

        let no_term = object(json!({"type": "BecomeLeader", "server_id": "1", "node": "1"}));
        assert!(matches!(
            Lifecycle::parse(&no_term),
            Err(Error::MissingField("term"))
        ));

        let bad_node = object(json!({"type": "Timeout", "server_id": "1", "node": "n1"}));
        assert!(matches!(
            Lifecycle::parse(&bad_node),
            Err(Error::InvalidField("node"))
        ));
    }

    #[test]
    fn test_deliver_append_entries_request() {
        let mut entries = Entries::default();
        let request = message(
            "append_entries_request",
            json!({
                "term": 2,
                "prev_log_term": 1,
                "prev_log_idx": null,
                "leader_commit": 1,
                "entries": {
                    "10": {"term": 2, "data": "c"},
                    "2": {"term": 1, "data": "b"},
                    "1": {"term": 1, "data": "a"},
                    "3": {"term": 1, "data": ""},
                    "4": {"data": "no term"},
                },
            }),
        );
        let params = deliver(&request, &mut entries);
        assert_eq!(
            Value::Object(params),
            json!({
                "type": "MsgApp",
                "term": 2,
                "from": 1,
                "to": 2,
                "log_term": 1,
                "entries": [
                    {"Term": 1, "Data": "0"},
                    {"Term": 1, "Data": "1"},
                    {"Term": 2, "Data": "2"},
                ],
                "index": 0,
                "commit": 1,
                "reject": false,
            })
        );

        // Same payloads keep their identifiers
        let retry = message(
            "append_entries_request",
            json!({"term": 2, "prev_log_term": 1, "prev_log_idx": 2, "leader_commit": 1,
                   "entries": [{"term": 3, "data": "d"}, {"term": 2, "data": "c"}]}),
        );
        let params = deliver(&retry, &mut entries);
        assert_eq!(
            params["entries"],
            json!([{"Term": 3, "Data": "3"}, {"Term": 2, "Data": "2"}])
        );
        assert_eq!(params["index"], json!(2));
    }

    #[test]
    fn test_deliver_replies_and_votes() {
        let mut entries = Entries::default();

        let reply = message(
            "append_entries_reply",
            json!({"term": 2, "current_idx": 5, "success": 0}),
        );
        assert_eq!(
            Value::Object(deliver(&reply, &mut entries)),
            json!({"type": "MsgAppResp", "term": 2, "from": 1, "to": 2, "log_term": 0,
                   "entries": [], "index": 5, "commit": 0, "reject": true})
        );

        let vote = message(
            "request_vote_request",
            json!({"term": 3, "last_log_term": 2, "last_log_idx": 7}),
        );
        assert_eq!(
            Value::Object(deliver(&vote, &mut entries)),
            json!({"type": "MsgVote", "term": 3, "from": 1, "to": 2, "log_term": 2,
                   "entries": [], "index": 7, "commit": 0, "reject": false})
        );

        let granted = message("request_vote_reply", json!({"term": 3, "reject": 1}));
        assert_eq!(deliver(&granted, &mut entries)["reject"], json!(false));
        let denied = message("request_vote_reply", json!({"term": 3, "reject": 0}));
        assert_eq!(deliver(&denied, &mut entries)["reject"], json!(true));
    }

    #[test]
    fn test_deliver_other() {
        let mut entries = Entries::default();
        let other = message("install_snapshot", json!({"term": 4}));
        assert_eq!(
            Value::Object(deliver(&other, &mut entries)),
            json!({"term": 4, "from": 1, "to": 2})
        );
    }

    #[test]
    fn test_entry_ids() {
        let mut entries = Entries::default();
        assert_eq!(entries.id("a"), 0);
        assert_eq!(entries.id("b"), 1);
        assert_eq!(entries.id("a"), 0);
        assert_eq!(entries.id("c"), 2);
    }
}
