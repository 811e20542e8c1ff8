//! HTTP client for a TLC oracle.

use crate::{Error, Oracle};
use modelfuzz_trace::{EventTrace, TlcState};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Configuration for a [TlcClient].
#[derive(Clone, Debug)]
pub struct Config {
    /// Address (`host:port`) of the oracle.
    pub address: String,

    /// Maximum time to wait for the oracle to answer a single trace.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2023".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Body returned by the oracle: representations and keys, index-aligned.
#[derive(Deserialize)]
struct Response {
    states: Vec<String>,
    keys: Vec<i64>,
}

/// [Oracle] reached over HTTP.
///
/// Calls block the current thread and must not be made from within an async runtime.
pub struct TlcClient {
    endpoint: String,
    client: Client,
}

impl TlcClient {
    /// Create a new client.
    pub fn new(cfg: Config) -> Result<Self, Error> {
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            endpoint: format!("http://{}/execute", cfg.address),
            client,
        })
    }

    /// Serialize `events` as the oracle expects: every event, then a reset marker.
    fn request(events: &EventTrace) -> Result<Vec<Value>, Error> {
        let mut request = Vec::with_capacity(events.len() + 1);
        for event in events {
            let event =
                serde_json::to_value(event).map_err(|err| Error::Malformed(err.to_string()))?;
            request.push(event);
        }
        request.push(json!({"reset": true}));
        Ok(request)
    }
}

impl Oracle for TlcClient {
    fn send_trace(&self, events: &EventTrace) -> Result<Vec<TlcState>, Error> {
        // Submit trace
        let request = Self::request(events)?;
        let response = self.client.post(&self.endpoint).json(&request).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        // Decode states
        let body = response.bytes()?;
        let response: Response =
            serde_json::from_slice(&body).map_err(|err| Error::Malformed(err.to_string()))?;
        if response.states.len() != response.keys.len() {
            return Err(Error::Malformed(format!(
                "{} states but {} keys",
                response.states.len(),
                response.keys.len()
            )));
        }
        debug!(
            events = events.len(),
            states = response.states.len(),
            "received states"
        );
        Ok(response
            .keys
            .into_iter()
            .zip(response.states)
            .map(|(key, repr)| TlcState::new(key, repr))
            .collect())
    }
}
