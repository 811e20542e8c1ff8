//! Buffer intercepted messages and deliver them when the driver decides to.

use crate::{
    ingress,
    mapping::{self, Entries, Lifecycle, Message},
    Error,
};
use modelfuzz_trace::{Event, EventTrace, Params};
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use std::{
    collections::{HashMap, VecDeque},
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{
    net::TcpListener,
    runtime::Handle,
    sync::watch,
    task::{JoinHandle, JoinSet},
    time::{sleep, timeout, Instant},
};
use tracing::{debug, info, warn};

/// Configuration for a [`Network`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the replica-facing HTTP server binds to.
    pub listen: SocketAddr,

    /// Maximum time [`Network::wait_for_nodes`] waits for replicas to register.
    pub registration_timeout: Duration,

    /// Interval at which [`Network::wait_for_nodes`] re-checks registrations.
    pub poll_interval: Duration,

    /// Timeout for each message forwarded to a replica.
    pub forward_timeout: Duration,

    /// Maximum time [`Network::shutdown`] waits for the HTTP server to drain.
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Listen on `port` on the loopback interface.
    pub fn local(port: u16) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            registration_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1),
            forward_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::local(7074)
    }
}

/// Everything observed during one iteration.
#[derive(Default)]
struct State {
    /// Replica id to `host:port`.
    nodes: HashMap<String, String>,

    /// Undelivered messages per `(from, to)` pair, oldest first.
    mailboxes: HashMap<(String, String), VecDeque<Message>>,

    events: EventTrace,
    leader: Option<u64>,

    /// Client requests issued before any leader was known.
    requests: Vec<u64>,

    entries: Entries,
}

impl State {
    /// Record a client request accepted by `leader`.
    fn request(&mut self, leader: u64, request: u64) {
        let params = params(json!({"leader": leader, "request": request}));
        self.events
            .add(Event::new("ClientRequest", leader.to_string(), params));
    }
}

fn params(value: serde_json::Value) -> Params {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Params::new(),
    }
}

struct Inner {
    cfg: Config,
    runtime: Handle,
    client: reqwest::Client,
    state: Mutex<State>,
    deliveries: Mutex<JoinSet<()>>,
    stop: watch::Sender<bool>,
    server: Mutex<Option<JoinHandle<()>>>,
}

/// Intercepts messages between replicas of the system under test.
///
/// Replicas register themselves, report the messages they want to send and the lifecycle events
/// they observe. Messages are held until [`Network::schedule`] releases them, at which point they
/// are forwarded to the receiving replica and recorded as `DeliverMessage` events.
///
/// Cloning a [`Network`] yields another handle to the same state.
#[derive(Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

impl Network {
    /// Create a new network.
    ///
    /// Must be called from within a Tokio runtime: forwarded messages and the HTTP server run on
    /// it, even when the network is later driven from a synchronous thread.
    pub fn new(cfg: Config) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let client = reqwest::Client::builder()
            .timeout(cfg.forward_timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        let (stop, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                runtime,
                client,
                state: Mutex::new(State::default()),
                deliveries: Mutex::new(JoinSet::new()),
                stop,
                server: Mutex::new(None),
            }),
        })
    }

    /// Serve the replica-facing endpoints, returning the bound address.
    pub async fn start(&self) -> Result<SocketAddr, Error> {
        let mut server = self.inner.server.lock().unwrap();
        if server.is_some() {
            return Err(Error::AlreadyStarted);
        }

        // Bind before returning so replicas can connect immediately
        let listener = std::net::TcpListener::bind(self.inner.cfg.listen).map_err(Error::Bind)?;
        listener.set_nonblocking(true).map_err(Error::Bind)?;
        let listener = {
            let _guard = self.inner.runtime.enter();
            TcpListener::from_std(listener).map_err(Error::Bind)?
        };
        let address = listener.local_addr().map_err(Error::Bind)?;

        // Serve until stopped
        let router = ingress::router(self.clone());
        let mut stop = self.inner.stop.subscribe();
        *server = Some(self.inner.runtime.spawn(async move {
            let result = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                })
                .await;
            if let Err(err) = result {
                warn!(?err, "network server failed");
            }
        }));
        info!(%address, "network listening");
        Ok(address)
    }

    /// Stop the HTTP server, waiting at most the configured shutdown timeout.
    ///
    /// Outstanding deliveries are abandoned.
    pub async fn shutdown(&self) {
        self.inner.stop.send_replace(true);
        let server = self.inner.server.lock().unwrap().take();
        if let Some(mut server) = server {
            if timeout(self.inner.cfg.shutdown_timeout, &mut server)
                .await
                .is_err()
            {
                warn!("network server did not stop in time");
                server.abort();
            }
        }
        self.inner.deliveries.lock().unwrap().detach_all();
        debug!("network stopped");
    }

    /// Wait for at least `n` replicas to register.
    ///
    /// Returns `false` if the registration timeout elapses or the network shuts down first.
    pub async fn wait_for_nodes(&self, n: usize) -> bool {
        let deadline = Instant::now() + self.inner.cfg.registration_timeout;
        let stop = self.inner.stop.subscribe();
        loop {
            let registered = self.nodes();
            if registered >= n {
                return true;
            }
            if *stop.borrow() {
                return false;
            }
            if Instant::now() >= deadline {
                warn!(registered, expected = n, "replicas did not register in time");
                return false;
            }
            sleep(self.inner.cfg.poll_interval).await;
        }
    }

    /// Wait for every forwarded message to complete (or fail).
    pub async fn flush(&self) {
        let mut deliveries = std::mem::take(&mut *self.inner.deliveries.lock().unwrap());
        while deliveries.join_next().await.is_some() {}
    }

    /// Register (or re-register) replica `id` at `address`.
    pub fn register(&self, id: impl Into<String>, address: impl Into<String>) {
        let id = id.into();
        let address = address.into();
        debug!(id, address, "registered replica");
        self.inner
            .state
            .lock()
            .unwrap()
            .nodes
            .insert(id, address);
    }

    /// Buffer a message until it is scheduled.
    pub fn send(&self, message: Message) {
        let mut state = self.inner.state.lock().unwrap();
        state
            .mailboxes
            .entry((message.from.clone(), message.to.clone()))
            .or_default()
            .push_back(message);
    }

    /// Record a lifecycle event reported by a replica.
    ///
    /// When the event announces a new leader, any client requests issued before a leader was
    /// known are recorded right after it (in the order they were issued).
    pub fn observe(&self, raw: &Params) -> Result<(), Error> {
        let node = mapping::text(raw, "server_id")?;
        let lifecycle = Lifecycle::parse(raw)?;

        let mut state = self.inner.state.lock().unwrap();
        state
            .events
            .add(Event::new(lifecycle.name(), node, lifecycle.params()));
        if let Lifecycle::BecomeLeader { node: leader, term } = lifecycle {
            debug!(leader, term, "observed leader");
            state.leader = Some(leader);
            for request in std::mem::take(&mut state.requests) {
                state.request(leader, request);
            }
        }
        Ok(())
    }

    /// Issue client request `request`.
    ///
    /// If no leader is known yet, the request is recorded once one is.
    pub fn client_request(&self, request: u64) {
        let mut state = self.inner.state.lock().unwrap();
        match state.leader {
            Some(leader) => state.request(leader, request),
            None => state.requests.push(request),
        }
    }

    /// Deliver up to `max_messages` buffered messages from `from` to `to`, oldest first.
    ///
    /// Each delivered message is forwarded to the receiving replica in the background and
    /// recorded as a `DeliverMessage` event. Returns the number of messages delivered.
    pub fn schedule(&self, from: &str, to: &str, max_messages: usize) -> usize {
        // Dequeue
        let (messages, address) = {
            let mut state = self.inner.state.lock().unwrap();
            let messages: Vec<Message> =
                match state.mailboxes.get_mut(&(from.to_string(), to.to_string())) {
                    Some(mailbox) => {
                        let count = max_messages.min(mailbox.len());
                        mailbox.drain(..count).collect()
                    }
                    None => Vec::new(),
                };
            (messages, state.nodes.get(to).cloned())
        };

        // Forward and record
        for message in &messages {
            match &address {
                Some(address) => self.forward(address, from, message),
                None => debug!(from, to, "receiver not registered, not forwarding"),
            }
            let mut state = self.inner.state.lock().unwrap();
            let params = mapping::deliver(message, &mut state.entries);
            state
                .events
                .add(Event::new("DeliverMessage", message.to.clone(), params));
        }
        messages.len()
    }

    /// Forward `message` to the replica at `address` without waiting for the outcome.
    fn forward(&self, address: &str, from: &str, message: &Message) {
        let body = match serde_json::to_string(message).and_then(|m| serde_json::to_string(&m)) {
            Ok(body) => body,
            Err(err) => {
                warn!(?err, "failed to encode message");
                return;
            }
        };
        let url = format!("http://{address}/schedule_{from}");
        let client = self.inner.client.clone();

        let mut deliveries = self.inner.deliveries.lock().unwrap();
        while deliveries.try_join_next().is_some() {}
        deliveries.spawn_on(
            async move {
                let result = client
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await;
                match result {
                    Ok(response) => {
                        let _ = response.bytes().await;
                    }
                    Err(err) => debug!(?err, url, "failed to forward message"),
                }
            },
            &self.inner.runtime,
        );
    }

    /// Clear all iteration state, keeping the server running.
    ///
    /// Replicas must register again. Outstanding deliveries are abandoned.
    pub fn reset(&self) {
        *self.inner.state.lock().unwrap() = State::default();
        self.inner.deliveries.lock().unwrap().detach_all();
    }

    /// Events recorded since the last reset.
    pub fn events(&self) -> EventTrace {
        self.inner.state.lock().unwrap().events.clone()
    }

    /// Number of undelivered messages from `from` to `to`.
    pub fn pending(&self, from: &str, to: &str) -> usize {
        self.inner
            .state
            .lock()
            .unwrap()
            .mailboxes
            .get(&(from.to_string(), to.to_string()))
            .map_or(0, VecDeque::len)
    }

    /// Most recently observed leader.
    pub fn leader(&self) -> Option<u64> {
        self.inner.state.lock().unwrap().leader
    }

    /// Number of registered replicas.
    pub fn nodes(&self) -> usize {
        self.inner.state.lock().unwrap().nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn object(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn message(from: &str, to: &str, term: u64) -> Message {
        Message {
            from: from.into(),
            to: to.into(),
            kind: "request_vote_request".into(),
            data: format!("vote {term}"),
            params: object(json!({"term": term, "last_log_term": 0, "last_log_idx": 0})),
        }
    }

    fn network() -> Network {
        let mut cfg = Config::local(0);
        cfg.registration_timeout = Duration::from_millis(50);
        Network::new(cfg).unwrap()
    }

    fn names(network: &Network) -> Vec<String> {
        network.events().iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(
            Network::new(Config::local(0)),
            Err(Error::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_schedule_partial() {
        let network = network();

        // Queue three messages from 1 to 2
        for term in 1..=3 {
            network.send(message("1", "2", term));
        }
        assert_eq!(network.pending("1", "2"), 3);
        assert_eq!(network.pending("2", "1"), 0);

        // Deliver two of them
        assert_eq!(network.schedule("1", "2", 2), 2);
        assert_eq!(network.pending("1", "2"), 1);
        let events = network.events();
        assert_eq!(events.len(), 2);
        for (event, term) in events.iter().zip(1..) {
            assert_eq!(event.name, "DeliverMessage");
            assert_eq!(event.node, "2");
            assert_eq!(event.params["type"], "MsgVote");
            assert_eq!(event.params["term"], json!(term));
        }

        // Deliver the rest
        assert_eq!(network.schedule("1", "2", 5), 1);
        assert_eq!(network.events().iter().last().unwrap().params["term"], json!(3));
        assert_eq!(network.schedule("1", "2", 5), 0);
        assert_eq!(network.events().len(), 3);
    }

    #[tokio::test]
    async fn test_schedule_fifo_per_pair() {
        let network = network();
        network.send(message("1", "2", 1));
        network.send(message("3", "2", 10));
        network.send(message("1", "2", 2));

        // Pairs are independent
        assert_eq!(network.schedule("3", "2", 1), 1);
        assert_eq!(network.schedule("1", "2", 1), 1);
        assert_eq!(network.schedule("1", "2", 1), 1);
        let terms: Vec<Value> = network
            .events()
            .iter()
            .map(|e| e.params["term"].clone())
            .collect();
        assert_eq!(terms, vec![json!(10), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_schedule_empty() {
        let network = network();
        assert_eq!(network.schedule("1", "2", 3), 0);
        network.send(message("1", "2", 1));
        assert_eq!(network.schedule("1", "2", 0), 0);
        assert!(network.events().is_empty());
        assert_eq!(network.pending("1", "2"), 1);
    }

    #[tokio::test]
    async fn test_client_requests_wait_for_leader() {
        let network = network();

        // No leader yet
        network.client_request(0);
        network.client_request(1);
        assert!(network.events().is_empty());
        assert_eq!(network.leader(), None);

        // Leader elected
        let raw = object(json!({"type": "BecomeLeader", "server_id": "2", "node": "2", "term": 1}));
        network.observe(&raw).unwrap();
        assert_eq!(network.leader(), Some(2));
        assert_eq!(
            names(&network),
            vec!["BecomeLeader", "ClientRequest", "ClientRequest"]
        );
        let events = network.events();
        for (event, request) in events.iter().skip(1).zip(0..) {
            assert_eq!(event.node, "2");
            assert_eq!(
                Value::Object(event.params.clone()),
                json!({"leader": 2, "request": request})
            );
        }

        // Subsequent requests are recorded immediately
        network.client_request(2);
        assert_eq!(network.events().len(), 4);

        // A new leader does not replay requests
        let raw = object(json!({"type": "BecomeLeader", "server_id": "3", "node": "3", "term": 2}));
        network.observe(&raw).unwrap();
        assert_eq!(network.leader(), Some(3));
        assert_eq!(network.events().len(), 5);
    }

    #[tokio::test]
    async fn test_observe() {
        let network = network();
        let raw = object(json!({"type": "Timeout", "server_id": "1", "node": "1"}));
        network.observe(&raw).unwrap();
        let events = network.events();
        let event = events.iter().next().unwrap();
        assert_eq!(event.name, "Timeout");
        assert_eq!(event.node, "1");
        assert_eq!(Value::Object(event.params.clone()), json!({"node": 1}));

        // Malformed events are rejected without side effects
        let raw = object(json!({"type": "Timeout", "node": "1"}));
        assert!(matches!(
            network.observe(&raw),
            Err(Error::MissingField("server_id"))
        ));
        let raw = object(json!({"type": "BecomeLeader", "server_id": "1", "node": "x", "term": 1}));
        assert!(network.observe(&raw).is_err());
        assert_eq!(network.events().len(), 1);
        assert_eq!(network.leader(), None);
    }

    #[tokio::test]
    async fn test_reset() {
        let network = network();
        network.register("1", "127.0.0.1:1");
        network.send(message("1", "2", 1));
        network.client_request(0);
        let raw = object(json!({"type": "BecomeLeader", "server_id": "1", "node": "1", "term": 1}));
        network.observe(&raw).unwrap();
        let append = Message {
            from: "1".into(),
            to: "2".into(),
            kind: "append_entries_request".into(),
            data: String::new(),
            params: object(json!({"term": 1, "entries": [{"term": 1, "data": "x"}, {"term": 1, "data": "y"}]})),
        };
        network.send(append.clone());
        network.schedule("1", "2", 2);
        assert_eq!(
            network.events().iter().last().unwrap().params["entries"],
            json!([{"Term": 1, "Data": "0"}, {"Term": 1, "Data": "1"}])
        );

        // Everything is forgotten
        network.reset();
        assert!(network.events().is_empty());
        assert_eq!(network.nodes(), 0);
        assert_eq!(network.leader(), None);
        assert_eq!(network.pending("1", "2"), 0);

        // Entry identifiers start over
        let append = Message {
            params: object(json!({"term": 1, "entries": [{"term": 1, "data": "y"}]})),
            ..append
        };
        network.send(append);
        network.schedule("1", "2", 1);
        assert_eq!(
            network.events().iter().last().unwrap().params["entries"],
            json!([{"Term": 1, "Data": "0"}])
        );

        // Leadership is forgotten too
        network.client_request(7);
        let raw = object(json!({"type": "BecomeLeader", "server_id": "1", "node": "1", "term": 2}));
        network.observe(&raw).unwrap();
        assert_eq!(
            names(&network),
            vec!["DeliverMessage", "BecomeLeader", "ClientRequest"]
        );
        assert_eq!(
            network.events().iter().last().unwrap().params["request"],
            json!(7)
        );
    }

    #[tokio::test]
    async fn test_reset_drops_queued_requests() {
        let network = network();
        network.client_request(5);
        network.reset();
        let raw = object(json!({"type": "BecomeLeader", "server_id": "1", "node": "1", "term": 1}));
        network.observe(&raw).unwrap();
        assert_eq!(names(&network), vec!["BecomeLeader"]);
    }

    #[tokio::test]
    async fn test_wait_for_nodes() {
        let network = network();

        // Times out
        assert!(!network.wait_for_nodes(1).await);

        // Registered concurrently
        let registrar = network.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(5)).await;
            registrar.register("1", "127.0.0.1:1");
            registrar.register("2", "127.0.0.1:2");
        });
        assert!(network.wait_for_nodes(2).await);
        assert!(network.wait_for_nodes(0).await);

        // Re-registration does not add a replica
        network.register("1", "127.0.0.1:3");
        assert_eq!(network.nodes(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_nodes_after_shutdown() {
        let network = network();
        network.shutdown().await;
        assert!(!network.wait_for_nodes(1).await);
    }

    #[tokio::test]
    async fn test_start_twice() {
        let network = network();
        network.start().await.unwrap();
        assert!(matches!(network.start().await, Err(Error::AlreadyStarted)));
        network.shutdown().await;
    }
}
