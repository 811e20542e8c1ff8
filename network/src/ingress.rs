//! HTTP endpoints replicas use to register, report messages, and report events.

use crate::{
    mapping::{self, Message},
    Error, Network,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::debug;

pub(crate) fn router(network: Network) -> Router {
    Router::new()
        .route("/replica", post(replica))
        .route("/event", post(event))
        .route("/message", post(message))
        .with_state(network)
}

fn respond(result: Result<(), Error>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({"message": "ok"}))),
        Err(err) => {
            debug!(?err, "rejected request");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            )
        }
    }
}

async fn replica(State(network): State<Network>, body: Bytes) -> (StatusCode, Json<Value>) {
    respond(mapping::decode(&body).and_then(|raw| {
        let id = mapping::text(&raw, "id")?;
        let address = mapping::text(&raw, "addr")?;
        network.register(id, address);
        Ok(())
    }))
}

async fn event(State(network): State<Network>, body: Bytes) -> (StatusCode, Json<Value>) {
    respond(mapping::decode(&body).and_then(|raw| network.observe(&raw)))
}

async fn message(State(network): State<Network>, body: Bytes) -> (StatusCode, Json<Value>) {
    respond(
        serde_json::from_slice::<Message>(&body)
            .map_err(Error::from)
            .map(|message| network.send(message)),
    )
}
