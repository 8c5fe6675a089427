//! HTTP adapters against an in-process fake of the simulation API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use cognisync_core::{
    cognisphere_registry, CommandAction, CommandError, CommandRequest, ControlAction, Fetch,
    HttpRemote, HttpSource, Remote, RemoteError, SourceFetchError, SyncConfig, SyncEngine,
};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::timeout;

type Sim = Arc<Mutex<String>>;

async fn status(State(sim): State<Sim>) -> Json<Value> {
    let state = sim.lock().unwrap().clone();
    if state == "uninitialized" {
        return Json(json!({"status": "not_initialized", "data": null}));
    }
    Json(json!({"state": state, "current_tick": 7}))
}

async fn agents(State(sim): State<Sim>) -> (StatusCode, Json<Value>) {
    if *sim.lock().unwrap() == "uninitialized" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Simulation not initialized"})),
        );
    }
    (StatusCode::OK, Json(json!({"agents": [], "total_count": 0})))
}

async fn network() -> Json<Value> {
    Json(json!({"nodes": [], "edges": [], "error": "graph offline"}))
}

async fn economy() -> &'static str {
    "market closed"
}

async fn culture() -> Json<Value> {
    Json(json!({"myths": [], "norms": [], "slang": []}))
}

async fn initialize(State(sim): State<Sim>, Json(config): Json<Value>) -> Json<Value> {
    *sim.lock().unwrap() = "ready".to_string();
    Json(json!({"status": "initialized", "config": config}))
}

async fn control(State(sim): State<Sim>, Json(req): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut state = sim.lock().unwrap();
    let action = req["action"].as_str().unwrap_or_default();
    let next = match (action, state.as_str()) {
        (_, "uninitialized") => None,
        ("start", "ready") => Some(("running", "started")),
        ("start", _) => None,
        ("pause", _) => Some(("paused", "paused")),
        ("resume", _) => Some(("running", "resumed")),
        ("stop", _) => Some(("stopped", "stopped")),
        ("step", _) => Some(("paused", "stepped")),
        _ => None,
    };
    match next {
        Some((new_state, reply)) => {
            *state = new_state.to_string();
            (StatusCode::OK, Json(json!({"status": reply})))
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Simulation not ready"})),
        ),
    }
}

async fn spawn_fake() -> String {
    let sim: Sim = Arc::new(Mutex::new("uninitialized".to_string()));
    let app = Router::new()
        .route("/realtime/status", get(status))
        .route("/agents", get(agents))
        .route("/realtime/network", get(network))
        .route("/realtime/economy", get(economy))
        .route("/realtime/culture", get(culture))
        .route("/simulation/initialize", post(initialize))
        .route("/simulation/control", post(control))
        .with_state(sim);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn http_source_classifies_responses() {
    let base = spawn_fake().await;
    let client = Client::new();
    let fetch = |path: &str| HttpSource::new(client.clone(), format!("{base}{path}"));

    let status = fetch("/realtime/status").fetch().await.unwrap();
    assert_eq!(status["status"], "not_initialized");

    assert_eq!(
        fetch("/agents").fetch().await,
        Err(SourceFetchError::Status(400))
    );
    assert_eq!(
        fetch("/realtime/network").fetch().await,
        Err(SourceFetchError::Reported("graph offline".into()))
    );
    assert!(matches!(
        fetch("/realtime/economy").fetch().await,
        Err(SourceFetchError::Decode(_))
    ));
}

#[tokio::test]
async fn unreachable_remote_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = HttpSource::new(Client::new(), format!("http://{addr}/realtime/status"));
    assert!(matches!(source.fetch().await, Err(SourceFetchError::Transport(_))));
}

#[tokio::test]
async fn http_remote_surfaces_detail_and_status() {
    let base = spawn_fake().await;
    let remote = HttpRemote::new(Client::new(), base);

    let err = remote
        .execute(&CommandRequest::control(ControlAction::Start))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RemoteError::Rejected {
            status: 400,
            message: Some("Simulation not ready".into()),
        }
    );

    let ack = remote
        .execute(&CommandRequest {
            action: CommandAction::Initialize,
            payload: Some(json!({"num_agents": 50})),
        })
        .await
        .unwrap();
    assert_eq!(ack.message.as_deref(), Some("initialized"));
    assert_eq!(ack.body["config"]["num_agents"], 50);

    let ack = remote
        .execute(&CommandRequest::control(ControlAction::Start))
        .await
        .unwrap();
    assert_eq!(ack.message.as_deref(), Some("started"));
}

#[tokio::test]
async fn engine_tracks_a_live_simulation() {
    let base = spawn_fake().await;
    let client = Client::new();
    let cfg = SyncConfig {
        base_url: base.clone(),
        poll_interval_ms: 100,
        source_timeout_ms: 2_000,
        ..SyncConfig::default()
    };
    let registry = cognisphere_registry(&client, &cfg).unwrap();
    let handle = SyncEngine::spawn(&cfg, registry, Arc::new(HttpRemote::new(client, base)));
    handle.start().await;

    let mut conn = handle.watch_connectivity();
    let state = timeout(Duration::from_secs(5), conn.wait_for(|c| c.connected))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(state.remote_state.as_deref(), Some("not_initialized"));
    assert!(handle.snapshot().slot("agents").unwrap().failed);

    let err = handle.dispatch_action("start", None).await.unwrap_err();
    assert_eq!(err.user_message(), "Simulation not ready");

    handle.dispatch_action("initialize", None).await.unwrap();
    let outcome = handle.dispatch_action("start", None).await.unwrap();
    assert_eq!(outcome.message, "started");

    let mut snaps = handle.watch_snapshot();
    timeout(
        Duration::from_secs(5),
        snaps.wait_for(|s| {
            s.payload("status").map(|p| p["state"] == "running").unwrap_or(false)
                && s.slot("agents").map(|a| !a.failed).unwrap_or(false)
        }),
    )
    .await
    .unwrap()
    .unwrap();

    let snap = handle.snapshot();
    assert!(snap.slot("network").unwrap().failed);
    assert!(snap.slot("economy").unwrap().failed);
    assert_eq!(snap.payload("culture"), Some(&json!({"myths": [], "norms": [], "slang": []})));

    assert!(handle.stop().await);
    assert_eq!(
        handle.dispatch_action("warp", None).await,
        Err(CommandError::UnknownAction("warp".into()))
    );
}
