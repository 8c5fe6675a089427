#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cognisync_core::{
    CommandRequest, Fetch, FnSource, Remote, RemoteAck, RemoteError, SourceFetchError,
    SyncConfig,
};
use serde_json::{json, Value};
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

pub fn config(interval_ms: u64) -> SyncConfig {
    SyncConfig {
        poll_interval_ms: interval_ms,
        ..SyncConfig::default()
    }
}

/// Counts fetches and records when they happened.
#[derive(Default)]
pub struct Probe {
    calls: AtomicUsize,
    times: Mutex<Vec<Instant>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hit(&self) -> usize {
        self.times.lock().unwrap().push(Instant::now());
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetch times as whole milliseconds since `t0`.
    pub fn offsets_ms(&self, t0: Instant) -> Vec<u128> {
        self.times
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(t0).as_millis())
            .collect()
    }
}

/// Succeeds with `{"state": state, "n": call}`.
pub fn status_source(probe: Arc<Probe>, state: &'static str) -> Arc<dyn Fetch> {
    Arc::new(FnSource(move || {
        let n = probe.hit();
        async move { Ok(json!({ "state": state, "n": n })) }
    }))
}

/// Succeeds with `{"n": call}`.
pub fn counting_source(probe: Arc<Probe>) -> Arc<dyn Fetch> {
    Arc::new(FnSource(move || {
        let n = probe.hit();
        async move { Ok(json!({ "n": n })) }
    }))
}

pub fn failing_source(probe: Arc<Probe>) -> Arc<dyn Fetch> {
    Arc::new(FnSource(move || {
        probe.hit();
        async move { Err::<Value, _>(SourceFetchError::Status(503)) }
    }))
}

/// Resolves after `delay` with `{"n": call}`.
pub fn slow_source(probe: Arc<Probe>, delay: Duration) -> Arc<dyn Fetch> {
    Arc::new(FnSource(move || {
        let n = probe.hit();
        async move {
            tokio::time::sleep(delay).await;
            Ok(json!({ "n": n }))
        }
    }))
}

/// Panics inside every fetch.
pub struct PanickingSource(pub Arc<Probe>);

#[async_trait]
impl Fetch for PanickingSource {
    async fn fetch(&self) -> Result<Value, SourceFetchError> {
        self.0.hit();
        panic!("economy feed exploded");
    }
}

/// Remote whose calls optionally wait for a permit before answering.
pub struct MockRemote {
    pub calls: AtomicUsize,
    pub started: Notify,
    gate: Option<Semaphore>,
    fail_with: Option<RemoteError>,
    hang: bool,
}

impl MockRemote {
    pub fn acking() -> Arc<Self> {
        Arc::new(Self::build(None, None, false))
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Semaphore::new(0)), None, false))
    }

    pub fn failing(err: RemoteError) -> Arc<Self> {
        Arc::new(Self::build(None, Some(err), false))
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self::build(None, None, true))
    }

    fn build(gate: Option<Semaphore>, fail_with: Option<RemoteError>, hang: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            started: Notify::new(),
            gate,
            fail_with,
            hang,
        }
    }

    /// Let one gated call settle.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Remote for MockRemote {
    async fn execute(&self, request: &CommandRequest) -> Result<RemoteAck, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let status = match request.action.as_str() {
            "initialize" => "initialized",
            "start" => "started",
            "pause" => "paused",
            "resume" => "resumed",
            "stop" => "stopped",
            _ => "stepped",
        };
        Ok(RemoteAck {
            message: Some(status.to_string()),
            body: json!({ "status": status }),
        })
    }
}
