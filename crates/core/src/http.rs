use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::SyncConfig;
use crate::dispatcher::{Remote, RemoteAck};
use crate::error::{RemoteError, SourceFetchError};
use crate::model::{CommandAction, CommandRequest, SimulationConfig};
use crate::registry::{Fetch, SourceRegistry};

/// `GET` of one JSON read endpoint.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
}

impl HttpSource {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Fetch for HttpSource {
    async fn fetch(&self) -> Result<Value, SourceFetchError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceFetchError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceFetchError::Status(status.as_u16()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceFetchError::Decode(e.to_string()))?;
        match reported_error(&body) {
            Some(msg) => Err(SourceFetchError::Reported(msg)),
            None => Ok(body),
        }
    }
}

/// Error carried inside a 200 response.
///
/// The realtime endpoints answer `{"status": "error", "error": ...}` or
/// their empty default plus an `error` string instead of failing the request.
pub fn reported_error(body: &Value) -> Option<String> {
    let error = body.get("error").and_then(Value::as_str);
    if body.get("status").and_then(Value::as_str) == Some("error") {
        return Some(error.unwrap_or("unspecified error").to_string());
    }
    error.map(str::to_string)
}

/// The remote's `initialize` and `control` endpoints.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, request: &CommandRequest) -> (String, Value) {
        match request.action {
            CommandAction::Initialize => (
                format!("{}/simulation/initialize", self.base_url),
                request
                    .payload
                    .clone()
                    .unwrap_or_else(|| json!(SimulationConfig::default())),
            ),
            CommandAction::Control(action) => (
                format!("{}/simulation/control", self.base_url),
                json!({ "action": action.as_str() }),
            ),
        }
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn execute(&self, request: &CommandRequest) -> Result<RemoteAck, RemoteError> {
        let (url, body) = self.endpoint(request);
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message: body
                    .get("detail")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        if body.is_null() && !text.trim().is_empty() {
            return Err(RemoteError::Decode(format!("non-JSON acknowledgement: {text}")));
        }
        Ok(RemoteAck {
            message: body
                .get("message")
                .or_else(|| body.get("status"))
                .and_then(Value::as_str)
                .map(str::to_string),
            body,
        })
    }
}

/// Registry of HTTP sources from the configured source table.
pub fn cognisphere_registry(client: &Client, config: &SyncConfig) -> Result<SourceRegistry> {
    config.validate()?;
    let source = |path: &str| -> Arc<dyn Fetch> {
        Arc::new(HttpSource::new(client.clone(), config.url(path)))
    };
    let status = config
        .sources
        .iter()
        .find(|s| s.name == config.status_source)
        .context("status source missing")?;

    let mut registry = SourceRegistry::new(status.name.clone(), source(&status.path));
    for src in config.sources.iter().filter(|s| s.name != config.status_source) {
        registry
            .register(src.name.clone(), source(&src.path))
            .with_context(|| format!("register source {}", src.name))?;
    }
    Ok(registry)
}
