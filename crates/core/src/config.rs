use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::dispatcher::ResyncPolicy;
use crate::time::millis;

/// One polled read endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Path under `base_url`, e.g. `/realtime/network`.
    pub path: String,
}

impl SourceConfig {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub base_url: String,
    pub poll_interval_ms: u64,
    /// Per-source fetch timeout; a timeout fails that source for that cycle only.
    pub source_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub resync_policy: ResyncPolicy,
    /// Name of the mandatory source that drives connectivity.
    pub status_source: String,
    /// Buffered notifications per receiver before old ones are dropped.
    pub notification_capacity: usize,
    pub sources: Vec<SourceConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            poll_interval_ms: 2_000,
            source_timeout_ms: 10_000,
            command_timeout_ms: 10_000,
            resync_policy: ResyncPolicy::OnSuccess,
            status_source: "status".to_string(),
            notification_capacity: 32,
            sources: vec![
                SourceConfig::new("status", "/realtime/status"),
                SourceConfig::new("agents", "/agents"),
                SourceConfig::new("network", "/realtime/network"),
                SourceConfig::new("economy", "/realtime/economy"),
                SourceConfig::new("culture", "/realtime/culture"),
            ],
        }
    }
}

impl SyncConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: SyncConfig =
            toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if self.source_timeout_ms == 0 || self.command_timeout_ms == 0 {
            bail!("timeouts must be positive");
        }
        if self.notification_capacity == 0 {
            bail!("notification_capacity must be positive");
        }
        let mut seen = HashSet::new();
        for src in &self.sources {
            if !seen.insert(src.name.as_str()) {
                bail!("source '{}' is listed twice", src.name);
            }
        }
        if !seen.contains(self.status_source.as_str()) {
            bail!("status source '{}' is not in the source table", self.status_source);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        millis(self.poll_interval_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        millis(self.source_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        millis(self.command_timeout_ms)
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
