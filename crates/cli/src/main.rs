use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cognisync_core::{
    cognisphere_registry, ConnectivityState, HttpRemote, NotificationKind, Snapshot, SyncConfig,
    SyncEngine, SyncHandle,
};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cognisync", version, about = "Keeps a local view of a remote simulation in sync")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Remote base URL, e.g. http://127.0.0.1:8000
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Poll interval override.
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Poll until Ctrl-C, logging snapshots, connectivity and notifications.
    Watch,
    /// Dispatch one command and print the resynced state.
    Send {
        /// initialize, start, pause, resume, stop or step
        action: String,
        /// JSON payload, e.g. an initialize config
        #[arg(long)]
        payload: Option<String>,
    },
    /// Print connectivity and the snapshot after the first committed cycle.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let client = Client::new();
    let registry = cognisphere_registry(&client, &cfg)?;
    let remote = Arc::new(HttpRemote::new(client, cfg.base_url.clone()));
    let handle = SyncEngine::spawn(&cfg, registry, remote);

    info!("remote={} interval_ms={}", cfg.base_url, cfg.poll_interval_ms);
    let settle = cfg.poll_interval() + cfg.source_timeout();

    let result = match cli.cmd {
        Cmd::Watch => watch_loop(&handle).await,
        Cmd::Send { action, payload } => send(&handle, &action, payload, settle).await,
        Cmd::Status => status(&handle, settle).await,
    };

    handle.stop().await;
    handle.shutdown();
    result
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut cfg = match &cli.config {
        Some(path) => SyncConfig::load_from(path)?,
        None => SyncConfig::default(),
    };
    if let Some(url) = &cli.base_url {
        cfg.base_url = url.clone();
    }
    if let Some(ms) = cli.interval_ms {
        cfg.poll_interval_ms = ms;
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn watch_loop(handle: &SyncHandle) -> Result<()> {
    let _snapshots = handle.subscribe(|snap| info!("snapshot {}", summarize(snap)));
    let mut conn = handle.watch_connectivity();
    let mut toasts = handle.notifications();
    handle.start().await;

    let mut last = conn.borrow_and_update().clone();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received; stopping");
                return Ok(());
            }
            changed = conn.changed() => {
                if changed.is_err() {
                    bail!("sync engine exited");
                }
                let state = conn.borrow_and_update().clone();
                if state.connected != last.connected || state.remote_state != last.remote_state {
                    log_connectivity(&state);
                }
                last = state;
            }
            toast = toasts.recv() => match toast {
                Ok(n) if n.kind == NotificationKind::Success => info!("{}", n.message),
                Ok(n) => warn!("{}", n.message),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("missed {missed} notifications");
                }
                Err(broadcast::error::RecvError::Closed) => bail!("sync engine exited"),
            },
        }
    }
}

async fn send(
    handle: &SyncHandle,
    action: &str,
    payload: Option<String>,
    settle: Duration,
) -> Result<()> {
    let payload: Option<Value> = payload
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("parse payload")?;

    let mut conn = handle.watch_connectivity();
    handle.start().await;
    first_commit(&mut conn, settle).await?;

    conn.borrow_and_update();
    let outcome = match handle.dispatch_action(action, payload).await {
        Ok(outcome) => outcome,
        Err(err) => bail!("{}", err.user_message()),
    };
    info!("{}", outcome.message);

    if timeout(settle, conn.changed()).await.is_err() {
        warn!("no cycle committed within {settle:?} of the command");
    }
    let out = json!({ "outcome": outcome, "snapshot": *handle.snapshot() });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn status(handle: &SyncHandle, settle: Duration) -> Result<()> {
    let mut conn = handle.watch_connectivity();
    handle.start().await;
    let state = first_commit(&mut conn, settle).await?;
    log_connectivity(&state);

    let out = json!({ "connectivity": state, "snapshot": *handle.snapshot() });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn first_commit(
    conn: &mut watch::Receiver<ConnectivityState>,
    settle: Duration,
) -> Result<ConnectivityState> {
    let committed = |c: &ConnectivityState| {
        c.last_successful_cycle.is_some() || c.consecutive_failures > 0
    };
    let state = timeout(settle, conn.wait_for(committed))
        .await
        .context("waiting for first cycle")?
        .context("sync engine exited")?
        .clone();
    Ok(state)
}

fn log_connectivity(state: &ConnectivityState) {
    let remote = state.remote_state.as_deref().unwrap_or("unknown");
    if state.connected {
        info!("connected; remote_state={remote}");
    } else {
        warn!(
            "disconnected; failures={} remote_state={remote}",
            state.consecutive_failures
        );
    }
}

/// One-line view: `v12 gen=1 agents@4 network@3! status@4`. `!` marks a slot
/// that failed or has no payload yet.
fn summarize(snap: &Snapshot) -> String {
    let mut out = format!("v{} gen={}", snap.version, snap.generation);
    for (name, slot) in &snap.slots {
        out.push_str(&format!(" {name}@{}", slot.cycle));
        if slot.is_stale() {
            out.push('!');
        }
    }
    out
}
