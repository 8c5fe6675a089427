use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CommandError, RemoteError};
use crate::model::{
    Command, CommandOutcome, CommandRequest, CommandState, Notification, NotificationKind,
};
use crate::time::now_ms;

/// Successful acknowledgement from the remote system.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAck {
    pub message: Option<String>,
    pub body: Value,
}

/// The remote system's mutating endpoints.
#[async_trait]
pub trait Remote: Send + Sync {
    async fn execute(&self, request: &CommandRequest) -> Result<RemoteAck, RemoteError>;
}

/// Whether a settled command asks the poller for an immediate cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    #[default]
    OnSuccess,
    Always,
    Never,
}

impl ResyncPolicy {
    pub fn should_resync(self, succeeded: bool) -> bool {
        match self {
            Self::OnSuccess => succeeded,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

impl FromStr for ResyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_success" => Ok(Self::OnSuccess),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown resync policy '{other}'")),
        }
    }
}

pub type CommandReply = oneshot::Sender<Result<CommandOutcome, CommandError>>;

/// Failure toast for `err`, raised by `action` under `correlation_id`.
pub fn failure_notification(
    correlation_id: Uuid,
    action: impl Into<String>,
    err: &CommandError,
) -> Notification {
    Notification {
        kind: NotificationKind::Failure,
        correlation_id,
        action: action.into(),
        message: err.user_message(),
    }
}

struct Pending {
    command: Command,
    reply: Option<CommandReply>,
}

/// What the engine must do after a command settled.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub command: Command,
    pub notification: Notification,
    pub resync: bool,
}

/// Single-flight command state. Commands are never queued or retried.
pub struct CommandDispatcher {
    pending: Option<Pending>,
    policy: ResyncPolicy,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(policy: ResyncPolicy, timeout: Duration) -> Self {
        Self {
            pending: None,
            policy,
            timeout,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&Command> {
        self.pending.as_ref().map(|p| &p.command)
    }

    /// Mark a command pending, or hand the reply back with `Busy`.
    pub fn try_begin(
        &mut self,
        request: CommandRequest,
        reply: CommandReply,
    ) -> Result<Command, CommandReply> {
        if self.pending.is_some() {
            return Err(reply);
        }
        let command = Command {
            correlation_id: Uuid::new_v4(),
            request,
            state: CommandState::Pending,
            issued_at_ms: now_ms(),
        };
        self.pending = Some(Pending {
            command: command.clone(),
            reply: Some(reply),
        });
        Ok(command)
    }

    /// Settle the pending command and answer its caller exactly once.
    ///
    /// Returns `None` if `correlation_id` is not the pending command.
    pub fn settle(
        &mut self,
        correlation_id: Uuid,
        result: Result<RemoteAck, CommandError>,
    ) -> Option<Settlement> {
        if self.pending.as_ref().map(|p| p.command.correlation_id) != Some(correlation_id) {
            return None;
        }
        let Pending { mut command, reply } = self.pending.take()?;
        let action = command.request.action.to_string();

        let (outcome, notification) = match result {
            Ok(ack) => {
                command.state = CommandState::Succeeded;
                let message = ack
                    .message
                    .unwrap_or_else(|| format!("Simulation {action} succeeded"));
                info!(%correlation_id, %action, "command succeeded: {message}");
                (
                    Ok(CommandOutcome {
                        correlation_id,
                        action: action.clone(),
                        message: message.clone(),
                        body: ack.body,
                    }),
                    Notification {
                        kind: NotificationKind::Success,
                        correlation_id,
                        action,
                        message,
                    },
                )
            }
            Err(err) => {
                command.state = CommandState::Failed;
                warn!(%correlation_id, %action, "command failed: {err}");
                let notification = failure_notification(correlation_id, action, &err);
                (Err(err), notification)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }

        Some(Settlement {
            resync: self.policy.should_resync(command.state == CommandState::Succeeded),
            command,
            notification,
        })
    }

    /// Issue the outbound call for `command` off the engine task.
    pub fn spawn_call<F>(
        &self,
        remote: Arc<dyn Remote>,
        command: &Command,
        on_settled: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Uuid, Result<RemoteAck, CommandError>) + Send + 'static,
    {
        let request = command.request.clone();
        let correlation_id = command.correlation_id;
        let limit = self.timeout;
        tokio::spawn(async move {
            let result = match timeout(limit, remote.execute(&request)).await {
                Ok(Ok(ack)) => Ok(ack),
                Ok(Err(e)) => Err(CommandError::Failed {
                    action: request.action.to_string(),
                    message: e.remote_message().map(str::to_string),
                }),
                Err(_) => Err(CommandError::Timeout(limit)),
            };
            on_settled(correlation_id, result);
        })
    }
}
