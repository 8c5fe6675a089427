use std::time::Duration;

use thiserror::Error;

/// Failure of one source in one cycle. Never aborts the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceFetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote returned status {0}")]
    Status(u16),
    #[error("invalid payload: {0}")]
    Decode(String),
    /// The remote answered successfully but the payload carries an error.
    #[error("remote reported: {0}")]
    Reported(String),
    #[error("fetch task panicked: {0}")]
    Panicked(String),
}

/// Failure of one outbound mutating call, as seen by the remote adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote rejected the call with status {status}")]
    Rejected { status: u16, message: Option<String> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Message supplied by the remote system, if any.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

/// Error surfaced once to the caller of `dispatch`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Another command is still pending; nothing was sent.
    #[error("another command is still pending")]
    Busy,
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("{action} failed: {}", .message.as_deref().unwrap_or("no message from remote"))]
    Failed {
        action: String,
        message: Option<String>,
    },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("sync engine is not running")]
    EngineClosed,
}

impl CommandError {
    /// Text for the transient failure toast.
    pub fn user_message(&self) -> String {
        match self {
            Self::Failed {
                message: Some(m), ..
            } => m.clone(),
            Self::Failed { action, .. } => format!("Failed to {action} simulation"),
            Self::Timeout(_) => "The simulation did not respond in time".to_string(),
            Self::Busy => "Another command is still in progress".to_string(),
            Self::UnknownAction(a) => format!("Unknown action '{a}'"),
            Self::EngineClosed => "Dashboard sync is not running".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("source '{0}' is already registered")]
    Duplicate(String),
    #[error("sync engine is not running")]
    EngineClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_command_prefers_remote_message() {
        let err = CommandError::Failed {
            action: "start".into(),
            message: Some("Simulation not ready".into()),
        };
        assert_eq!(err.user_message(), "Simulation not ready");

        let err = CommandError::Failed {
            action: "pause".into(),
            message: None,
        };
        assert_eq!(err.user_message(), "Failed to pause simulation");
    }
}
