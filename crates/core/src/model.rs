use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CommandError, SourceFetchError};
use crate::time::EpochMs;

macro_rules! counter_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub const ZERO: Self = Self(0);

            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

counter_newtype!(GenerationId);
counter_newtype!(CycleId);

/// Last known state of one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Slot {
    /// Last accepted payload. Kept across failures.
    pub payload: Option<Value>,
    /// Cycle of the last accepted result, `CycleId::ZERO` if none yet.
    pub cycle: CycleId,
    /// Whether the most recent accepted attempt failed.
    pub failed: bool,
    pub error: Option<String>,
    pub updated_at_ms: Option<EpochMs>,
}

impl Slot {
    pub fn is_stale(&self) -> bool {
        self.failed || self.payload.is_none()
    }
}

/// Committed aggregate state. Consumers get it behind an `Arc` and never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub generation: GenerationId,
    /// Bumped on every accepted mutation.
    pub version: u64,
    pub slots: BTreeMap<String, Slot>,
}

impl Snapshot {
    /// Empty snapshot with one slot per source name.
    pub fn empty<I, S>(generation: GenerationId, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            generation,
            version: 0,
            slots: sources
                .into_iter()
                .map(|name| (name.into(), Slot::default()))
                .collect(),
        }
    }

    pub fn slot(&self, source: &str) -> Option<&Slot> {
        self.slots.get(source)
    }

    pub fn payload(&self, source: &str) -> Option<&Value> {
        self.slot(source).and_then(|s| s.payload.as_ref())
    }
}

/// Outcome of one source fetch in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResult {
    pub source: String,
    pub cycle: CycleId,
    pub generation: GenerationId,
    /// Wall-clock time the fetch settled, stamped by the cycle task.
    pub received_at_ms: EpochMs,
    pub outcome: Result<Value, SourceFetchError>,
}

/// Connectivity derived from the last fully committed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub connected: bool,
    /// Consecutive committed cycles in which the status slot failed.
    pub consecutive_failures: u32,
    pub last_successful_cycle: Option<CycleId>,
    /// Discrete state indicator from the status payload, e.g. `running`.
    pub remote_state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    Stop,
    Step,
}

impl ControlAction {
    pub const ALL: [ControlAction; 5] = [
        ControlAction::Start,
        ControlAction::Pause,
        ControlAction::Resume,
        ControlAction::Stop,
        ControlAction::Step,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Step => "step",
        }
    }
}

/// Mutating call understood by the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAction {
    Initialize,
    Control(ControlAction),
}

impl CommandAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Control(a) => a.as_str(),
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandAction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if name == "initialize" {
            return Ok(Self::Initialize);
        }
        ControlAction::ALL
            .into_iter()
            .find(|a| a.as_str() == name)
            .map(Self::Control)
            .ok_or_else(|| CommandError::UnknownAction(s.to_string()))
    }
}

/// A user action plus optional configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub action: CommandAction,
    pub payload: Option<Value>,
}

impl CommandRequest {
    pub fn new(action: CommandAction) -> Self {
        Self {
            action,
            payload: None,
        }
    }

    pub fn control(action: ControlAction) -> Self {
        Self::new(CommandAction::Control(action))
    }

    pub fn initialize(config: &SimulationConfig) -> Self {
        Self {
            action: CommandAction::Initialize,
            payload: serde_json::to_value(config).ok(),
        }
    }

    /// Parse an action name; the payload is passed through as-is.
    pub fn parse(action: &str, payload: Option<Value>) -> Result<Self, CommandError> {
        Ok(Self {
            action: action.parse()?,
            payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Succeeded,
    Failed,
}

/// One in-flight or settled command.
#[derive(Debug, Clone)]
pub struct Command {
    pub correlation_id: Uuid,
    pub request: CommandRequest,
    pub state: CommandState,
    pub issued_at_ms: EpochMs,
}

/// Successful settlement returned to the dispatch caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub correlation_id: Uuid,
    pub action: String,
    pub message: String,
    /// Raw acknowledgement body.
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Failure,
}

/// Transient user-visible toast produced when a command settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub correlation_id: Uuid,
    pub action: String,
    pub message: String,
}

/// Payload of the `initialize` call. Defaults mirror the remote's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub num_agents: u32,
    pub seed: Option<u64>,
    pub max_ticks: u64,
    pub llm_mode: String,
    pub llm_model: String,
    pub llm_temperature: f64,
    pub tick_duration_ms: u64,
    pub agents_per_tick: u32,
    pub interactions_per_tick: u32,
    pub memory_backend: String,
    pub vector_backend: String,
    pub snapshot_frequency: u32,
    pub snapshot_directory: String,
    pub stimuli_file: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_agents: 300,
            seed: Some(42),
            max_ticks: 10_000,
            llm_mode: "mock".to_string(),
            llm_model: "gpt-3.5-turbo".to_string(),
            llm_temperature: 0.3,
            tick_duration_ms: 100,
            agents_per_tick: 50,
            interactions_per_tick: 100,
            memory_backend: "networkx".to_string(),
            vector_backend: "faiss".to_string(),
            snapshot_frequency: 20,
            snapshot_directory: "snapshots".to_string(),
            stimuli_file: None,
        }
    }
}
