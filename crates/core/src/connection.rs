use serde_json::Value;

use crate::model::{ConnectivityState, CycleId, Snapshot};

/// Derives connectivity from the status slot of each committed cycle.
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    status_source: String,
    state: ConnectivityState,
}

impl ConnectionMonitor {
    pub fn new(status_source: impl Into<String>) -> Self {
        Self {
            status_source: status_source.into(),
            state: ConnectivityState::default(),
        }
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = ConnectivityState::default();
    }

    /// Fold one fully committed cycle into the running state.
    ///
    /// Connected only if the status slot was updated successfully in exactly
    /// this cycle. A status result that never landed counts as a failure.
    pub fn commit(&mut self, snapshot: &Snapshot, cycle: CycleId) -> &ConnectivityState {
        let slot = snapshot.slot(&self.status_source);
        let ok = slot.is_some_and(|s| s.cycle == cycle && !s.failed);

        if ok {
            self.state.connected = true;
            self.state.consecutive_failures = 0;
            self.state.last_successful_cycle = Some(cycle);
            self.state.remote_state = slot.and_then(|s| s.payload.as_ref()).and_then(remote_state);
        } else {
            self.state.connected = false;
            self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        }
        &self.state
    }
}

/// Read the discrete state indicator from a status payload.
///
/// The remote reports `state` once a simulation exists and only a `status`
/// string (e.g. `not_initialized`) before that.
pub fn remote_state(payload: &Value) -> Option<String> {
    payload
        .get("state")
        .or_else(|| payload.get("status"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
