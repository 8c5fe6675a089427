use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{GenerationId, Slot, Snapshot, SourceResult};

/// Why a result was not merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No generation is active (stopped).
    Inactive,
    StaleGeneration,
    /// Older than what the slot already holds.
    StaleCycle,
    UnknownSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    Accepted(Snapshot),
    Rejected(RejectReason),
}

/// Pure merge of one source result into a snapshot.
///
/// Generation is checked before cycle: a result from a retired generation is
/// dropped whatever its cycle id. On failure the last good payload is kept.
/// The output depends on the inputs only; timestamps come from the result.
pub fn reduce(
    snapshot: &Snapshot,
    result: &SourceResult,
    active: Option<GenerationId>,
) -> Reduction {
    let Some(active) = active else {
        return Reduction::Rejected(RejectReason::Inactive);
    };
    if result.generation != active || snapshot.generation != active {
        return Reduction::Rejected(RejectReason::StaleGeneration);
    }
    let Some(current) = snapshot.slots.get(&result.source) else {
        return Reduction::Rejected(RejectReason::UnknownSource);
    };
    if result.cycle < current.cycle {
        return Reduction::Rejected(RejectReason::StaleCycle);
    }

    let slot = match &result.outcome {
        Ok(payload) => Slot {
            payload: Some(payload.clone()),
            cycle: result.cycle,
            failed: false,
            error: None,
            updated_at_ms: Some(result.received_at_ms),
        },
        Err(e) => Slot {
            payload: current.payload.clone(),
            cycle: result.cycle,
            failed: true,
            error: Some(e.to_string()),
            updated_at_ms: current.updated_at_ms,
        },
    };

    let mut next = snapshot.clone();
    next.version += 1;
    next.slots.insert(result.source.clone(), slot);
    Reduction::Accepted(next)
}

/// Snapshot listener, called on the engine task after every accepted mutation.
pub type Listener = Box<dyn FnMut(&Arc<Snapshot>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Owner of the canonical snapshot.
pub struct StateStore {
    current: Arc<Snapshot>,
    publisher: watch::Sender<Arc<Snapshot>>,
    listeners: Vec<(SubscriptionId, Listener)>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let current = Arc::new(Snapshot::default());
        let (publisher, _) = watch::channel(current.clone());
        Self {
            current,
            publisher,
            listeners: Vec::new(),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.publisher.subscribe()
    }

    pub fn subscribe(&mut self, id: SubscriptionId, listener: Listener) {
        self.listeners.push((id, listener));
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        before != self.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Run the reducer and commit on acceptance. Returns whether it was accepted.
    pub fn apply(&mut self, result: &SourceResult, active: Option<GenerationId>) -> bool {
        match reduce(&self.current, result, active) {
            Reduction::Accepted(next) => {
                self.commit(next);
                true
            }
            Reduction::Rejected(reason) => {
                debug!(
                    source = %result.source,
                    cycle = %result.cycle,
                    generation = %result.generation,
                    ?reason,
                    "discarded source result"
                );
                false
            }
        }
    }

    /// Supersede the snapshot with an empty one for a new generation.
    pub fn reset<'a>(
        &mut self,
        generation: GenerationId,
        sources: impl IntoIterator<Item = &'a str>,
    ) {
        self.commit(Snapshot::empty(generation, sources));
    }

    /// Add an empty slot for a source registered at runtime.
    pub fn add_slot(&mut self, source: &str) {
        if self.current.slots.contains_key(source) {
            return;
        }
        let mut next = (*self.current).clone();
        next.version += 1;
        next.slots.insert(source.to_string(), Slot::default());
        self.commit(next);
    }

    /// Publish `next`. A listener that panics is dropped; the others still run.
    fn commit(&mut self, next: Snapshot) {
        self.current = Arc::new(next);
        self.publisher.send_replace(self.current.clone());
        let current = &self.current;
        self.listeners.retain_mut(|(id, listener)| {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener(current))).is_ok();
            if !delivered {
                warn!(subscription = id.0, "snapshot listener panicked; unsubscribed");
            }
            delivered
        });
    }
}
