use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::error::SourceFetchError;
use crate::model::{CycleId, GenerationId, SourceResult};
use crate::registry::SourceEntry;
use crate::time::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Scheduled,
    Fetching,
    Stopped,
}

/// What a `trigger_now` request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Pending timer superseded; begin a cycle now.
    BeginNow,
    /// A cycle is in flight; another one follows as soon as it completes.
    Coalesced,
    /// Not running.
    Ignored,
}

/// Cycle scheduling state machine. Time is passed in so it stays pure.
#[derive(Debug, Clone)]
pub struct Poller {
    state: PollerState,
    interval: Duration,
    next_tick: Option<Instant>,
    last_cycle: CycleId,
    in_flight: Option<CycleId>,
    rerun: bool,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: PollerState::Idle,
            interval,
            next_tick: None,
            last_cycle: CycleId::ZERO,
            in_flight: None,
            rerun: false,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the timer fires, if a cycle is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            PollerState::Scheduled => self.next_tick,
            _ => None,
        }
    }

    pub fn in_flight(&self) -> Option<CycleId> {
        self.in_flight
    }

    /// Idle/Stopped -> Scheduled, first tick immediately.
    pub fn start(&mut self, now: Instant) -> bool {
        match self.state {
            PollerState::Idle | PollerState::Stopped => {
                self.state = PollerState::Scheduled;
                self.next_tick = Some(now);
                self.in_flight = None;
                self.rerun = false;
                true
            }
            PollerState::Scheduled | PollerState::Fetching => false,
        }
    }

    pub fn stop(&mut self) -> bool {
        if self.state == PollerState::Stopped {
            return false;
        }
        self.state = PollerState::Stopped;
        self.next_tick = None;
        self.in_flight = None;
        self.rerun = false;
        true
    }

    pub fn trigger_now(&mut self) -> TriggerDecision {
        match self.state {
            PollerState::Scheduled => TriggerDecision::BeginNow,
            PollerState::Fetching => {
                self.rerun = true;
                TriggerDecision::Coalesced
            }
            PollerState::Idle | PollerState::Stopped => TriggerDecision::Ignored,
        }
    }

    /// Scheduled -> Fetching. Allocates the cycle id before any fetch is issued.
    pub fn begin_cycle(&mut self) -> CycleId {
        debug_assert_eq!(self.state, PollerState::Scheduled);
        self.last_cycle = self.last_cycle.next();
        self.state = PollerState::Fetching;
        self.next_tick = None;
        self.in_flight = Some(self.last_cycle);
        self.last_cycle
    }

    /// Fetching -> Scheduled once every source of `cycle` settled.
    ///
    /// The next tick is measured from `now`, the cycle's end. Returns `false`
    /// for a cycle that is not the one in flight (e.g. from before a stop).
    pub fn complete_cycle(&mut self, cycle: CycleId, now: Instant) -> bool {
        if self.state != PollerState::Fetching || self.in_flight != Some(cycle) {
            return false;
        }
        self.in_flight = None;
        self.state = PollerState::Scheduled;
        self.next_tick = Some(if std::mem::take(&mut self.rerun) {
            now
        } else {
            now + self.interval
        });
        true
    }
}

/// Progress of one running cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleEvent {
    Settled(SourceResult),
    /// Every source of the cycle reached a terminal state.
    Completed {
        generation: GenerationId,
        cycle: CycleId,
    },
}

/// Fetch every source concurrently, forwarding each result as it settles.
///
/// Settle-all: a failing, panicking or timed out source only produces a failed
/// result for its own slot. `Completed` is emitted after the last result.
pub fn spawn_cycle<E>(
    sources: Vec<SourceEntry>,
    generation: GenerationId,
    cycle: CycleId,
    source_timeout: Duration,
    emit: E,
) -> tokio::task::JoinHandle<()>
where
    E: Fn(CycleEvent) + Send + 'static,
{
    tokio::spawn(async move {
        let mut set = JoinSet::new();
        let mut names = HashMap::new();

        for entry in sources {
            let name = entry.name.clone();
            let fetch = entry.fetch;
            let handle = set.spawn(async move {
                match timeout(source_timeout, fetch.fetch()).await {
                    Ok(res) => res,
                    Err(_) => Err(SourceFetchError::Timeout(source_timeout)),
                }
            });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(SourceFetchError::Panicked(e.to_string()))),
            };
            let Some(source) = names.remove(&id) else {
                continue;
            };
            if let Err(e) = &outcome {
                warn!(%source, %cycle, "source fetch failed: {e}");
            }
            emit(CycleEvent::Settled(SourceResult {
                source,
                cycle,
                generation,
                received_at_ms: now_ms(),
                outcome,
            }));
        }

        debug!(%cycle, %generation, "cycle settled");
        emit(CycleEvent::Completed { generation, cycle });
    })
}
