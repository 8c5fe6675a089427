use crate::model::GenerationId;

/// Active flag plus generation counter.
///
/// The counter moves only on a genuine start. Stop leaves it alone but
/// deactivates, so results tagged with the retired generation no longer match
/// [`active`](Lifecycle::active).
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    running: bool,
    generation: GenerationId,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new generation, or `None` if already running.
    pub fn start(&mut self) -> Option<GenerationId> {
        if self.running {
            return None;
        }
        self.running = true;
        self.generation = self.generation.next();
        Some(self.generation)
    }

    /// Returns `false` if already stopped.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Generation whose results may still be merged.
    pub fn active(&self) -> Option<GenerationId> {
        self.running.then_some(self.generation)
    }

    /// Last allocated generation, running or not.
    pub fn generation(&self) -> GenerationId {
        self.generation
    }
}
