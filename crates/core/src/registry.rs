use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RegistryError, SourceFetchError};

/// An idempotent, side-effect-free read against the remote system.
///
/// Implementations must not touch the snapshot; the engine feeds their
/// results to the reducer.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self) -> Result<Value, SourceFetchError>;
}

/// Adapts an async closure into a [`Fetch`].
pub struct FnSource<F>(pub F);

#[async_trait]
impl<F, Fut> Fetch for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, SourceFetchError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<Value, SourceFetchError> {
        (self.0)().await
    }
}

/// Named source entry.
#[derive(Clone)]
pub struct SourceEntry {
    pub name: String,
    pub fetch: Arc<dyn Fetch>,
}

impl std::fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceEntry").field("name", &self.name).finish()
    }
}

/// Ordered set of sources; the mandatory status source is always first.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
}

impl SourceRegistry {
    pub fn new(status_name: impl Into<String>, status: Arc<dyn Fetch>) -> Self {
        Self {
            entries: vec![SourceEntry {
                name: status_name.into(),
                fetch: status,
            }],
        }
    }

    /// Append a source. Names are unique; there is no removal.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        fetch: Arc<dyn Fetch>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.entries.push(SourceEntry { name, fetch });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(
        mut self,
        name: impl Into<String>,
        fetch: Arc<dyn Fetch>,
    ) -> Result<Self, RegistryError> {
        self.register(name, fetch)?;
        Ok(self)
    }

    pub fn status_name(&self) -> &str {
        &self.entries[0].name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
