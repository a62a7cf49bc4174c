// Context registry
//
// This module provides the concurrency-safe store that binds active
// invocation keys to their payloads.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use ambit_error::{ContextError, ContextResult};

use crate::identity::InvocationKey;

/// Opaque value registered for one invocation
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Storage for active invocation contexts
#[derive(Debug, Default)]
pub struct ContextRegistry {
    /// Active payloads indexed by invocation key
    entries: RwLock<HashMap<InvocationKey, Payload>>,
}

impl ContextRegistry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        ContextRegistry {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `payload` to `key`. Fails if the key is already bound.
    pub fn store(&self, key: InvocationKey, payload: Payload) -> ContextResult<()> {
        let mut entries = self.entries.write().map_err(|_|
            ContextError::LockPoisoned("Failed to acquire write lock on registry".to_string()))?;

        if entries.contains_key(&key) {
            return Err(ContextError::DuplicateKey(key.as_u64()));
        }

        entries.insert(key, payload);
        debug!(%key, active = entries.len(), "stored invocation context");

        Ok(())
    }

    /// Look up the payload bound to `key`
    pub fn read(&self, key: InvocationKey) -> ContextResult<Option<Payload>> {
        let entries = self.entries.read().map_err(|_|
            ContextError::LockPoisoned("Failed to acquire read lock on registry".to_string()))?;

        let payload = entries.get(&key).cloned();
        trace!(%key, found = payload.is_some(), "read invocation context");

        Ok(payload)
    }

    /// Remove the binding for `key`. Fails if there is none.
    pub fn destroy(&self, key: InvocationKey) -> ContextResult<Payload> {
        let mut entries = self.entries.write().map_err(|_|
            ContextError::LockPoisoned("Failed to acquire write lock on registry".to_string()))?;

        let payload = entries
            .remove(&key)
            .ok_or(ContextError::MissingKey(key.as_u64()))?;
        debug!(%key, active = entries.len(), "destroyed invocation context");

        Ok(payload)
    }

    /// Whether `key` is currently bound
    pub fn contains(&self, key: InvocationKey) -> ContextResult<bool> {
        let entries = self.entries.read().map_err(|_|
            ContextError::LockPoisoned("Failed to acquire read lock on registry".to_string()))?;

        Ok(entries.contains_key(&key))
    }

    /// Count active contexts
    pub fn len(&self) -> ContextResult<usize> {
        let entries = self.entries.read().map_err(|_|
            ContextError::LockPoisoned("Failed to acquire read lock on registry".to_string()))?;

        Ok(entries.len())
    }

    pub fn is_empty(&self) -> ContextResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
impl ContextRegistry {
    /// A registry whose lock was poisoned by a panicking writer
    pub(crate) fn poisoned() -> Self {
        let registry = ContextRegistry::new();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _entries = registry.entries.write().unwrap();
            panic!("writer panicked while holding the registry lock");
        }));
        registry
    }
}
