//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::error::StateError;
use super::KeyValueStore;

/// Non-durable store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}
