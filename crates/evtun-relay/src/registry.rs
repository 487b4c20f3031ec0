//! Routing key -> connection leg registry

use crate::connect::Connect;
use crate::error::RelayError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of live connection legs, keyed by routing key.
///
/// Only the manager owning the registry touches it; the HTTP-facing loops
/// never do, so no lock is shared across the queue/registry boundary.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connects: RwLock<HashMap<String, Arc<Connect>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leg under its own `from` key, returning any entry it replaced
    pub fn insert(&self, connect: Arc<Connect>) -> Option<Arc<Connect>> {
        self.connects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connect.from().to_string(), connect)
    }

    pub fn get(&self, key: &str) -> Option<Arc<Connect>> {
        self.connects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Arc<Connect>> {
        self.connects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Remove `connect` only if it is still the entry registered under its key
    pub fn remove_entry(&self, connect: &Arc<Connect>) -> bool {
        let mut connects = self.connects.write().unwrap_or_else(PoisonError::into_inner);
        match connects.get(connect.from()) {
            Some(current) if Arc::ptr_eq(current, connect) => {
                connects.remove(connect.from());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a payload to the leg registered under `key`
    pub async fn write_to(&self, key: &str, payload: &[u8]) -> Result<(), RelayError> {
        // The lock is released before the write is awaited
        let connect = self
            .get(key)
            .ok_or_else(|| RelayError::ConnectNotFound(key.to_string()))?;
        connect.write(payload).await?;
        Ok(())
    }

    /// Close the leg registered under `key`; its read loop cleans up
    pub fn close(&self, key: &str) -> Result<(), RelayError> {
        let connect = self
            .get(key)
            .ok_or_else(|| RelayError::ConnectNotFound(key.to_string()))?;
        connect.close();
        Ok(())
    }
}
