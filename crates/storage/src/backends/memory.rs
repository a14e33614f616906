#![forbid(unsafe_code)]

use crate::{BlobStore, StoreError};
use ho_core::keys::BlobKey;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Process-local store. Used by tests and `memory:` dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs
            .lock()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError> {
        let blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(blobs.get(key.as_str()).cloned())
    }

    fn put(&self, key: &BlobKey, value: &[u8]) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        blobs.insert(key.as_str().to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &BlobKey) -> Result<(), StoreError> {
        let mut blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        blobs.remove(key.as_str());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>, StoreError> {
        let blobs = self.blobs.lock().map_err(|_| StoreError::Poisoned)?;
        blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| BlobKey::try_new(key.clone()).map_err(StoreError::from))
            .collect()
    }
}
