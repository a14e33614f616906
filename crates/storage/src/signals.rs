#![forbid(unsafe_code)]

use crate::{BlobStore, StoreError};
use ho_core::ids::WorkUnitId;
use ho_core::keys::signal_key;
use ho_core::model::{Signal, SignalSnapshot};
use tracing::{info, warn};

/// Read/write access to the three handoff markers under `magic/`.
pub struct SignalBoard<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> SignalBoard<'a> {
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    pub fn exists(&self, signal: Signal) -> Result<bool, StoreError> {
        self.store.exists(&signal_key(signal))
    }

    pub fn read(&self, signal: Signal) -> Result<Option<WorkUnitId>, StoreError> {
        let key = signal_key(signal);
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes).map_err(|_| StoreError::NotUtf8 {
            key: key.to_string(),
        })?;
        let id = WorkUnitId::try_new(text).map_err(|source| StoreError::InvalidPayload {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(id))
    }

    pub fn put(&self, signal: Signal, id: &WorkUnitId) -> Result<(), StoreError> {
        self.store.put(&signal_key(signal), id.as_str().as_bytes())
    }

    pub fn delete(&self, signal: Signal) -> Result<(), StoreError> {
        self.store.delete(&signal_key(signal))
    }

    pub fn snapshot(&self) -> Result<SignalSnapshot, StoreError> {
        Ok(SignalSnapshot {
            offered: self.read(Signal::Offered)?,
            claimed: self.read(Signal::Claimed)?,
            finished: self.read(Signal::Finished)?,
        })
    }

    /// Corruption recovery: deletes every signal that exists, whatever its payload.
    ///
    /// Idempotent. Returns the signals that were present.
    pub fn clear_stale(&self) -> Result<Vec<Signal>, StoreError> {
        let mut cleared = Vec::new();
        for signal in Signal::ALL {
            if self.exists(signal)? {
                warn!(signal = %signal, "synchronizing signal exists, cleaning up");
                self.delete(signal)?;
                cleared.push(signal);
            }
        }
        Ok(cleared)
    }

    /// Logs every present signal with its raw payload. Never fails on a garbled payload.
    pub fn log_state(&self) {
        for signal in Signal::ALL {
            match self.store.get(&signal_key(signal)) {
                Ok(Some(bytes)) => {
                    let content = String::from_utf8_lossy(&bytes);
                    info!(signal = %signal, content = %content.trim(), "signal state");
                }
                Ok(None) => {}
                Err(err) => warn!(signal = %signal, error = %err, "signal state unreadable"),
            }
        }
    }
}
