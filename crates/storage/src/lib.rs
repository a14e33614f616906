#![forbid(unsafe_code)]

mod archive;
mod backends;
mod error;
mod signals;

pub use archive::{Archive, ArchivedLog};
pub use backends::{DirStore, MemoryStore, SqliteStore, StoreSpec};
pub use error::StoreError;
pub use signals::SignalBoard;

use ho_core::keys::BlobKey;

/// Keyed blob namespace shared by the producer and the consumer.
///
/// Every operation is atomic for a single key (last writer wins). Nothing is atomic
/// across keys: a reader may observe a delete of one key before a put of another.
pub trait BlobStore {
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &BlobKey, value: &[u8]) -> Result<(), StoreError>;

    /// Deleting a missing key succeeds.
    fn delete(&self, key: &BlobKey) -> Result<(), StoreError>;

    /// All keys starting with `prefix`, sorted ascending.
    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>, StoreError>;

    fn exists(&self, key: &BlobKey) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &BlobKey, value: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &BlobKey) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>, StoreError> {
        (**self).list(prefix)
    }

    fn exists(&self, key: &BlobKey) -> Result<bool, StoreError> {
        (**self).exists(key)
    }
}
