#![forbid(unsafe_code)]

use ho_core::ids::WorkUnitIdError;
use ho_core::keys::BlobKeyError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("invalid key: {0}")]
    InvalidKey(#[from] BlobKeyError),
    #[error("invalid store spec `{spec}` (expected dir:PATH, sqlite:PATH or memory:)")]
    InvalidSpec { spec: String },
    #[error("blob {key} is not valid utf-8")]
    NotUtf8 { key: String },
    #[error("blob {key} does not hold a work unit id: {source}")]
    InvalidPayload {
        key: String,
        #[source]
        source: WorkUnitIdError,
    },
    #[error("store lock poisoned")]
    Poisoned,
}
