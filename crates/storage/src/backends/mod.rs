#![forbid(unsafe_code)]

mod dir;
mod memory;
mod sqlite;

pub use dir::DirStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{BlobStore, StoreError};
use std::path::PathBuf;
use std::str::FromStr;

/// Where the shared namespace lives, as given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreSpec {
    Dir(PathBuf),
    Sqlite(PathBuf),
    Memory,
}

impl StoreSpec {
    pub fn open(&self) -> Result<Box<dyn BlobStore>, StoreError> {
        Ok(match self {
            StoreSpec::Dir(root) => Box::new(DirStore::open(root)?),
            StoreSpec::Sqlite(path) => Box::new(SqliteStore::open(path)?),
            StoreSpec::Memory => Box::new(MemoryStore::new()),
        })
    }
}

impl FromStr for StoreSpec {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid = || StoreError::InvalidSpec {
            spec: raw.to_string(),
        };
        if trimmed.is_empty() {
            return Err(invalid());
        }
        if trimmed == "memory:" {
            return Ok(StoreSpec::Memory);
        }
        if let Some(path) = trimmed.strip_prefix("dir:") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(StoreSpec::Dir(PathBuf::from(path)));
        }
        if let Some(path) = trimmed.strip_prefix("sqlite:") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(StoreSpec::Sqlite(PathBuf::from(path)));
        }
        // A bare path is a directory store.
        if trimmed.contains("://") {
            return Err(invalid());
        }
        Ok(StoreSpec::Dir(PathBuf::from(trimmed)))
    }
}

impl std::fmt::Display for StoreSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreSpec::Dir(root) => write!(f, "dir:{}", root.display()),
            StoreSpec::Sqlite(path) => write!(f, "sqlite:{}", path.display()),
            StoreSpec::Memory => f.write_str("memory:"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parses_known_schemes() {
        assert_eq!(
            "dir:/srv/results".parse::<StoreSpec>().unwrap(),
            StoreSpec::Dir(PathBuf::from("/srv/results"))
        );
        assert_eq!(
            "sqlite:/tmp/x.db".parse::<StoreSpec>().unwrap(),
            StoreSpec::Sqlite(PathBuf::from("/tmp/x.db"))
        );
        assert_eq!("memory:".parse::<StoreSpec>().unwrap(), StoreSpec::Memory);
        assert_eq!(
            "./results".parse::<StoreSpec>().unwrap(),
            StoreSpec::Dir(PathBuf::from("./results"))
        );
    }

    #[test]
    fn spec_rejects_unknown_urls() {
        assert!(matches!(
            "gs://bucket/internal".parse::<StoreSpec>(),
            Err(StoreError::InvalidSpec { .. })
        ));
        assert!("dir:".parse::<StoreSpec>().is_err());
        assert!("".parse::<StoreSpec>().is_err());
    }
}
