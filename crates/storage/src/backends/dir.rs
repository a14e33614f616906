#![forbid(unsafe_code)]

use crate::{BlobStore, StoreError};
use ho_core::keys::BlobKey;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const TMP_PREFIX: &str = ".ho-tmp-";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Blob namespace mapped onto a directory tree (one file per key).
///
/// Writes land in a sibling temp file and are renamed into place, so a reader sees either
/// the old or the new value, never a torn one. Works over any shared filesystem that
/// provides atomic rename.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &BlobKey) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.segments() {
            path.push(segment);
        }
        path
    }

    fn collect_keys(
        &self,
        dir: &Path,
        rel: &mut Vec<String>,
        out: &mut Vec<BlobKey>,
    ) -> Result<(), StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            let file_type = entry.file_type()?;
            rel.push(name);
            if file_type.is_dir() {
                self.collect_keys(&entry.path(), rel, out)?;
            } else if file_type.is_file()
                && let Ok(key) = BlobKey::try_new(rel.join("/"))
            {
                out.push(key);
            }
            rel.pop();
        }
        Ok(())
    }
}

impl BlobStore for DirStore {
    fn get(&self, key: &BlobKey) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key);
        if path.is_dir() {
            return Ok(None);
        }
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &BlobKey, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let Some(parent) = path.parent() else {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "blob path has no parent directory",
            )));
        };
        fs::create_dir_all(parent)?;
        let nonce = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = parent.join(format!("{TMP_PREFIX}{}-{nonce}", std::process::id()));
        if let Err(err) = fs::write(&tmp, value) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn delete(&self, key: &BlobKey) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobKey>, StoreError> {
        let mut out = Vec::new();
        self.collect_keys(&self.root, &mut Vec::new(), &mut out)?;
        out.retain(|key| key.as_str().starts_with(prefix));
        out.sort();
        Ok(out)
    }
}
