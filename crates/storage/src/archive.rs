#![forbid(unsafe_code)]

use crate::{BlobStore, StoreError};
use ho_core::ids::WorkUnitId;
use ho_core::keys::{LogField, log_key, parse_log_key, status_key, work_unit_prefix};
use ho_core::model::OverallStatus;
use ho_core::record::{CommandLabel, ExecutionRecord};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Logs of one failed command as read back from the store.
///
/// Fields are `None` when the entry is missing (e.g. the archiver crashed half-way).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedLog {
    pub label: CommandLabel,
    pub exit_code: Option<i32>,
    pub timed_out: Option<bool>,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

impl ArchivedLog {
    fn empty(label: CommandLabel) -> Self {
        Self {
            label,
            exit_code: None,
            timed_out: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Back to an execution record, when all four fields were found.
    pub fn to_record(&self) -> Option<ExecutionRecord> {
        Some(ExecutionRecord {
            exit_code: self.exit_code?,
            timed_out: self.timed_out?,
            stdout: self.stdout.clone()?,
            stderr: self.stderr.clone()?,
        })
    }
}

/// Per-work-unit result storage: command logs and the overall status.
///
/// Purely additive; nothing here deletes.
pub struct Archive<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> Archive<'a> {
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    pub fn archive_record(
        &self,
        id: &WorkUnitId,
        label: &CommandLabel,
        record: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        info!(destination = %format!("{id}/{label}"), "archiving logs");
        let exit_code = record.exit_code.to_string();
        let timed_out = if record.timed_out { "true" } else { "false" };
        self.store
            .put(&log_key(id, label, LogField::ExitCode), exit_code.as_bytes())?;
        self.store
            .put(&log_key(id, label, LogField::TimedOut), timed_out.as_bytes())?;
        self.store
            .put(&log_key(id, label, LogField::Stdout), &record.stdout)?;
        self.store
            .put(&log_key(id, label, LogField::Stderr), &record.stderr)?;
        Ok(())
    }

    pub fn write_status(&self, id: &WorkUnitId, status: OverallStatus) -> Result<(), StoreError> {
        info!(work_unit = %id, status = status.as_str(), "archiving overall status");
        self.store.put(&status_key(id), status.as_str().as_bytes())
    }

    pub fn read_status(&self, id: &WorkUnitId) -> Result<Option<OverallStatus>, StoreError> {
        let Some(bytes) = self.store.get(&status_key(id))? else {
            return Ok(None);
        };
        Ok(Some(OverallStatus::parse(&String::from_utf8_lossy(&bytes))))
    }

    /// Every archived command log for `id`, ordered by label.
    pub fn fetch_logs(&self, id: &WorkUnitId) -> Result<Vec<ArchivedLog>, StoreError> {
        let mut by_label = BTreeMap::<CommandLabel, ArchivedLog>::new();
        for key in self.store.list(&work_unit_prefix(id))? {
            let Some((label, field)) = parse_log_key(id, &key) else {
                continue;
            };
            let Some(bytes) = self.store.get(&key)? else {
                // Listed but gone: listing and reads are not one snapshot.
                continue;
            };
            let entry = by_label
                .entry(label.clone())
                .or_insert_with(|| ArchivedLog::empty(label));
            match field {
                LogField::ExitCode => {
                    let raw = String::from_utf8_lossy(&bytes);
                    entry.exit_code = raw.trim().parse::<i32>().ok();
                    if entry.exit_code.is_none() {
                        warn!(key = %key, value = %raw, "unparseable archived exit code");
                    }
                }
                LogField::TimedOut => {
                    entry.timed_out = parse_flag(&String::from_utf8_lossy(&bytes));
                }
                LogField::Stdout => entry.stdout = Some(bytes),
                LogField::Stderr => entry.stderr = Some(bytes),
            }
        }
        Ok(by_label.into_values().collect())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_accepts_legacy_spellings() {
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag("false\n"), Some(false));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
