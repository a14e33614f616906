#![forbid(unsafe_code)]

//! Key layout of the shared blob namespace.
//!
//! ```text
//! magic/OFFERED | magic/CLAIMED | magic/FINISHED      payload: work unit id
//! {id}/status                                         payload: "0" | "1"
//! {id}/{label}/{exitcode|timed_out|stdout|stderr}     archived command logs
//! ```

use crate::ids::WorkUnitId;
use crate::model::Signal;
use crate::record::CommandLabel;

pub const SIGNAL_DIR: &str = "magic";
pub const STATUS_FIELD: &str = "status";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey(String);

impl BlobKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, BlobKeyError> {
        let value = value.into();
        validate_blob_key(&value)?;
        Ok(Self(value))
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlobKeyError {
    Empty,
    TooLong,
    EmptySegment,
    RelativeSegment,
    ContainsControl,
}

impl BlobKeyError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "blob key must not be empty",
            Self::TooLong => "blob key is too long",
            Self::EmptySegment => "blob key must not contain empty segments",
            Self::RelativeSegment => "blob key must not contain '.' or '..' segments",
            Self::ContainsControl => "blob key contains control characters",
        }
    }
}

impl std::fmt::Display for BlobKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for BlobKeyError {}

fn validate_blob_key(value: &str) -> Result<(), BlobKeyError> {
    if value.is_empty() {
        return Err(BlobKeyError::Empty);
    }
    if value.len() > 1024 {
        return Err(BlobKeyError::TooLong);
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(BlobKeyError::ContainsControl);
    }
    for segment in value.split('/') {
        if segment.is_empty() {
            return Err(BlobKeyError::EmptySegment);
        }
        if segment == "." || segment == ".." {
            return Err(BlobKeyError::RelativeSegment);
        }
    }
    Ok(())
}

/// One of the four archived fields of a failed command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogField {
    ExitCode,
    TimedOut,
    Stdout,
    Stderr,
}

impl LogField {
    /// Print order used by the operator read path.
    pub const ALL: [LogField; 4] = [
        LogField::ExitCode,
        LogField::TimedOut,
        LogField::Stderr,
        LogField::Stdout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogField::ExitCode => "exitcode",
            LogField::TimedOut => "timed_out",
            LogField::Stdout => "stdout",
            LogField::Stderr => "stderr",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "exitcode" => Some(LogField::ExitCode),
            "timed_out" => Some(LogField::TimedOut),
            "stdout" => Some(LogField::Stdout),
            "stderr" => Some(LogField::Stderr),
            _ => None,
        }
    }
}

// The helpers below only join segments that were validated on construction
// (WorkUnitId has no '/', CommandLabel has no '/'), so the format is always a valid key.

pub fn signal_key(signal: Signal) -> BlobKey {
    BlobKey(format!("{SIGNAL_DIR}/{}", signal.as_str()))
}

pub fn status_key(id: &WorkUnitId) -> BlobKey {
    BlobKey(format!("{id}/{STATUS_FIELD}"))
}

pub fn log_key(id: &WorkUnitId, label: &CommandLabel, field: LogField) -> BlobKey {
    BlobKey(format!("{id}/{label}/{}", field.as_str()))
}

/// Listing prefix covering everything stored for one work unit.
pub fn work_unit_prefix(id: &WorkUnitId) -> String {
    format!("{id}/")
}

/// Splits `{id}/{label}/{field}` back into its label and field.
///
/// Returns `None` for the status entry and anything that is not an archived log field.
pub fn parse_log_key(id: &WorkUnitId, key: &BlobKey) -> Option<(CommandLabel, LogField)> {
    let rest = key.as_str().strip_prefix(&work_unit_prefix(id))?;
    let (label, field) = rest.rsplit_once('/')?;
    let field = LogField::parse(field)?;
    let label = CommandLabel::from_sanitized(label)?;
    Some((label, field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> WorkUnitId {
        WorkUnitId::try_new(raw).expect("id")
    }

    #[test]
    fn layout_matches_shared_namespace() {
        let hash = id("deadbeef");
        let label = CommandLabel::from_argv(&["tools/test.py".to_string(), "--slow".to_string()])
            .expect("label");
        assert_eq!(signal_key(Signal::Offered).as_str(), "magic/OFFERED");
        assert_eq!(signal_key(Signal::Finished).as_str(), "magic/FINISHED");
        assert_eq!(status_key(&hash).as_str(), "deadbeef/status");
        assert_eq!(
            log_key(&hash, &label, LogField::TimedOut).as_str(),
            "deadbeef/tools_test.py_--slow/timed_out"
        );
    }

    #[test]
    fn parse_log_key_skips_status_and_foreign_keys() {
        let hash = id("deadbeef");
        let status = status_key(&hash);
        assert!(parse_log_key(&hash, &status).is_none());

        let other = BlobKey::try_new("cafe/tools_x/stdout").unwrap();
        assert!(parse_log_key(&hash, &other).is_none());

        let entry = BlobKey::try_new("deadbeef/tools_x/stderr").unwrap();
        let (label, field) = parse_log_key(&hash, &entry).expect("log key");
        assert_eq!(label.as_str(), "tools_x");
        assert_eq!(field, LogField::Stderr);
    }

    #[test]
    fn blob_key_rejects_traversal() {
        assert_eq!(BlobKey::try_new(""), Err(BlobKeyError::Empty));
        assert_eq!(BlobKey::try_new("a//b"), Err(BlobKeyError::EmptySegment));
        assert_eq!(BlobKey::try_new("/a"), Err(BlobKeyError::EmptySegment));
        assert_eq!(
            BlobKey::try_new("a/../b"),
            Err(BlobKeyError::RelativeSegment)
        );
        assert!(BlobKey::try_new("magic/OFFERED").is_ok());
    }
}
