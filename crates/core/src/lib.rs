#![forbid(unsafe_code)]

pub mod keys;
pub mod record;

pub mod ids {
    /// Opaque name of one round of work (a commit hash in practice).
    ///
    /// Equality is exact string comparison; the value is used verbatim as a key segment.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct WorkUnitId(String);

    impl WorkUnitId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, WorkUnitIdError> {
            let value = value.into();
            let trimmed = value.trim();
            validate_work_unit_id(trimmed)?;
            Ok(Self(trimmed.to_string()))
        }
    }

    impl std::fmt::Display for WorkUnitId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum WorkUnitIdError {
        Empty,
        TooLong,
        ContainsSlash,
        ContainsWhitespace,
        ContainsControl,
        Reserved,
    }

    impl WorkUnitIdError {
        pub fn message(&self) -> &'static str {
            match self {
                Self::Empty => "work unit id must not be empty",
                Self::TooLong => "work unit id is too long",
                Self::ContainsSlash => "work unit id must not contain '/'",
                Self::ContainsWhitespace => "work unit id must not contain whitespace",
                Self::ContainsControl => "work unit id contains control characters",
                Self::Reserved => "work unit id is reserved ('magic', '.' or '..')",
            }
        }
    }

    impl std::fmt::Display for WorkUnitIdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message())
        }
    }

    impl std::error::Error for WorkUnitIdError {}

    fn validate_work_unit_id(value: &str) -> Result<(), WorkUnitIdError> {
        if value.is_empty() {
            return Err(WorkUnitIdError::Empty);
        }
        if value.len() > 256 {
            return Err(WorkUnitIdError::TooLong);
        }
        // Signal blobs live under `magic/`; dot segments would leave the namespace.
        if value == crate::keys::SIGNAL_DIR || value == "." || value == ".." {
            return Err(WorkUnitIdError::Reserved);
        }
        if value.contains('/') {
            return Err(WorkUnitIdError::ContainsSlash);
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(WorkUnitIdError::ContainsControl);
        }
        if value.chars().any(char::is_whitespace) {
            return Err(WorkUnitIdError::ContainsWhitespace);
        }
        Ok(())
    }
}

pub mod model {
    use crate::ids::WorkUnitId;

    /// The three handoff markers. At most one is expected to exist at a time.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum Signal {
        Offered,
        Claimed,
        Finished,
    }

    impl Signal {
        pub const ALL: [Signal; 3] = [Signal::Offered, Signal::Claimed, Signal::Finished];

        pub fn as_str(self) -> &'static str {
            match self {
                Signal::Offered => "OFFERED",
                Signal::Claimed => "CLAIMED",
                Signal::Finished => "FINISHED",
            }
        }
    }

    impl std::fmt::Display for Signal {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Summary of one run, persisted as "0" (passed) or "1" (failed).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum OverallStatus {
        Passed,
        Failed,
    }

    impl OverallStatus {
        pub fn from_failed(failed: bool) -> Self {
            if failed { Self::Failed } else { Self::Passed }
        }

        pub fn as_str(self) -> &'static str {
            match self {
                Self::Passed => "0",
                Self::Failed => "1",
            }
        }

        /// Anything other than an exact "0" is a failure; a garbled status must never pass.
        pub fn parse(raw: &str) -> Self {
            if raw.trim() == "0" {
                Self::Passed
            } else {
                Self::Failed
            }
        }

        pub fn is_failed(self) -> bool {
            matches!(self, Self::Failed)
        }
    }

    /// What the signal blobs looked like at one observation point.
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct SignalSnapshot {
        pub offered: Option<WorkUnitId>,
        pub claimed: Option<WorkUnitId>,
        pub finished: Option<WorkUnitId>,
    }

    impl SignalSnapshot {
        pub fn get(&self, signal: Signal) -> Option<&WorkUnitId> {
            match signal {
                Signal::Offered => self.offered.as_ref(),
                Signal::Claimed => self.claimed.as_ref(),
                Signal::Finished => self.finished.as_ref(),
            }
        }

        pub fn present(&self) -> Vec<Signal> {
            Signal::ALL
                .into_iter()
                .filter(|s| self.get(*s).is_some())
                .collect()
        }

        pub fn is_idle(&self) -> bool {
            self.present().is_empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ids::{WorkUnitId, WorkUnitIdError};
    use super::model::{OverallStatus, Signal, SignalSnapshot};

    #[test]
    fn work_unit_id_trims_and_validates() {
        let id = WorkUnitId::try_new("  3f2a9c\n").expect("valid id");
        assert_eq!(id.as_str(), "3f2a9c");
        assert_eq!(WorkUnitId::try_new("   "), Err(WorkUnitIdError::Empty));
        assert_eq!(
            WorkUnitId::try_new("refs/changes/12"),
            Err(WorkUnitIdError::ContainsSlash)
        );
        assert_eq!(
            WorkUnitId::try_new("a b"),
            Err(WorkUnitIdError::ContainsWhitespace)
        );
        assert_eq!(
            WorkUnitId::try_new("x".repeat(300)),
            Err(WorkUnitIdError::TooLong)
        );
        assert_eq!(
            WorkUnitId::try_new("magic"),
            Err(WorkUnitIdError::Reserved)
        );
        assert_eq!(WorkUnitId::try_new(".."), Err(WorkUnitIdError::Reserved));
    }

    #[test]
    fn overall_status_parse_never_passes_garbage() {
        assert_eq!(OverallStatus::parse("0"), OverallStatus::Passed);
        assert_eq!(OverallStatus::parse("0\n"), OverallStatus::Passed);
        assert_eq!(OverallStatus::parse("1"), OverallStatus::Failed);
        assert_eq!(OverallStatus::parse(""), OverallStatus::Failed);
        assert_eq!(OverallStatus::parse("False"), OverallStatus::Failed);
        assert_eq!(OverallStatus::from_failed(true).as_str(), "1");
    }

    #[test]
    fn snapshot_reports_present_signals_in_protocol_order() {
        let id = WorkUnitId::try_new("abc").unwrap();
        let snapshot = SignalSnapshot {
            offered: None,
            claimed: Some(id.clone()),
            finished: Some(id),
        };
        assert_eq!(snapshot.present(), vec![Signal::Claimed, Signal::Finished]);
        assert!(!snapshot.is_idle());
        assert!(SignalSnapshot::default().is_idle());
    }
}
