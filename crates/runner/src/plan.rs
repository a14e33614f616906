#![forbid(unsafe_code)]

//! The command plan: which commands a run executes and how.
//!
//! ```json
//! {
//!   "env": { "R8_GRADLE_CORES_PER_FORK": "16" },
//!   "command_timeout_s": 21600,
//!   "commands": [
//!     ["tools/test.py", "--only_internal", "--slow_tests"],
//!     { "argv": ["tools/run_on_app.py", "--run-all"], "env": { "OUT": "out" } },
//!     []
//!   ],
//!   "cleanup": ["tools/gradle.py", "--stop"],
//!   "report": ["tools/run_on_app.py", "--print-ranges", "{id}"]
//! }
//! ```
//!
//! An empty entry is kept: it runs nothing but still counts towards the producer timeout.

use ho_core::ids::WorkUnitId;
use ho_core::record::CommandDescriptor;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(6 * 3600);
pub(crate) const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(300);
const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("read plan {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse plan {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("plan {}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Argv(Vec<String>),
    Full {
        argv: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

impl RawCommand {
    fn into_descriptor(self, base_env: &BTreeMap<String, String>) -> CommandDescriptor {
        let (argv, env) = match self {
            RawCommand::Argv(argv) => (argv, BTreeMap::new()),
            RawCommand::Full { argv, env } => (argv, env),
        };
        let mut merged = base_env.clone();
        merged.extend(env);
        CommandDescriptor { argv, env: merged }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlan {
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    command_timeout_s: Option<u64>,
    #[serde(default)]
    cleanup_timeout_s: Option<u64>,
    #[serde(default)]
    commands: Vec<RawCommand>,
    #[serde(default)]
    cleanup: Option<RawCommand>,
    #[serde(default)]
    report: Option<RawCommand>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandPlan {
    pub commands: Vec<CommandDescriptor>,
    pub cleanup: Option<CommandDescriptor>,
    pub report: Option<CommandDescriptor>,
    pub command_timeout: Option<Duration>,
    pub cleanup_timeout: Option<Duration>,
}

impl CommandPlan {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, PlanError> {
        let raw: RawPlan = serde_json::from_str(text).map_err(|source| PlanError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.command_timeout_s == Some(0) {
            return Err(PlanError::Invalid {
                path: path.to_path_buf(),
                message: "command_timeout_s must be positive".to_string(),
            });
        }
        let env = raw.env;
        Ok(Self {
            commands: raw
                .commands
                .into_iter()
                .map(|cmd| cmd.into_descriptor(&env))
                .collect(),
            cleanup: raw
                .cleanup
                .map(|cmd| cmd.into_descriptor(&env))
                .filter(|cmd| !cmd.is_empty()),
            report: raw
                .report
                .map(|cmd| cmd.into_descriptor(&env))
                .filter(|cmd| !cmd.is_empty()),
            command_timeout: raw.command_timeout_s.map(Duration::from_secs),
            cleanup_timeout: raw.cleanup_timeout_s.map(Duration::from_secs),
        })
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        self.cleanup_timeout.unwrap_or(DEFAULT_CLEANUP_TIMEOUT)
    }

    /// How long the producer waits for a result: one command timeout per planned command.
    pub fn producer_timeout(&self, command_timeout: Duration) -> Duration {
        let slots = u32::try_from(self.commands.len().max(1)).unwrap_or(u32::MAX);
        command_timeout.saturating_mul(slots)
    }

    /// The auxiliary report command with `{id}` substituted, if the plan has one.
    pub fn report_for(&self, id: &WorkUnitId) -> Option<CommandDescriptor> {
        let report = self.report.as_ref()?;
        Some(CommandDescriptor {
            argv: report
                .argv
                .iter()
                .map(|arg| arg.replace(ID_PLACEHOLDER, id.as_str()))
                .collect(),
            env: report.env.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<CommandPlan, PlanError> {
        CommandPlan::parse(Path::new("plan.json"), text)
    }

    #[test]
    fn accepts_short_and_long_command_forms() {
        let plan = parse(
            r#"{
                "env": { "CORES": "16", "MODE": "ci" },
                "commands": [
                    ["tools/test.py", "--slow"],
                    { "argv": ["tools/run_on_app.py"], "env": { "MODE": "apps" } },
                    []
                ],
                "cleanup": ["tools/gradle.py", "--stop"]
            }"#,
        )
        .expect("plan");

        assert_eq!(plan.commands.len(), 3);
        assert_eq!(plan.commands[0].argv, vec!["tools/test.py", "--slow"]);
        assert_eq!(plan.commands[0].env.get("CORES").map(String::as_str), Some("16"));
        assert_eq!(plan.commands[1].env.get("MODE").map(String::as_str), Some("apps"));
        assert!(plan.commands[2].is_empty());
        assert_eq!(
            plan.cleanup.as_ref().map(|c| c.display()),
            Some("tools/gradle.py --stop".to_string())
        );
        assert_eq!(plan.command_timeout(), DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn producer_timeout_scales_with_command_count() {
        let plan = parse(r#"{ "commands": [["a"], ["b"], []] }"#).expect("plan");
        assert_eq!(
            plan.producer_timeout(Duration::from_secs(10)),
            Duration::from_secs(30)
        );
        let empty = parse("{}").expect("empty plan");
        assert_eq!(
            empty.producer_timeout(Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn report_substitutes_work_unit_id() {
        let plan = parse(r#"{ "report": ["show", "--hash={id}", "{id}"] }"#).expect("plan");
        let id = WorkUnitId::try_new("abc123").unwrap();
        let report = plan.report_for(&id).expect("report");
        assert_eq!(report.argv, vec!["show", "--hash=abc123", "abc123"]);
    }

    #[test]
    fn rejects_unknown_fields_and_zero_timeout() {
        assert!(matches!(
            parse(r#"{ "comands": [] }"#),
            Err(PlanError::Parse { .. })
        ));
        assert!(matches!(
            parse(r#"{ "command_timeout_s": 0 }"#),
            Err(PlanError::Invalid { .. })
        ));
    }
}
