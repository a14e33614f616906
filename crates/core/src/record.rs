#![forbid(unsafe_code)]

use crate::keys::STATUS_FIELD;
use std::collections::BTreeMap;

/// One external command: argument vector plus environment overrides.
///
/// An empty `argv` is a valid descriptor that runs nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandDescriptor {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Space-joined argv, as shown in logs.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }

    pub fn label(&self) -> Option<CommandLabel> {
        CommandLabel::from_argv(&self.argv)
    }
}

/// Storage-safe name of a command: argv joined with spaces, then spaces and path
/// separators replaced by `_`.
///
/// Never equal to the status entry name, which shares the `{id}/` namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandLabel(String);

impl CommandLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_argv(argv: &[String]) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        let joined = argv.join(" ");
        let mut out: String = joined
            .chars()
            .map(|c| {
                if c == ' ' || c == '/' || c == '\\' || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        if out.is_empty() || out == "." || out == ".." {
            out = out.replace('.', "_");
            if out.is_empty() {
                out.push('_');
            }
        }
        if out == STATUS_FIELD {
            out.push('_');
        }
        Some(Self(out))
    }

    /// Re-reads a label that was produced by [`CommandLabel::from_argv`], e.g. from a key listing.
    pub fn from_sanitized(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw == "." || raw == ".." || raw == STATUS_FIELD {
            return None;
        }
        if raw.contains('/') || raw.chars().any(|c| c.is_control()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }
}

impl std::fmt::Display for CommandLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one supervised command.
///
/// `stdout`/`stderr` are only carried out of the runner for failed commands; a passing
/// command's capture is discarded together with its scratch directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionRecord {
    /// A timed-out command is a failure even if it managed to exit 0 while being killed.
    pub fn failed(&self) -> bool {
        self.exit_code != 0 || self.timed_out
    }
}
