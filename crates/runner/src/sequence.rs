#![forbid(unsafe_code)]

use crate::exec::{CommandRunner, RunError};
use ho_core::ids::WorkUnitId;
use ho_core::record::{CommandDescriptor, CommandLabel, ExecutionRecord};
use ho_storage::Archive;
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

/// Exit code recorded when the runner itself broke down (scratch dir, wait, output read).
pub const RUNNER_FAILURE_EXIT: i32 = 125;

/// Where failed records go: the archive, or the operator's terminal.
pub trait FailureSink {
    fn record_failure(
        &mut self,
        label: &CommandLabel,
        command: &CommandDescriptor,
        record: &ExecutionRecord,
    );
}

pub struct ArchiveSink<'a> {
    archive: Archive<'a>,
    id: &'a WorkUnitId,
    errors: usize,
}

impl<'a> ArchiveSink<'a> {
    pub fn new(archive: Archive<'a>, id: &'a WorkUnitId) -> Self {
        Self {
            archive,
            id,
            errors: 0,
        }
    }

    /// Number of failures that could not be archived.
    pub fn errors(&self) -> usize {
        self.errors
    }
}

impl FailureSink for ArchiveSink<'_> {
    fn record_failure(
        &mut self,
        label: &CommandLabel,
        _command: &CommandDescriptor,
        record: &ExecutionRecord,
    ) {
        if let Err(err) = self.archive.archive_record(self.id, label, record) {
            self.errors += 1;
            warn!(work_unit = %self.id, label = %label, error = %err, "archiving logs failed");
        }
    }
}

pub struct PrintSink<W: Write> {
    out: W,
}

impl<W: Write> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FailureSink for PrintSink<W> {
    fn record_failure(
        &mut self,
        _label: &CommandLabel,
        command: &CommandDescriptor,
        record: &ExecutionRecord,
    ) {
        let written = write_record(&mut self.out, &command.display(), record);
        if let Err(err) = written {
            warn!(error = %err, "printing command output failed");
        }
    }
}

pub(crate) fn write_record(
    out: &mut dyn Write,
    command: &str,
    record: &ExecutionRecord,
) -> std::io::Result<()> {
    writeln!(out, "Execution of {command} resulted in:")?;
    writeln!(out, "exit code: {}", record.exit_code)?;
    writeln!(out, "timed out: {}", record.timed_out)?;
    writeln!(out, "stderr:")?;
    out.write_all(&record.stderr)?;
    writeln!(out)?;
    writeln!(out, "stdout:")?;
    out.write_all(&record.stdout)?;
    writeln!(out)?;
    out.flush()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceOutcome {
    /// Commands that actually ran (empty entries are skipped).
    pub ran: usize,
    pub failures: Vec<CommandLabel>,
}

impl SequenceOutcome {
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Runs every planned command, in order, whatever the earlier ones did.
pub struct RunSequencer<'a> {
    runner: &'a CommandRunner,
    cleanup: Option<&'a CommandDescriptor>,
    cleanup_timeout: Duration,
}

impl<'a> RunSequencer<'a> {
    pub fn new(runner: &'a CommandRunner) -> Self {
        Self {
            runner,
            cleanup: None,
            cleanup_timeout: crate::plan::DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    pub fn with_cleanup(
        mut self,
        cleanup: Option<&'a CommandDescriptor>,
        timeout: Duration,
    ) -> Self {
        self.cleanup = cleanup;
        self.cleanup_timeout = timeout;
        self
    }

    pub fn run_all(
        &self,
        commands: &[CommandDescriptor],
        sink: &mut dyn FailureSink,
    ) -> SequenceOutcome {
        let mut outcome = SequenceOutcome::default();
        for command in commands {
            let Some(label) = command.label() else {
                continue;
            };
            let record = match self.runner.run(command) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => runner_failure(&err),
            };
            outcome.ran += 1;
            if record.failed() {
                sink.record_failure(&label, command, &record);
                outcome.failures.push(label);
            }
        }
        self.run_cleanup();
        info!(
            ran = outcome.ran,
            failed = outcome.failures.len(),
            "command sequence finished"
        );
        outcome
    }

    fn run_cleanup(&self) {
        let Some(cleanup) = self.cleanup else {
            return;
        };
        match self.runner.with_timeout(self.cleanup_timeout).run(cleanup) {
            Ok(Some(record)) if record.failed() => warn!(
                command = %cleanup.display(),
                exit_code = record.exit_code,
                timed_out = record.timed_out,
                "cleanup command failed, ignoring"
            ),
            Ok(_) => {}
            Err(err) => warn!(
                command = %cleanup.display(),
                error = %err,
                "cleanup command failed, ignoring"
            ),
        }
    }
}

fn runner_failure(err: &RunError) -> ExecutionRecord {
    warn!(error = %err, "command could not be supervised");
    ExecutionRecord {
        exit_code: RUNNER_FAILURE_EXIT,
        timed_out: false,
        stdout: Vec::new(),
        stderr: format!("{err}\n").into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_record_lists_fields_in_order() {
        let mut out = Vec::new();
        write_record(
            &mut out,
            "tools/test.py --slow",
            &ExecutionRecord {
                exit_code: 2,
                timed_out: false,
                stdout: b"out".to_vec(),
                stderr: b"err".to_vec(),
            },
        )
        .expect("write");
        let text = String::from_utf8(out).expect("utf8");
        let exit = text.find("exit code: 2").expect("exit code");
        let flag = text.find("timed out: false").expect("flag");
        let stderr = text.find("stderr:\nerr").expect("stderr");
        let stdout = text.find("stdout:\nout").expect("stdout");
        assert!(exit < flag && flag < stderr && stderr < stdout);
    }
}
