#![forbid(unsafe_code)]

use ho_core::ids::WorkUnitId;
use ho_core::keys::LogField;
use ho_core::model::Signal;
use ho_core::record::CommandDescriptor;
use ho_storage::{Archive, ArchivedLog, BlobStore, SignalBoard, StoreError};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Prints every archived log of `id`. Returns how many command entries were found.
pub fn print_logs(
    store: &dyn BlobStore,
    id: &WorkUnitId,
    out: &mut dyn Write,
) -> Result<usize, ReportError> {
    let archive = Archive::new(store);
    let logs = archive.fetch_logs(id)?;
    match archive.read_status(id)? {
        Some(status) => writeln!(out, "Overall status of {id}: {}", status.as_str())?,
        None => writeln!(out, "No overall status archived for {id}")?,
    }
    for log in &logs {
        write_log(out, id, log)?;
    }
    out.flush()?;
    Ok(logs.len())
}

fn write_log(out: &mut dyn Write, id: &WorkUnitId, log: &ArchivedLog) -> std::io::Result<()> {
    writeln!(out, "\n\n== {id}/{} ==", log.label)?;
    for field in LogField::ALL {
        writeln!(out, "\n{} had value:", field.as_str())?;
        match field {
            LogField::ExitCode => match log.exit_code {
                Some(code) => writeln!(out, "{code}")?,
                None => writeln!(out, "<missing>")?,
            },
            LogField::TimedOut => match log.timed_out {
                Some(flag) => writeln!(out, "{flag}")?,
                None => writeln!(out, "<missing>")?,
            },
            LogField::Stdout | LogField::Stderr => {
                let bytes = if field == LogField::Stdout {
                    &log.stdout
                } else {
                    &log.stderr
                };
                match bytes {
                    Some(bytes) => {
                        out.write_all(bytes)?;
                        writeln!(out)?;
                    }
                    None => writeln!(out, "<missing>")?,
                }
            }
        }
    }
    Ok(())
}

/// One line per signal: its payload, or that it is absent.
pub fn print_state(store: &dyn BlobStore, out: &mut dyn Write) -> Result<(), ReportError> {
    let board = SignalBoard::new(store);
    for signal in Signal::ALL {
        match board.read(signal) {
            Ok(Some(id)) => writeln!(out, "{signal}: {id}")?,
            Ok(None) => writeln!(out, "{signal}: absent")?,
            Err(err @ (StoreError::NotUtf8 { .. } | StoreError::InvalidPayload { .. })) => {
                writeln!(out, "{signal}: garbled ({err})")?
            }
            Err(err) => return Err(err.into()),
        }
    }
    out.flush()?;
    Ok(())
}

/// Runs the auxiliary report command in the foreground, output straight to the terminal.
pub fn run_report_command(cmd: &CommandDescriptor, cwd: &Path) -> std::io::Result<ExitStatus> {
    let Some((program, args)) = cmd.argv.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty report command",
        ));
    };
    info!(command = %cmd.display(), "running report command");
    Command::new(program)
        .args(args)
        .envs(&cmd.env)
        .current_dir(cwd)
        .status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ho_core::model::OverallStatus;
    use ho_core::record::{CommandLabel, ExecutionRecord};
    use ho_storage::MemoryStore;

    fn id(raw: &str) -> WorkUnitId {
        WorkUnitId::try_new(raw).expect("id")
    }

    #[test]
    fn prints_fields_in_fixed_order() {
        let store = MemoryStore::new();
        let archive = Archive::new(&store);
        let hash = id("abc");
        let label = CommandLabel::from_sanitized("tools_test.py").expect("label");
        archive
            .archive_record(
                &hash,
                &label,
                &ExecutionRecord {
                    exit_code: 2,
                    timed_out: false,
                    stdout: b"the stdout".to_vec(),
                    stderr: b"the stderr".to_vec(),
                },
            )
            .expect("archive");
        archive
            .write_status(&hash, OverallStatus::Failed)
            .expect("status");

        let mut out = Vec::new();
        assert_eq!(print_logs(&store, &hash, &mut out).expect("print"), 1);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("Overall status of abc: 1"));
        let order = [
            "exitcode had value:\n2",
            "timed_out had value:\nfalse",
            "stderr had value:\nthe stderr",
            "stdout had value:\nthe stdout",
        ]
        .map(|needle| text.find(needle).expect(needle));
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn state_lists_every_signal() {
        let store = MemoryStore::new();
        SignalBoard::new(&store)
            .put(Signal::Offered, &id("abc"))
            .expect("put");
        let mut out = Vec::new();
        print_state(&store, &mut out).expect("state");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "OFFERED: abc\nCLAIMED: absent\nFINISHED: absent\n"
        );
    }
}
