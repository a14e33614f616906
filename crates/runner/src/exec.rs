#![forbid(unsafe_code)]

use ho_core::record::{CommandDescriptor, ExecutionRecord};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exit code reported for a command whose program could not be started.
pub const SPAWN_FAILURE_EXIT: i32 = 127;

const STDOUT_FILE: &str = "stdout";
const STDERR_FILE: &str = "stderr";

/// Per-stream cap on captured output kept for a failed command.
pub const DEFAULT_MAX_CAPTURE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct RunnerSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Time between the polite group terminate and the forced group kill.
    pub kill_grace: Duration,
    pub cwd: Option<PathBuf>,
    /// Where capture directories are created; the system temp dir when unset.
    pub scratch_root: Option<PathBuf>,
    /// Longer captures keep only their tail, behind a truncation marker.
    pub max_capture_bytes: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout: crate::plan::DEFAULT_COMMAND_TIMEOUT,
            poll_interval: Duration::from_secs(2),
            kill_grace: Duration::from_secs(10),
            cwd: None,
            scratch_root: None,
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("create capture directory: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("open capture file: {0}")]
    Capture(#[source] std::io::Error),
    #[error("wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("read captured output of `{command}`: {source}")]
    ReadOutput {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stop {
    Terminate,
    Kill,
}

/// Runs one external command under a wall-clock limit.
///
/// Output is captured into a scoped temporary directory that is removed on return. Captured
/// bytes are only loaded into the record when the command failed, at most
/// `max_capture_bytes` per stream.
#[derive(Clone, Debug, Default)]
pub struct CommandRunner {
    settings: RunnerSettings,
}

impl CommandRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        Self { settings }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut settings = self.settings.clone();
        settings.timeout = timeout;
        Self { settings }
    }

    /// `Ok(None)` for an empty descriptor: nothing runs and nothing is recorded.
    pub fn run(&self, cmd: &CommandDescriptor) -> Result<Option<ExecutionRecord>, RunError> {
        let Some((program, args)) = cmd.argv.split_first() else {
            return Ok(None);
        };
        let cmdline = cmd.display();

        let mut builder = tempfile::Builder::new();
        builder.prefix("ho-run-");
        let scratch = match &self.settings.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(RunError::Scratch)?;
        let stdout_path = scratch.path().join(STDOUT_FILE);
        let stderr_path = scratch.path().join(STDERR_FILE);
        let stdout = File::create(&stdout_path).map_err(RunError::Capture)?;
        let stderr = File::create(&stderr_path).map_err(RunError::Capture)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&cmd.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(cwd) = &self.settings.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        info!(command = %cmdline, timeout_s = self.settings.timeout.as_secs(), "running");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(command = %cmdline, error = %err, "failed to start command");
                return Ok(Some(ExecutionRecord {
                    exit_code: SPAWN_FAILURE_EXIT,
                    timed_out: false,
                    stdout: Vec::new(),
                    stderr: format!("failed to start `{program}`: {err}\n").into_bytes(),
                }));
            }
        };

        let started = Instant::now();
        let (status, timed_out) = self.supervise(&mut child, &cmdline)?;
        let elapsed = started.elapsed();

        let mut record = ExecutionRecord {
            exit_code: exit_code(status),
            timed_out,
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        info!(
            command = %cmdline,
            exit_code = record.exit_code,
            timed_out,
            elapsed_s = elapsed.as_secs(),
            "command finished"
        );
        if record.failed() {
            let read = |path: &PathBuf| {
                read_capture(path, self.settings.max_capture_bytes).map_err(|source| {
                    RunError::ReadOutput {
                        command: cmdline.clone(),
                        source,
                    }
                })
            };
            record.stdout = read(&stdout_path)?;
            record.stderr = read(&stderr_path)?;
        }
        Ok(Some(record))
    }

    fn supervise(&self, child: &mut Child, cmdline: &str) -> Result<(ExitStatus, bool), RunError> {
        let started = Instant::now();
        let mut terminated_at: Option<Instant> = None;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if terminated_at.is_some() {
                        // The leader is gone; take down anything it left in its group.
                        signal_group(child, Stop::Kill);
                    }
                    return Ok((status, terminated_at.is_some()));
                }
                Ok(None) => {}
                Err(source) => {
                    signal_group(child, Stop::Kill);
                    let _ = child.wait();
                    return Err(RunError::Wait {
                        command: cmdline.to_string(),
                        source,
                    });
                }
            }

            match terminated_at {
                None if started.elapsed() >= self.settings.timeout => {
                    warn!(
                        command = %cmdline,
                        timeout_s = self.settings.timeout.as_secs(),
                        "command timed out, terminating its process group"
                    );
                    signal_group(child, Stop::Terminate);
                    terminated_at = Some(Instant::now());
                    continue;
                }
                Some(at) if at.elapsed() >= self.settings.kill_grace => {
                    warn!(command = %cmdline, "process group survived terminate, killing");
                    signal_group(child, Stop::Kill);
                    let status = child.wait().map_err(|source| RunError::Wait {
                        command: cmdline.to_string(),
                        source,
                    })?;
                    return Ok((status, true));
                }
                _ => {}
            }
            sleep(self.next_poll(started, terminated_at));
        }
    }

    fn next_poll(&self, started: Instant, terminated_at: Option<Instant>) -> Duration {
        let deadline = match terminated_at {
            None => started + self.settings.timeout,
            Some(at) => at + self.settings.kill_grace,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.settings
            .poll_interval
            .min(remaining)
            .max(Duration::from_millis(1))
    }
}

/// Whole file when it fits in `cap`, otherwise a marker line plus the last `cap` bytes.
fn read_capture(path: &Path, cap: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len <= cap {
        let mut out = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        file.read_to_end(&mut out)?;
        return Ok(out);
    }
    let skipped = len - cap;
    file.seek(SeekFrom::Start(skipped))?;
    let mut out = format!("[{skipped} bytes truncated]\n").into_bytes();
    file.take(cap).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn signal_group(child: &mut Child, stop: Stop) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    let signal = match stop {
        Stop::Terminate => Signal::SIGTERM,
        Stop::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pgid = raw, signal = %signal, "signalled process group"),
        Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!(pgid = raw, signal = %signal, error = %err, "killpg failed, killing leader");
            let _ = child.kill();
        }
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _stop: Stop) {
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(timeout: Duration) -> CommandRunner {
        CommandRunner::new(RunnerSettings {
            timeout,
            poll_interval: Duration::from_millis(20),
            kill_grace: Duration::from_millis(300),
            ..RunnerSettings::default()
        })
    }

    #[test]
    fn empty_descriptor_runs_nothing() {
        let record = runner(Duration::from_secs(5))
            .run(&CommandDescriptor::default())
            .expect("run");
        assert_eq!(record, None);
    }

    #[test]
    fn missing_program_is_a_failed_record() {
        let record = runner(Duration::from_secs(5))
            .run(&CommandDescriptor::new(["/nonexistent/ho-runner-test-binary"]))
            .expect("run")
            .expect("record");
        assert_eq!(record.exit_code, SPAWN_FAILURE_EXIT);
        assert!(!record.timed_out);
        assert!(record.failed());
        assert!(String::from_utf8_lossy(&record.stderr).contains("failed to start"));
    }

    #[test]
    fn oversized_capture_keeps_the_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(STDOUT_FILE);
        std::fs::write(&path, b"0123456789").expect("write");

        assert_eq!(read_capture(&path, 10).expect("read"), b"0123456789");
        assert_eq!(
            read_capture(&path, 4).expect("read"),
            b"[6 bytes truncated]\n6789"
        );
    }

    #[test]
    fn poll_never_oversleeps_the_deadline() {
        let runner = CommandRunner::new(RunnerSettings {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_secs(2),
            ..RunnerSettings::default()
        });
        assert!(runner.next_poll(Instant::now(), None) <= Duration::from_millis(50));
    }
}
