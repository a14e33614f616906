#![forbid(unsafe_code)]
#![cfg(unix)]

use ho_core::ids::WorkUnitId;
use ho_core::keys::{LogField, log_key};
use ho_core::record::CommandDescriptor;
use ho_runner::exec::{CommandRunner, RunnerSettings};
use ho_runner::sequence::{ArchiveSink, PrintSink, RunSequencer};
use ho_storage::{Archive, BlobStore, MemoryStore};
use std::path::Path;
use std::time::Duration;

fn sh(script: &str) -> CommandDescriptor {
    CommandDescriptor::new(["sh", "-c", script])
}

fn touch(path: &Path) -> CommandDescriptor {
    CommandDescriptor::new(["touch".to_string(), path.to_string_lossy().into_owned()])
}

fn runner() -> CommandRunner {
    CommandRunner::new(RunnerSettings {
        timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(20),
        kill_grace: Duration::from_millis(300),
        ..RunnerSettings::default()
    })
}

fn id(raw: &str) -> WorkUnitId {
    WorkUnitId::try_new(raw).expect("id")
}

#[test]
fn failures_do_not_short_circuit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("second-ran");
    let cleanup_marker = dir.path().join("cleanup-ran");
    let store = MemoryStore::new();
    let hash = id("abc");
    let runner = runner();
    let cleanup = touch(&cleanup_marker);

    let commands = vec![sh("exit 1"), touch(&marker), sh("exit 2")];
    let mut sink = ArchiveSink::new(Archive::new(&store), &hash);
    let outcome = RunSequencer::new(&runner)
        .with_cleanup(Some(&cleanup), Duration::from_secs(5))
        .run_all(&commands, &mut sink);

    assert!(outcome.failed());
    assert_eq!(outcome.ran, 3);
    assert_eq!(outcome.failures.len(), 2);
    assert!(marker.exists(), "later commands still run");
    assert!(cleanup_marker.exists(), "cleanup always runs");

    let logs = Archive::new(&store).fetch_logs(&hash).expect("fetch");
    assert_eq!(logs.len(), 2);
    let exit_two = commands[2].label().expect("label");
    assert_eq!(exit_two.as_str(), "sh_-c_exit_2");
    let raw = store
        .get(&log_key(&hash, &exit_two, LogField::ExitCode))
        .expect("get")
        .expect("archived");
    assert_eq!(raw, b"2");
}

#[test]
fn empty_list_passes_and_archives_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cleanup_marker = dir.path().join("cleanup-ran");
    let store = MemoryStore::new();
    let hash = id("abc");
    let runner = runner();
    let cleanup = touch(&cleanup_marker);

    let mut sink = ArchiveSink::new(Archive::new(&store), &hash);
    let outcome = RunSequencer::new(&runner)
        .with_cleanup(Some(&cleanup), Duration::from_secs(5))
        .run_all(&[], &mut sink);

    assert!(!outcome.failed());
    assert_eq!(outcome.ran, 0);
    assert!(store.keys().is_empty());
    assert!(cleanup_marker.exists());
}

#[test]
fn passing_and_empty_entries_leave_no_logs() {
    let store = MemoryStore::new();
    let hash = id("abc");
    let runner = runner();

    let commands = vec![sh("exit 0"), CommandDescriptor::default()];
    let mut sink = ArchiveSink::new(Archive::new(&store), &hash);
    let outcome = RunSequencer::new(&runner).run_all(&commands, &mut sink);

    assert!(!outcome.failed());
    assert_eq!(outcome.ran, 1);
    assert!(store.keys().is_empty());
}

#[test]
fn failing_cleanup_is_ignored() {
    let store = MemoryStore::new();
    let hash = id("abc");
    let runner = runner();
    let cleanup = sh("exit 9");

    let mut sink = ArchiveSink::new(Archive::new(&store), &hash);
    let outcome = RunSequencer::new(&runner)
        .with_cleanup(Some(&cleanup), Duration::from_secs(5))
        .run_all(&[sh("exit 0")], &mut sink);
    assert!(!outcome.failed());
    assert!(store.keys().is_empty());
}

#[test]
fn timed_out_command_is_archived_as_failure() {
    let store = MemoryStore::new();
    let hash = id("abc");
    let runner = runner();

    let commands = vec![CommandDescriptor::new(["sleep", "30"])];
    let mut sink = ArchiveSink::new(Archive::new(&store), &hash);
    let outcome = RunSequencer::new(&runner).run_all(&commands, &mut sink);

    assert!(outcome.failed());
    let logs = Archive::new(&store).fetch_logs(&hash).expect("fetch");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].label.as_str(), "sleep_30");
    assert_eq!(logs[0].timed_out, Some(true));
}

#[test]
fn local_mode_prints_failures() {
    let runner = runner();
    let mut sink = PrintSink::new(Vec::new());
    let outcome =
        RunSequencer::new(&runner).run_all(&[sh("echo oops >&2; exit 4")], &mut sink);
    assert!(outcome.failed());

    let text = String::from_utf8(sink.into_inner()).expect("utf8");
    assert!(text.contains("Execution of sh -c echo oops >&2; exit 4 resulted in:"));
    assert!(text.contains("exit code: 4"));
    assert!(text.contains("stderr:\noops"));
}
