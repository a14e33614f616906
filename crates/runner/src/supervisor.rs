#![forbid(unsafe_code)]

//! Self-update detection. The consumer loop only asks "should I reload?"; relaunching the
//! process image is left to `main`.

use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Set on the relaunched process so it resumes instead of running corruption recovery.
pub const RELOAD_ENV: &str = "HANDOFF_RELOADED";

/// Exit code asking an external supervisor to restart us when in-place exec is unavailable.
pub const RELOAD_EXIT_CODE: i32 = 75;

pub trait ReloadCheck {
    fn reload_requested(&mut self) -> bool;
}

/// Never asks for a reload.
pub struct NeverReload;

impl ReloadCheck for NeverReload {
    fn reload_requested(&mut self) -> bool {
        false
    }
}

type Fingerprint = Option<[u8; 32]>;

fn fingerprint(path: &Path) -> Fingerprint {
    let bytes = std::fs::read(path).ok()?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(&bytes));
    Some(out)
}

/// Content digests of the files the running program was built from, captured at startup.
pub struct SourceWatch {
    baseline: Vec<(PathBuf, Fingerprint)>,
}

impl SourceWatch {
    pub fn capture(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut baseline: Vec<(PathBuf, Fingerprint)> = Vec::new();
        for path in paths {
            if baseline.iter().any(|(seen, _)| seen == &path) {
                continue;
            }
            let digest = fingerprint(&path);
            if digest.is_none() {
                warn!(path = %path.display(), "watched file unreadable at startup");
            }
            baseline.push((path, digest));
        }
        Self { baseline }
    }

    /// The running executable plus `extra`.
    pub fn for_current_exe(extra: impl IntoIterator<Item = PathBuf>) -> Self {
        let exe = std::env::current_exe().ok();
        Self::capture(exe.into_iter().chain(extra))
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.baseline.iter().map(|(path, _)| path.as_path())
    }

    /// The first watched path whose content no longer matches the baseline.
    pub fn changed(&self) -> Option<&Path> {
        self.baseline.iter().find_map(|(path, digest)| {
            let current = fingerprint(path);
            // A file that became unreadable (deleted, mid-rebuild) differs too.
            (current != *digest).then_some(path.as_path())
        })
    }
}

impl ReloadCheck for SourceWatch {
    fn reload_requested(&mut self) -> bool {
        match self.changed() {
            Some(path) => {
                info!(path = %path.display(), "watched file changed, reload requested");
                true
            }
            None => false,
        }
    }
}

/// True when this process was started by [`relaunch`].
pub fn is_reloaded_start() -> bool {
    std::env::var_os(RELOAD_ENV).is_some_and(|v| !v.is_empty())
}

fn exec_candidates() -> Vec<OsString> {
    let mut out: Vec<OsString> = Vec::new();
    // argv[0] first: current_exe() points at "(deleted)" after a rebuild replaced the binary.
    if let Some(argv0) = std::env::args_os().next() {
        out.push(argv0);
    }
    if let Ok(exe) = std::env::current_exe() {
        let exe = exe.into_os_string();
        if !out.contains(&exe) {
            out.push(exe);
        }
    }
    out
}

fn resolve_exec_program(program: &OsString) -> Option<PathBuf> {
    let raw = PathBuf::from(program);
    if raw.components().count() > 1 || raw.is_absolute() {
        return Some(raw);
    }
    let path_env = std::env::var_os("PATH")?;
    std::env::split_paths(&path_env)
        .map(|dir| dir.join(program))
        .find(|cand| cand.is_file())
}

/// Replaces the process image with a fresh copy of this program, same arguments.
///
/// Only returns on failure.
#[cfg(unix)]
pub fn relaunch() -> std::io::Error {
    use std::os::unix::process::CommandExt;

    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    let mut last_err: Option<std::io::Error> = None;
    for cand in exec_candidates() {
        let Some(path) = resolve_exec_program(&cand) else {
            continue;
        };
        info!(program = %path.display(), "relaunching");
        let err = std::process::Command::new(&path)
            .args(&args)
            .env(RELOAD_ENV, "1")
            .exec();
        warn!(program = %path.display(), error = %err, "relaunch failed");
        last_err = Some(err);
    }
    last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no program to relaunch")
    })
}

#[cfg(not(unix))]
pub fn relaunch() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "in-place relaunch needs exec",
    )
}
