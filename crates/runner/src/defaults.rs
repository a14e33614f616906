#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

pub const DEFAULT_STORE_DIRNAME: &str = ".handoff/store";
pub const DEFAULT_PLAN_FILENAME: &str = "handoff-plan.json";

pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// The enclosing git checkout, so the tester behaves the same from any subdirectory.
pub fn default_repo_root() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_repo_root(&cwd).unwrap_or(cwd)
}

pub fn default_store_dir(repo: &Path) -> PathBuf {
    repo.join(DEFAULT_STORE_DIRNAME)
}

pub fn default_plan_path(repo: &Path) -> PathBuf {
    repo.join(DEFAULT_PLAN_FILENAME)
}
