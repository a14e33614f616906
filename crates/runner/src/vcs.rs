#![forbid(unsafe_code)]

use ho_core::ids::{WorkUnitId, WorkUnitIdError};
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("local modifications in {}; refusing to check out", repo.display())]
    Dirty { repo: PathBuf },
    #[error("git {args} failed ({status}): {stderr}")]
    Git {
        args: String,
        status: String,
        stderr: String,
    },
    #[error("spawn git: {0}")]
    Io(#[from] std::io::Error),
    #[error("git reported an unusable HEAD: {0}")]
    InvalidHead(#[from] WorkUnitIdError),
}

/// The local checkout the consumer tests in.
pub trait Vcs {
    /// Fails when the working tree has local modifications.
    fn ensure_clean(&mut self) -> Result<(), VcsError>;

    fn head(&mut self) -> Result<WorkUnitId, VcsError>;

    /// Brings the tracking branch up to date and checks out `id`.
    ///
    /// `Ok(None)` when `id` cannot be checked out (e.g. a review change that never landed);
    /// otherwise the revision now checked out.
    fn sync_to(&mut self, id: &WorkUnitId) -> Result<Option<WorkUnitId>, VcsError>;
}

pub struct GitVcs {
    repo: PathBuf,
    branch: String,
}

impl GitVcs {
    pub fn new(repo: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<Output, VcsError> {
        Ok(Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()?)
    }

    fn git_checked(&self, args: &[&str]) -> Result<Output, VcsError> {
        let output = self.git(args)?;
        if !output.status.success() {
            return Err(VcsError::Git {
                args: args.join(" "),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Vcs for GitVcs {
    fn ensure_clean(&mut self) -> Result<(), VcsError> {
        let diff = self.git_checked(&["diff", "HEAD"])?;
        if !diff.stdout.is_empty() {
            warn!(repo = %self.repo.display(), "local modifications to the git repo");
            return Err(VcsError::Dirty {
                repo: self.repo.clone(),
            });
        }
        Ok(())
    }

    fn head(&mut self) -> Result<WorkUnitId, VcsError> {
        let out = self.git_checked(&["rev-parse", "HEAD"])?;
        Ok(WorkUnitId::try_new(String::from_utf8_lossy(&out.stdout))?)
    }

    fn sync_to(&mut self, id: &WorkUnitId) -> Result<Option<WorkUnitId>, VcsError> {
        self.ensure_clean()?;
        self.git_checked(&["checkout", self.branch.as_str()])?;
        self.git_checked(&["pull"])?;
        let checkout = self.git(&["checkout", id.as_str()])?;
        if !checkout.status.success() {
            info!(
                work_unit = %id,
                stderr = %String::from_utf8_lossy(&checkout.stderr).trim(),
                "revision cannot be checked out"
            );
            return Ok(None);
        }
        self.head().map(Some)
    }
}
