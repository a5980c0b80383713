//! Workspace preparation and reclamation.
//!
//! Each job gets a dedicated directory tree under the workspace root: the
//! target directory itself plus an intermediate directory seeded with a copy
//! of the base filesystem. Preparation failures are fatal to the job; cleanup
//! is unconditional and best-effort.

use crate::config::KilnConfig;
use crate::job::Job;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("target directory {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot copy {base} to {dest}")]
    BaseCopy { base: PathBuf, dest: PathBuf },
}

/// Allocates and reclaims per-job directory trees.
pub struct WorkspaceManager {
    base_system: PathBuf,
}

impl WorkspaceManager {
    pub fn new(config: &KilnConfig) -> Self {
        Self {
            base_system: config.base_system.clone(),
        }
    }

    /// Creates the job's target directory and seeds the intermediate
    /// directory with a copy of the base system.
    pub async fn prepare(&self, job: &Job) -> Result<(), WorkspaceError> {
        if job.target_dir.exists() {
            return Err(WorkspaceError::AlreadyExists(job.target_dir.clone()));
        }
        tokio::fs::create_dir_all(&job.target_dir).await?;
        debug!(intermediate = %job.intermediate_dir.display(), "populating workspace");

        let status = Command::new("cp")
            .arg("-r")
            .arg(&self.base_system)
            .arg(&job.intermediate_dir)
            .status()
            .await?;
        if !status.success() {
            return Err(WorkspaceError::BaseCopy {
                base: self.base_system.clone(),
                dest: job.intermediate_dir.clone(),
            });
        }
        Ok(())
    }

    /// Removes the job's workspace. Runs on every termination path; its own
    /// failure is logged and never escalates into the job outcome.
    pub async fn cleanup(&self, job: &Job) {
        match tokio::fs::remove_dir_all(&job.target_dir).await {
            Ok(()) => debug!(target = %job.target_dir.display(), "workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                target = %job.target_dir.display(),
                error = %e,
                "workspace cleanup incomplete"
            ),
        }
    }
}
