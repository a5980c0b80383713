//! The build supervisor.
//!
//! Drives one job through `Created → WorkspaceReady → Running → {Succeeded,
//! Failed} → Cleaned`. The builder is forked first and held suspended while
//! the workspace is prepared; preparation failure means the suspended child
//! is killed without ever being released. After the single blocking wait on
//! the child, the supervisor writes the outcome marker, reclaims the
//! workspace, emits the end-of-stream sentinel, stops the handoff channel,
//! and reports the verdict.

use crate::config::KilnConfig;
use crate::environment::BuilderEnv;
use crate::handoff::HandoffChannel;
use crate::job::Job;
use crate::workspace::WorkspaceManager;
use kiln_proto::{
    BuildReport, END_OF_STREAM, FAILURE_MARKER, ImageSpec, Outcome, OutcomeReporter,
    STARTUP_BANNER, SUCCESS_MARKER,
};
use kiln_pty::{LaunchError, PtyChild};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    WorkspaceReady,
    Running,
    Succeeded,
    Failed,
    Cleaned,
}

/// Errors that prevent a job from producing an outcome at all.
///
/// Everything past a successful launch resolves into the integer outcome
/// code instead; there is no structured error surface beyond it.
#[derive(Debug, thiserror::Error)]
pub enum SuperviseError {
    #[error("builder command is empty")]
    EmptyBuilderCommand,

    #[error("failed to launch builder: {0}")]
    Launch(#[from] LaunchError),

    #[error("process control failed: {0}")]
    Process(#[from] nix::Error),

    #[error("blocking wait task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Supervises build jobs for one worker configuration.
pub struct BuildSupervisor<R: OutcomeReporter> {
    config: KilnConfig,
    reporter: R,
}

impl<R: OutcomeReporter> BuildSupervisor<R> {
    pub fn new(config: KilnConfig, reporter: R) -> Self {
        Self { config, reporter }
    }

    /// Runs one job to completion and returns its outcome code (0 = success;
    /// a child killed by signal yields 128 plus the signal number).
    pub async fn run(&self, user_id: &str, spec: ImageSpec) -> Result<i32, SuperviseError> {
        let (program, args) = self
            .config
            .builder_command
            .split_first()
            .ok_or(SuperviseError::EmptyBuilderCommand)?;

        let job = Job::new(user_id, spec, &self.config);
        info!(build_id = job.build_id(), user_id, "starting build job");

        let env = BuilderEnv::for_job(&job, &self.config);
        let child = Arc::new(PtyChild::spawn(
            program,
            args,
            &self.config.builder_location,
            env.as_pairs(),
        )?);
        let mut state = JobState::Created;

        // The consumer may attach at any point from here on.
        let handoff = HandoffChannel::spawn(job.socket_path.clone(), Arc::clone(&child));
        let workspace = WorkspaceManager::new(&self.config);

        let code = match workspace.prepare(&job).await {
            Ok(()) => {
                transition(&job, &mut state, JobState::WorkspaceReady);
                write_stream(&child, STARTUP_BANNER);

                match in_blocking(&child, PtyChild::release).await? {
                    Some(code) => {
                        // Terminated before it could be released; nothing to wait for.
                        warn!(build_id = job.build_id(), code, "builder died while suspended");
                        code
                    }
                    None => {
                        transition(&job, &mut state, JobState::Running);
                        in_blocking(&child, PtyChild::wait).await?
                    }
                }
            }
            Err(e) => {
                // The child never leaves its self-suspend: kill it there and reap.
                error!(build_id = job.build_id(), error = %e, "workspace preparation failed, aborting job");
                child.force_kill();
                in_blocking(&child, PtyChild::wait).await?
            }
        };

        let outcome = if code == 0 {
            transition(&job, &mut state, JobState::Succeeded);
            write_stream(&child, SUCCESS_MARKER);
            Outcome::Succeeded
        } else {
            transition(&job, &mut state, JobState::Failed);
            error!(build_id = job.build_id(), code, "build failed");
            write_stream(&child, FAILURE_MARKER);
            Outcome::Failed
        };

        workspace.cleanup(&job).await;
        transition(&job, &mut state, JobState::Cleaned);

        // The sentinel is the only programmatic end signal consumers get;
        // it must come last.
        write_stream(&child, END_OF_STREAM);

        handoff.shutdown().await;
        self.reporter.report(&build_report(&job, outcome));
        Ok(code)
    }
}

/// Runs one of the child's blocking process-control calls off the runtime.
async fn in_blocking<T, F>(child: &Arc<PtyChild>, op: F) -> Result<T, SuperviseError>
where
    F: FnOnce(&PtyChild) -> nix::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let child = Arc::clone(child);
    Ok(tokio::task::spawn_blocking(move || op(&child)).await??)
}

fn transition(job: &Job, state: &mut JobState, next: JobState) {
    debug!(build_id = job.build_id(), from = ?*state, to = ?next, "job state transition");
    *state = next;
}

fn write_stream(child: &PtyChild, bytes: &[u8]) {
    if let Err(e) = child.write_master(bytes) {
        warn!(error = %e, "could not write to the job terminal");
    }
}

fn build_report(job: &Job, outcome: Outcome) -> BuildReport {
    let distro = job.distro();
    let (subject, message) = match outcome {
        Outcome::Succeeded => (
            format!("{distro} has built!"),
            format!(
                "You can download image {} directly from your dashboard.",
                job.build_id()
            ),
        ),
        Outcome::Failed => (
            format!("{distro} build has failed!"),
            "Sorry, something went wrong. The team has been informed about the situation."
                .to_string(),
        ),
    };
    BuildReport {
        user_id: job.user_id.clone(),
        build_id: job.build_id().to_string(),
        outcome,
        subject,
        message,
    }
}
