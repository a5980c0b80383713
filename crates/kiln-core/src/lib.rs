//! # kiln-core
//!
//! The build-job supervisor for the kiln build runner.
//!
//! This crate provides:
//! - Configuration for the worker (base system, builder location, workspace)
//! - Per-job identity: workspace directories and the rendezvous socket name
//! - Workspace preparation and unconditional cleanup
//! - Builder environment assembly with the configuration allow-list
//! - The descriptor handoff channel feeding a live-log consumer
//! - The supervisor state machine driving one job from launch to report

mod config;
mod environment;
mod handoff;
mod job;
mod reporter;
mod supervisor;
mod workspace;

pub use config::{ConfigError, KilnConfig};
pub use environment::{BuilderEnv, CONFIGURATION_ALLOW_LIST};
pub use handoff::{HANDOFF_RETRY_INTERVAL, HandoffChannel};
pub use job::{Job, rendezvous_socket};
pub use reporter::{
    LogReporter, NotifyError, Notifier, NotifyingReporter, UserDirectory, UserLookupError,
    UserRecord,
};
pub use supervisor::{BuildSupervisor, JobState, SuperviseError};
pub use workspace::{WorkspaceError, WorkspaceManager};
