//! Outcome reporter implementations.
//!
//! The supervisor hands a finished [`BuildReport`] to whatever reporter it
//! was constructed with. [`LogReporter`] records the verdict in the worker
//! log; [`NotifyingReporter`] additionally resolves the requesting user and
//! delivers the subject/message pair through a [`Notifier`]. Nothing in here
//! can fail the job.

use kiln_proto::{BuildReport, OutcomeReporter};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
#[error("user {0} does not exist")]
pub struct UserLookupError(pub String);

/// A resolved user, as far as reporting is concerned.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub email_notifications: bool,
}

/// Lookup seam for the external user store.
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, user_id: &str) -> Result<UserRecord, UserLookupError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Delivery seam for notifications (email or otherwise).
pub trait Notifier: Send + Sync {
    fn notify(&self, user: &UserRecord, subject: &str, message: &str) -> Result<(), NotifyError>;
}

/// Reporter that only records the verdict in the log.
pub struct LogReporter;

impl OutcomeReporter for LogReporter {
    fn report(&self, report: &BuildReport) {
        if report.outcome.is_success() {
            info!(build_id = %report.build_id, user_id = %report.user_id, "build succeeded");
        } else {
            error!(build_id = %report.build_id, user_id = %report.user_id, "build failed");
        }
    }
}

/// Reporter that notifies the requesting user.
pub struct NotifyingReporter<D, N> {
    directory: D,
    notifier: N,
}

impl<D: UserDirectory, N: Notifier> NotifyingReporter<D, N> {
    pub fn new(directory: D, notifier: N) -> Self {
        Self {
            directory,
            notifier,
        }
    }
}

impl<D: UserDirectory, N: Notifier> OutcomeReporter for NotifyingReporter<D, N> {
    fn report(&self, report: &BuildReport) {
        let user = match self.directory.lookup(&report.user_id) {
            Ok(user) => user,
            Err(e) => {
                // A missing user never fails the build; it only costs the
                // notification.
                error!(build_id = %report.build_id, "{e}");
                return;
            }
        };

        if !user.email_notifications {
            debug!(user_id = %user.id, "user opted out of notifications");
            return;
        }

        if let Err(e) = self.notifier.notify(&user, &report.subject, &report.message) {
            error!(user_id = %user.id, error = %e, "unable to send notification");
        }
    }
}
