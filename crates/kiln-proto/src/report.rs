//! Outcome classification and the reporting seam.
//!
//! The supervisor classifies a job as succeeded or failed and chooses the
//! human-facing subject and message. Everything downstream of that verdict
//! (persistence, notification delivery) lives behind [`OutcomeReporter`].

use serde::{Deserialize, Serialize};

/// Terminal verdict of one build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// Verdict plus identifying metadata, handed to the reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    /// Opaque identifier of the requesting user.
    pub user_id: String,
    pub build_id: String,
    pub outcome: Outcome,
    /// Notification subject line, e.g. "TestOS has built!".
    pub subject: String,
    /// Notification body.
    pub message: String,
}

/// Collaborator boundary for persistence and notification.
///
/// Implementations own their failure handling; a report is fire-and-forget
/// from the supervisor's point of view and must never fail the job.
pub trait OutcomeReporter: Send + Sync {
    fn report(&self, report: &BuildReport);
}
