//! # kiln-proto
//!
//! Shared types and contracts for the kiln build runner.
//!
//! This crate provides the foundational pieces used across all kiln crates:
//! - The image specification record delivered by the scheduling collaborator
//! - Outcome and report types plus the `OutcomeReporter` seam
//! - The pty stream contract: banner, outcome markers, and the end-of-stream
//!   sentinel, with a scanner for detecting the sentinel across read chunks

mod report;
mod spec;
mod stream;

pub use report::{BuildReport, Outcome, OutcomeReporter};
pub use spec::{ImageSpec, Target, UserAccount};
pub use stream::{
    END_OF_STREAM, FAILURE_MARKER, STARTUP_BANNER, SUCCESS_MARKER, SentinelScanner,
};
