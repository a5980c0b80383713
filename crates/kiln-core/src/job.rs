//! Per-job identity.
//!
//! A job lives exactly as long as one supervisor execution. Its workspace
//! paths and rendezvous socket name are all derived from the build id, so an
//! external consumer that knows the id can attach with no further
//! coordination.

use crate::config::KilnConfig;
use kiln_proto::ImageSpec;
use std::path::{Path, PathBuf};

/// One build-and-report cycle for a single image request.
#[derive(Debug)]
pub struct Job {
    pub user_id: String,
    pub spec: ImageSpec,
    /// Per-job workspace; the builder treats it as its base directory.
    pub target_dir: PathBuf,
    /// Source rootfs of the future image, inside the workspace.
    pub intermediate_dir: PathBuf,
    /// Rendezvous socket an attaching consumer listens on.
    pub socket_path: PathBuf,
}

impl Job {
    pub fn new(user_id: &str, spec: ImageSpec, config: &KilnConfig) -> Self {
        let target_dir = config.workspace.join(&spec.id);
        let intermediate_dir = target_dir.join("intermediate");
        let socket_path = rendezvous_socket(&config.socket_dir, &spec.id);
        Self {
            user_id: user_id.to_string(),
            spec,
            target_dir,
            intermediate_dir,
            socket_path,
        }
    }

    pub fn build_id(&self) -> &str {
        &self.spec.id
    }

    /// Distribution name used in report subjects.
    pub fn distro(&self) -> &str {
        self.spec
            .target
            .as_ref()
            .map_or("Image", |t| t.distro.as_str())
    }
}

/// The well-known rendezvous socket path for a build id.
pub fn rendezvous_socket(socket_dir: &Path, build_id: &str) -> PathBuf {
    socket_dir.join(build_id)
}
