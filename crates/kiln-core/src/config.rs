//! Worker configuration.
//!
//! Loaded from a YAML file with serde defaults for every field, so a partial
//! (or absent) config is always usable; CLI flags take final precedence over
//! the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one kiln worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Pre-built base filesystem tree copied into each job's intermediate
    /// directory before the builder starts.
    #[serde(default = "default_base_system")]
    pub base_system: PathBuf,

    /// Directory containing the external builder; the builder process runs
    /// with this as its working directory.
    #[serde(default = "default_builder_location")]
    pub builder_location: PathBuf,

    /// Root under which per-job workspaces are created.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Directory for per-job rendezvous sockets.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Command the released child execs, resolved inside `builder_location`.
    #[serde(default = "default_builder_command")]
    pub builder_command: Vec<String>,
}

fn default_base_system() -> PathBuf {
    PathBuf::from("/var/lib/kiln/base-system")
}

fn default_builder_location() -> PathBuf {
    PathBuf::from("/var/lib/kiln/builder")
}

fn default_workspace() -> PathBuf {
    PathBuf::from("/tmp/kiln")
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_builder_command() -> Vec<String> {
    vec!["sh".to_string(), "run.sh".to_string()]
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            base_system: default_base_system(),
            builder_location: default_builder_location(),
            workspace: default_workspace(),
            socket_dir: default_socket_dir(),
            builder_command: default_builder_command(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl KilnConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Creates the workspace root if it does not exist yet.
    pub fn ensure_workspace(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.workspace)
    }
}
