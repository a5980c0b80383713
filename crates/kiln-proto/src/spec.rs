//! The image specification record.
//!
//! This is the payload of the job invocation interface: the scheduling
//! collaborator hands one of these to the supervisor together with the
//! requesting user's identifier. The wire format delivering it is out of
//! scope here; any serde-compatible source works.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One image build request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Build identifier. Doubles as the workspace directory name and the
    /// rendezvous socket name, so it must be unique for the lifetime of one
    /// workspace.
    pub id: String,

    /// Extra packages to bake into the image. `None` and `[]` are equivalent.
    #[serde(default)]
    pub selected_packages: Option<Vec<String>>,

    /// Root password; enables the root account when present.
    #[serde(default)]
    pub root_password: Option<String>,

    /// User accounts to create. The builder supports a single user; only the
    /// first entry is honored.
    #[serde(default)]
    pub users: Vec<UserAccount>,

    /// Device and distribution the image targets.
    #[serde(default)]
    pub target: Option<Target>,

    /// Free-form configuration overrides. Only an allow-listed subset ever
    /// reaches the builder environment.
    #[serde(default)]
    pub configuration: HashMap<String, serde_json::Value>,
}

/// A user account requested for the image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    pub password: String,
}

/// Build target: the device model and the distribution name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub device: String,
    pub distro: String,
}
