//! Builder environment assembly.
//!
//! The external builder is configured entirely through its environment. The
//! set is assembled from the job parameters: a block of fixed keys, a few
//! conditional blocks, and an allow-listed subset of the caller's free-form
//! configuration. Everything else the caller sends is dropped silently.

use crate::config::KilnConfig;
use crate::job::Job;

/// Free-form configuration keys allowed through to the builder.
pub const CONFIGURATION_ALLOW_LIST: &[&str] = &[
    "HOSTNAME",
    "DEFLOCAL",
    "TIMEZONE",
    "ENABLE_REDUCE",
    "REDUCE_APT",
    "REDUCE_DOC",
    "REDUCE_MAN",
    "REDUCE_VIM",
    "REDUCE_BASH",
    "REDUCE_HWDB",
    "REDUCE_SSHD",
    "REDUCE_LOCALE",
];

/// Ordered name → value mapping handed to the builder at exec time.
///
/// An explicit struct rather than ambient process environment: the launcher
/// passes exactly this set, nothing inherited.
#[derive(Debug, Clone, Default)]
pub struct BuilderEnv {
    vars: Vec<(String, String)>,
}

impl BuilderEnv {
    /// Assembles the environment for one job.
    pub fn for_job(job: &Job, config: &KilnConfig) -> Self {
        let spec = &job.spec;
        let mut env = Self::default();

        let apt_includes = spec
            .selected_packages
            .as_deref()
            .unwrap_or_default()
            .join(",");

        env.insert(
            "PATH",
            std::env::var("PATH").unwrap_or_else(|_| "/usr/sbin:/usr/bin:/sbin:/bin".to_string()),
        );
        env.insert("BASEDIR", job.target_dir.display().to_string());
        env.insert("CHROOT_SOURCE", job.intermediate_dir.display().to_string());
        env.insert("IMAGE_NAME", job.target_dir.display().to_string());
        env.insert("WORKSPACE_DIR", config.workspace.display().to_string());
        env.insert("BUILD_ID", spec.id.clone());
        env.insert(
            "BUILDER_LOCATION",
            config.builder_location.display().to_string(),
        );
        env.insert("APT_INCLUDES", apt_includes);

        if let Some(password) = &spec.root_password {
            env.insert("ENABLE_ROOT", "true");
            env.insert("PASSWORD", password.clone());
        }

        if let Some(target) = &spec.target {
            env.insert("RPI_MODEL", device_model(&target.device));
        }

        // The builder cannot handle more than one user; extras are dropped.
        if let Some(user) = spec.users.first() {
            env.insert("ENABLE_USER", "true");
            env.insert("USER_NAME", user.username.clone());
            env.insert("USER_PASSWORD", user.password.clone());
        }

        for key in CONFIGURATION_ALLOW_LIST {
            if let Some(value) = spec.configuration.get(*key) {
                env.insert(*key, render_value(value));
            }
        }

        env
    }

    fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.vars
    }
}

/// Maps a device name to the short model code the builder expects.
fn device_model(device: &str) -> &'static str {
    if device == "Raspberry Pi 3" { "3" } else { "2" }
}

/// Renders a free-form configuration value into environment form.
fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
