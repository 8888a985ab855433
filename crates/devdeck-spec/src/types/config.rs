use serde::{Deserialize, Serialize};

use super::project::ProjectRecord;

pub const CONFIG_FILE_NAME: &str = "devdeck.json";
pub const CONFIG_VERSION: &str = "1";

/// Top-level registry file (devdeck.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevdeckConfig {
    /// Registry format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Process supervisor tuning
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Registered projects, in insertion order
    #[serde(default)]
    pub projects: Vec<ProjectRecord>,
}

impl Default for DevdeckConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            supervisor: SupervisorSettings::default(),
            projects: Vec::new(),
        }
    }
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

/// What `start` does with a child that never printed a readiness marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutPolicy {
    /// Terminate the child and drop its table entry.
    #[default]
    Terminate,
    /// Leave the child running and registered so a later stop can reach it.
    KeepRunning,
}

/// Process supervisor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSettings {
    /// Binary used as `<pm> run dev -- --port <port>`
    #[serde(default = "default_package_manager")]
    pub package_manager: String,

    /// Dependency a project must declare to be considered a dev-server project
    #[serde(default = "default_required_dependency")]
    pub required_dependency: String,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    #[serde(default = "default_port_probe_timeout")]
    pub port_probe_timeout_secs: u64,

    #[serde(default = "default_url_probe_timeout")]
    pub url_probe_timeout_secs: u64,

    #[serde(default)]
    pub on_startup_timeout: TimeoutPolicy,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            package_manager: default_package_manager(),
            required_dependency: default_required_dependency(),
            startup_timeout_secs: default_startup_timeout(),
            stop_grace_secs: default_stop_grace(),
            port_probe_timeout_secs: default_port_probe_timeout(),
            url_probe_timeout_secs: default_url_probe_timeout(),
            on_startup_timeout: TimeoutPolicy::default(),
        }
    }
}

fn default_package_manager() -> String {
    "npm".to_string()
}

fn default_required_dependency() -> String {
    "next".to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_stop_grace() -> u64 {
    5
}

fn default_port_probe_timeout() -> u64 {
    3
}

fn default_url_probe_timeout() -> u64 {
    5
}
