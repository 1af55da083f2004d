//! Configuration for the orchestration core.
//!
//! Everything a composition needs is passed in explicitly; there are no
//! process-wide defaults beyond the serde field defaults here. Config files
//! are TOML with every section optional except the session.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::dispatch::LauncherArgs;

/// How to open the command channel to one remote host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Remote hostname or address.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Remote account name used for authentication.
    pub principal: String,
    /// Local path to the private key. Tilde is expanded locally; the key
    /// contents are never read by the core.
    pub private_key_path: String,
    /// Accept unknown host keys at session open. Off by default; enabling it
    /// is logged as a security trade-off.
    #[serde(default)]
    pub accept_unknown_host_keys: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where source repositories are cloned from and how branches fall back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Canonical URL prefix; the clone URL is `{url_prefix}{name}.git`.
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    /// Branch to reset to when the current branch cannot be determined.
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url_prefix: default_url_prefix(),
            default_branch: default_branch(),
        }
    }
}

/// Package-manager and scheduler provisioning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Install root of the package manager on the remote host. May contain
    /// `~`, which the remote shell expands to the principal's home.
    #[serde(default = "default_conda_root")]
    pub conda_root: String,
    /// Published installer downloaded when no installation is found.
    #[serde(default = "default_installer_url")]
    pub installer_url: String,
    /// Module-system name used to bring the scheduler onto PATH.
    #[serde(default = "default_scheduler_module")]
    pub scheduler_module: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            conda_root: default_conda_root(),
            installer_url: default_installer_url(),
            scheduler_module: default_scheduler_module(),
        }
    }
}

/// Completion-waiter polling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Fixed interval between polling cycles. No backoff.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// When set, raise `CompletionTimeout` after this many cycles with jobs
    /// still queued. Unset means wait indefinitely.
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

impl WaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_cycles: None,
        }
    }
}

/// Top-level configuration handed to a composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub provision: ProvisionConfig,
    #[serde(default)]
    pub wait: WaitConfig,
}

impl OrchestratorConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Parameter record a composition is invoked with.
///
/// This is the superset of options recognized across compositions; each
/// composition reads the subset it needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositionParams {
    pub principal: Option<String>,
    pub private_key_path: Option<String>,
    pub repository: Option<String>,
    pub revision: Option<String>,
    pub environment_name: Option<String>,
    pub working_directory: Option<String>,
    pub input_directory: Option<String>,
    pub output_directory: Option<String>,
    pub partition: Option<String>,
    pub ncpus: Option<u32>,
    /// Space-delimited domain identifiers consumed by launchers.
    pub models: Option<String>,
    pub scenarios: Option<String>,
    pub variables: Option<String>,
    pub worker_script: Option<String>,
}

impl CompositionParams {
    /// Render the launcher-facing subset as long-form `--name value` pairs.
    pub fn launcher_args(&self) -> LauncherArgs {
        let mut args = LauncherArgs::new();
        if let Some(v) = &self.variables {
            args.push("variables", v);
        }
        if let Some(v) = &self.models {
            args.push("models", v);
        }
        if let Some(v) = &self.scenarios {
            args.push("scenarios", v);
        }
        if let Some(v) = &self.input_directory {
            args.push("input-directory", v);
        }
        if let Some(v) = &self.output_directory {
            args.push("output-directory", v);
        }
        if let Some(v) = &self.partition {
            args.push("partition", v);
        }
        if let Some(v) = self.ncpus {
            args.push("ncpus", v.to_string());
        }
        if let Some(v) = &self.worker_script {
            args.push("worker-script", v);
        }
        args
    }
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_url_prefix() -> String {
    "https://github.com/climdyn-lab/".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_conda_root() -> String {
    "~/miniconda3".to_string()
}

fn default_installer_url() -> String {
    "https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh".to_string()
}

fn default_scheduler_module() -> String {
    "slurm".to_string()
}

fn default_poll_interval() -> u64 {
    10
}
