//! Environment provisioner.
//!
//! Converges the remote host onto a usable interpreter stack: a conda
//! installation under the principal's home, a named environment built from a
//! spec file inside the synchronized tree, and scheduler tooling on PATH.
//! All operations are idempotent and safe to run at the start of every
//! workflow.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::config::ProvisionConfig;
use crate::errors::RocError;
use crate::session::{Session, Transport};
use crate::util::quote;

/// A named environment and the spec file it is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    pub name: String,
    /// Path to the spec file on the remote host, inside the synchronized
    /// working tree.
    pub spec_path: String,
}

impl EnvironmentDescriptor {
    pub fn new(name: impl Into<String>, spec_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec_path: spec_path.into(),
        }
    }
}

/// Prefix `rest` with the conda shell hook so `conda activate` works inside
/// a single non-login remote shell.
///
/// `conda_root` may contain `~` and is deliberately left unquoted so the
/// remote shell expands it against the principal's home.
pub(crate) fn conda_prefixed(config: &ProvisionConfig, rest: &str) -> String {
    format!(
        "source {}/etc/profile.d/conda.sh && {}",
        config.conda_root, rest
    )
}

/// Verify a user-level conda installation, installing one if missing.
///
/// Installation downloads the published installer, runs it in batch mode
/// into `conda_root`, and initializes the shell integration.
pub async fn ensure_package_manager<T: Transport>(
    session: &mut Session<T>,
    config: &ProvisionConfig,
) -> Result<(), RocError> {
    let probe = format!(
        "command -v conda >/dev/null 2>&1 || test -x {}/bin/conda",
        config.conda_root
    );
    if session.exec(&probe).await?.success() {
        debug!(root = %config.conda_root, "package manager already installed");
        return Ok(());
    }

    info!(root = %config.conda_root, "installing package manager");
    let install = format!(
        "curl -fsSL {} -o /tmp/conda-installer.sh && bash /tmp/conda-installer.sh -b -p {}",
        quote(&config.installer_url),
        config.conda_root
    );
    let result = session.exec(&install).await?;
    if !result.success() {
        return Err(RocError::EnvironmentProvision {
            command: install,
            stderr: result.stderr,
        });
    }

    let init = format!("{}/bin/conda init bash", config.conda_root);
    let result = session.exec(&init).await?;
    if !result.success() {
        return Err(RocError::EnvironmentProvision {
            command: init,
            stderr: result.stderr,
        });
    }
    info!(root = %config.conda_root, "package manager installed");
    Ok(())
}

/// Ensure an environment named `env.name` exists, creating it from the spec
/// file when absent.
///
/// A pre-existing environment is accepted as-is and never re-validated
/// against the spec file.
pub async fn ensure_environment<T: Transport>(
    session: &mut Session<T>,
    config: &ProvisionConfig,
    env: &EnvironmentDescriptor,
) -> Result<(), RocError> {
    let list = conda_prefixed(config, "conda env list --json");
    let result = session.exec(&list).await?;
    if !result.success() {
        return Err(RocError::EnvironmentProvision {
            command: list,
            stderr: result.stderr,
        });
    }
    let names = parse_environment_names(&result.stdout)?;
    if names.iter().any(|name| name == &env.name) {
        debug!(environment = %env.name, "environment already exists");
        return Ok(());
    }

    let create = conda_prefixed(
        config,
        &format!(
            "conda env create --name {} --file {}",
            quote(&env.name),
            quote(&env.spec_path)
        ),
    );
    let result = session.exec(&create).await?;
    if !result.success() {
        return Err(RocError::EnvironmentProvision {
            command: create,
            stderr: result.stderr,
        });
    }
    info!(environment = %env.name, spec = %env.spec_path, "environment created");
    Ok(())
}

/// Environment names from `conda env list --json`, which reports full prefix
/// paths. Comparing final path components keeps the existence check an exact
/// name match rather than a substring probe.
fn parse_environment_names(raw: &str) -> Result<Vec<String>, RocError> {
    #[derive(Deserialize)]
    struct EnvListing {
        #[serde(default)]
        envs: Vec<String>,
    }

    let listing: EnvListing =
        serde_json::from_str(raw).map_err(|err| RocError::EnvironmentProvision {
            command: "conda env list --json".to_string(),
            stderr: format!("unparsable environment listing: {err}"),
        })?;
    Ok(listing
        .envs
        .iter()
        .filter_map(|prefix| {
            Path::new(prefix)
                .file_name()
                .and_then(|name| name.to_str())
                .map(str::to_string)
        })
        .collect())
}

/// Verify the scheduler's submission command is reachable, loading it
/// through the host's module system if needed.
pub async fn ensure_scheduler<T: Transport>(
    session: &mut Session<T>,
    config: &ProvisionConfig,
) -> Result<(), RocError> {
    if session
        .exec("command -v sbatch >/dev/null 2>&1")
        .await?
        .success()
    {
        debug!("scheduler tooling already on PATH");
        return Ok(());
    }
    let command = format!(
        "module load {} && command -v sbatch >/dev/null 2>&1",
        quote(&config.scheduler_module)
    );
    let result = session.exec(&command).await?;
    if !result.success() {
        return Err(RocError::EnvironmentProvision {
            command,
            stderr: result.stderr,
        });
    }
    info!(module = %config.scheduler_module, "scheduler tooling loaded via module system");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CommandResult;
    use crate::testing::MockTransport;

    fn session(transport: MockTransport) -> Session<MockTransport> {
        Session::new(transport, "hpc.example.org", "svc")
    }

    fn env_listing(envs: &[&str]) -> String {
        let mut paths: Vec<String> = vec!["/home/svc/miniconda3".to_string()];
        paths.extend(
            envs.iter()
                .map(|name| format!("/home/svc/miniconda3/envs/{name}")),
        );
        serde_json::json!({ "envs": paths }).to_string()
    }

    #[test]
    fn test_parse_environment_names_takes_final_components() {
        let names = parse_environment_names(&env_listing(&["env-A", "env-B"])).unwrap();
        assert_eq!(names, vec!["miniconda3", "env-A", "env-B"]);
    }

    #[test]
    fn test_parse_environment_names_rejects_garbage() {
        let err = parse_environment_names("conda: command not found").unwrap_err();
        assert_eq!(err.kind(), "EnvironmentProvisionError");
    }

    #[tokio::test]
    async fn test_package_manager_probe_short_circuits() {
        let transport = MockTransport::new();
        let log = transport.log_handle();
        let mut session = session(transport);
        ensure_package_manager(&mut session, &ProvisionConfig::default())
            .await
            .expect("probe should succeed");
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_package_manager_installed_when_missing() {
        let transport = MockTransport::new()
            .respond("command -v conda", CommandResult::err(1, ""))
            .respond("curl -fsSL", CommandResult::ok(""))
            .respond("conda init bash", CommandResult::ok(""));
        let log = transport.log_handle();
        let mut session = session(transport);

        ensure_package_manager(&mut session, &ProvisionConfig::default())
            .await
            .expect("install should succeed");

        let commands = log.lock().unwrap();
        assert!(commands[1].command.contains("bash /tmp/conda-installer.sh -b -p ~/miniconda3"));
        assert!(commands[2].command.contains("conda init bash"));
    }

    #[tokio::test]
    async fn test_failed_install_is_fatal() {
        let transport = MockTransport::new()
            .respond("command -v conda", CommandResult::err(1, ""))
            .respond("curl -fsSL", CommandResult::err(22, "404 Not Found"));
        let mut session = session(transport);

        let err = ensure_package_manager(&mut session, &ProvisionConfig::default())
            .await
            .expect_err("install should fail");
        assert_eq!(err.kind(), "EnvironmentProvisionError");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_existing_environment_is_a_noop() {
        let transport = MockTransport::new()
            .respond("conda env list --json", CommandResult::ok(env_listing(&["env-A"])));
        let log = transport.log_handle();
        let mut session = session(transport);

        let env = EnvironmentDescriptor::new("env-A", "/scratch/utils-repo/env.yml");
        ensure_environment(&mut session, &ProvisionConfig::default(), &env)
            .await
            .expect("existing env should be accepted");

        let commands = log.lock().unwrap();
        assert!(!commands.iter().any(|c| c.command.contains("env create")));
    }

    #[tokio::test]
    async fn test_environment_name_prefix_does_not_count_as_existing() {
        // "env-A" exists; "env" must still be created.
        let transport = MockTransport::new()
            .respond("conda env list --json", CommandResult::ok(env_listing(&["env-A"])));
        let log = transport.log_handle();
        let mut session = session(transport);

        let env = EnvironmentDescriptor::new("env", "/scratch/utils-repo/env.yml");
        ensure_environment(&mut session, &ProvisionConfig::default(), &env)
            .await
            .expect("creation should run");

        let commands = log.lock().unwrap();
        assert!(commands.iter().any(|c| c
            .command
            .contains("conda env create --name env --file /scratch/utils-repo/env.yml")));
    }

    #[tokio::test]
    async fn test_environment_create_failure_is_fatal() {
        let transport = MockTransport::new()
            .respond("conda env list --json", CommandResult::ok(env_listing(&[])))
            .respond("conda env create", CommandResult::err(1, "ResolvePackageNotFound"));
        let mut session = session(transport);

        let env = EnvironmentDescriptor::new("env-A", "/scratch/utils-repo/env.yml");
        let err = ensure_environment(&mut session, &ProvisionConfig::default(), &env)
            .await
            .expect_err("create should fail");
        assert_eq!(err.kind(), "EnvironmentProvisionError");
    }

    #[tokio::test]
    async fn test_scheduler_on_path_is_accepted() {
        let transport = MockTransport::new();
        let log = transport.log_handle();
        let mut session = session(transport);
        ensure_scheduler(&mut session, &ProvisionConfig::default())
            .await
            .expect("probe should succeed");
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_loaded_via_module_system() {
        let transport = MockTransport::new()
            .respond_seq(
                "command -v sbatch",
                vec![CommandResult::err(1, ""), CommandResult::ok("")],
            );
        let log = transport.log_handle();
        let mut session = session(transport);

        ensure_scheduler(&mut session, &ProvisionConfig::default())
            .await
            .expect("module load should recover");

        let commands = log.lock().unwrap();
        assert!(commands[1].command.starts_with("module load slurm"));
    }

    #[tokio::test]
    async fn test_unreachable_scheduler_is_fatal() {
        let transport = MockTransport::new()
            .respond("command -v sbatch", CommandResult::err(1, ""))
            .respond("module load", CommandResult::err(1, "module: command not found"));
        let mut session = session(transport);

        let err = ensure_scheduler(&mut session, &ProvisionConfig::default())
            .await
            .expect_err("scheduler should be unreachable");
        assert_eq!(err.kind(), "EnvironmentProvisionError");
    }
}
