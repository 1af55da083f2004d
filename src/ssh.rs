//! SSH transport backed by the system OpenSSH client.
//!
//! One control master is established per session (`ControlMaster=auto` with a
//! session-unique `ControlPath`), so every command rides the channel that was
//! authenticated at open, and `close` tears the channel down with `-O exit`.
//! Commands run with `BatchMode=yes`: any interactive prompt is a failure.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::errors::{RocError, TransportError};
use crate::session::{CommandResult, ExecOptions, Session, Transport};

/// OpenSSH reserves exit status 255 for client-side/transport failures.
/// A remote command that itself exits 255 is indistinguishable and will be
/// reported as a transport failure.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Command channel to one host via the local `ssh` binary.
pub struct SshTransport {
    host: String,
    destination: String,
    port: u16,
    private_key_path: String,
    control_path: PathBuf,
    accept_unknown_host_keys: bool,
    connect_timeout: Duration,
}

impl SshTransport {
    fn new(config: &SessionConfig) -> Self {
        let private_key_path = shellexpand::tilde(&config.private_key_path).into_owned();
        let control_path = std::env::temp_dir().join(format!(
            "roc-{}-{}-{}-{}.ctl",
            config.principal,
            config.host,
            config.port,
            std::process::id()
        ));
        Self {
            host: config.host.clone(),
            destination: format!("{}@{}", config.principal, config.host),
            port: config.port,
            private_key_path,
            control_path,
            accept_unknown_host_keys: config.accept_unknown_host_keys,
            connect_timeout: config.connect_timeout(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        let host_key_policy = if self.accept_unknown_host_keys {
            "StrictHostKeyChecking=accept-new"
        } else {
            "StrictHostKeyChecking=yes"
        };
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "ControlPersist=60".to_string(),
            "-o".to_string(),
            host_key_policy.to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-i".to_string(),
            self.private_key_path.clone(),
        ]
    }
}

impl Transport for SshTransport {
    async fn exec(
        &mut self,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandResult, TransportError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args());
        if opts.forward_agent {
            cmd.arg("-A");
        }
        cmd.arg(&self.destination);
        cmd.arg(command);

        let output = cmd.output().await.map_err(|err| TransportError::Spawn {
            message: err.to_string(),
        })?;
        client_output_to_result(&self.host, output)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let output = Command::new("ssh")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg("-p")
            .arg(self.port.to_string())
            .arg(&self.destination)
            .output()
            .await
            .map_err(|err| TransportError::Spawn {
                message: err.to_string(),
            })?;
        if !output.status.success() {
            // The persist timer may already have reaped the master.
            debug!(host = %self.host, "control master was already gone at close");
        }
        Ok(())
    }
}

fn client_output_to_result(host: &str, output: Output) -> Result<CommandResult, TransportError> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let Some(code) = output.status.code() else {
        return Err(TransportError::Channel {
            host: host.to_string(),
            message: "ssh client terminated by signal".to_string(),
        });
    };
    if code == SSH_CLIENT_FAILURE {
        return Err(TransportError::Channel {
            host: host.to_string(),
            message: stderr.trim_end().to_string(),
        });
    }
    Ok(CommandResult::new(code, stdout, stderr))
}

/// Open an authenticated session to the configured host.
///
/// Authentication uses the configured private key; the probe command both
/// proves the credentials and establishes the control master that later
/// commands reuse.
pub async fn open_session(config: &SessionConfig) -> Result<Session<SshTransport>, RocError> {
    if config.accept_unknown_host_keys {
        warn!(
            host = %config.host,
            "unknown host keys will be accepted for this session"
        );
    }
    let mut transport = SshTransport::new(config);
    let probe = transport.exec("true", ExecOptions::default()).await?;
    if !probe.success() {
        return Err(TransportError::Channel {
            host: config.host.clone(),
            message: format!(
                "authentication probe exited {}: {}",
                probe.exit_status, probe.stderr
            ),
        }
        .into());
    }
    info!(
        host = %config.host,
        port = config.port,
        principal = %config.principal,
        private_key_path = %config.private_key_path,
        "session opened"
    );
    Ok(Session::new(transport, &config.host, &config.principal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn config() -> SessionConfig {
        SessionConfig {
            host: "hpc.example.org".to_string(),
            port: 2222,
            principal: "svc-climate".to_string(),
            private_key_path: "/tmp/id_ed25519".to_string(),
            accept_unknown_host_keys: true,
            connect_timeout_secs: 7,
        }
    }

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_base_args_carry_port_key_and_policy() {
        let transport = SshTransport::new(&config());
        let args = transport.base_args();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=7".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"/tmp/id_ed25519".to_string()));
        assert_eq!(transport.destination, "svc-climate@hpc.example.org");
    }

    #[test]
    fn test_strict_host_key_checking_is_the_default() {
        let transport = SshTransport::new(&SessionConfig {
            accept_unknown_host_keys: false,
            ..config()
        });
        assert!(
            transport
                .base_args()
                .contains(&"StrictHostKeyChecking=yes".to_string())
        );
    }

    #[test]
    fn test_remote_exit_status_is_not_a_transport_error() {
        let result = client_output_to_result("h", output(3, "", "no such file"))
            .expect("should be a command result");
        assert_eq!(result.exit_status, 3);
        assert_eq!(result.stderr, "no such file");
    }

    #[test]
    fn test_client_failure_maps_to_transport_error() {
        let err = client_output_to_result("h", output(255, "", "Permission denied (publickey)"))
            .expect_err("255 should be a transport error");
        assert!(err.to_string().contains("Permission denied"));
    }

    #[test]
    fn test_streams_stay_disjoint_and_trimmed() {
        let result =
            client_output_to_result("h", output(0, "101 102\n", "sbatch: queued\n")).unwrap();
        assert_eq!(result.stdout, "101 102");
        assert_eq!(result.stderr, "sbatch: queued");
    }
}
