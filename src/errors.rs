//! Error taxonomy for the orchestration core.
//!
//! Every failure kind named here is fatal to the composition that raised it.
//! The core never retries internally; the ambient orchestrator may retry the
//! whole composition. Messages carry the offending command string and the
//! captured stderr so a failed run can be diagnosed from the log alone.

use thiserror::Error;

/// Failure to deliver a command to the remote host.
///
/// Distinct from a non-zero remote exit status: a command that reached the
/// host and failed there is reported through its
/// [`CommandResult`](crate::session::CommandResult), not here.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The local ssh client could not be started at all.
    #[error("failed to spawn ssh client: {message}")]
    Spawn { message: String },

    /// The channel was refused, dropped mid-command, or authentication was
    /// denied.
    #[error("channel to {host} failed: {message}")]
    Channel { host: String, message: String },

    /// A command was issued through a session that was already closed.
    #[error("session to {host} is closed")]
    SessionClosed { host: String },
}

/// Top-level error for all orchestration-core operations.
#[derive(Debug, Error)]
pub enum RocError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A required filesystem prefix is missing from the remote mount table.
    #[error("required mount `{prefix}` is not present on {host}")]
    MountMissing { prefix: String, host: String },

    /// A remote command that the core requires to succeed exited non-zero.
    #[error("remote command `{command}` exited {exit_status}: {stderr}")]
    CommandFailed {
        command: String,
        exit_status: i32,
        stderr: String,
    },

    /// Clone, branch switch, or fast-forward pull failed irrecoverably.
    #[error("repository sync for `{repository}` failed running `{command}`: {stderr}")]
    RepositorySync {
        repository: String,
        command: String,
        stderr: String,
    },

    /// The package manager or a managed environment could not be made
    /// available, or the scheduler tooling is unreachable.
    #[error("environment provisioning failed running `{command}`: {stderr}")]
    EnvironmentProvision { command: String, stderr: String },

    /// The launcher exited non-zero or emitted output that violates its
    /// stdout contract.
    #[error("launcher dispatch failed: {message}")]
    Dispatch { message: String },

    /// The scheduler queue query itself failed, as opposed to reporting the
    /// job as absent.
    #[error("scheduler query `{command}` for job {job_id} failed: {stderr}")]
    JobWait {
        job_id: u64,
        command: String,
        stderr: String,
    },

    /// Jobs were still queued after the configured number of polling cycles.
    #[error("jobs {remaining:?} still queued after {cycles} polling cycles")]
    CompletionTimeout { remaining: Vec<u64>, cycles: u64 },
}

impl RocError {
    /// Stable kind tag for log filtering and orchestrator-side triage.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TransportError",
            Self::MountMissing { .. } => "MountMissingError",
            Self::CommandFailed { .. } => "CommandFailedError",
            Self::RepositorySync { .. } => "RepositorySyncError",
            Self::EnvironmentProvision { .. } => "EnvironmentProvisionError",
            Self::Dispatch { .. } => "DispatchError",
            Self::JobWait { .. } => "JobWaitError",
            Self::CompletionTimeout { .. } => "CompletionTimeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        let err = RocError::MountMissing {
            prefix: "/import/beegfs".to_string(),
            host: "hpc.example.org".to_string(),
        };
        assert_eq!(err.kind(), "MountMissingError");

        let err: RocError = TransportError::Channel {
            host: "hpc.example.org".to_string(),
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "TransportError");
    }

    #[test]
    fn test_messages_carry_command_and_stderr() {
        let err = RocError::RepositorySync {
            repository: "utils-repo".to_string(),
            command: "git clone ...".to_string(),
            stderr: "fatal: repository not found".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("utils-repo"));
        assert!(rendered.contains("git clone"));
        assert!(rendered.contains("repository not found"));
    }
}
