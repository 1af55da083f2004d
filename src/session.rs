//! The remote command channel.
//!
//! A [`Session`] is an authenticated command channel to one remote host,
//! owned by exactly one composition. Every remote command the core issues
//! runs through a session; the session is closed on every exit path via
//! [`run_composition`].

use tracing::{debug, warn};

use crate::errors::{RocError, TransportError};
use crate::util::mask_secrets;

/// Captured outcome of one remote command.
///
/// stdout and stderr are disjoint streams, each trimmed of trailing
/// whitespace. `exit_status == 0` means the remote shell signalled no error;
/// a non-zero status is not a transport failure and is left to the caller
/// to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stdout: String = stdout.into();
        let stderr: String = stderr.into();
        Self {
            exit_status,
            stdout: stdout.trim_end().to_string(),
            stderr: stderr.trim_end().to_string(),
        }
    }

    /// A successful result carrying only stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// A failed result carrying only stderr.
    pub fn err(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self::new(exit_status, "", stderr)
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Per-command execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Attach an agent-forwarding request to the channel before execution,
    /// for commands that must re-authenticate from the remote host onward.
    pub forward_agent: bool,
}

impl ExecOptions {
    pub fn forwarding_agent() -> Self {
        Self {
            forward_agent: true,
        }
    }
}

/// A command channel implementation.
///
/// The production transport is [`SshTransport`](crate::ssh::SshTransport);
/// tests use [`MockTransport`](crate::testing::MockTransport). A transport
/// delivers one command at a time and reports delivery failures as
/// [`TransportError`]; it never interprets the command or its output.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn exec(
        &mut self,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandResult, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An authenticated channel to one remote host.
///
/// Commands are issued strictly sequentially; the channel is mutated only by
/// its owner. Sessions are never shared across compositions.
pub struct Session<T: Transport> {
    transport: T,
    host: String,
    principal: String,
    open: bool,
}

impl<T: Transport> Session<T> {
    /// Wrap an already-authenticated transport.
    ///
    /// Production code goes through [`open_session`](crate::ssh::open_session),
    /// which authenticates before constructing the session.
    pub fn new(transport: T, host: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            transport,
            host: host.into(),
            principal: principal.into(),
            open: true,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Execute one remote command and wait for it to exit.
    pub async fn exec(&mut self, command: &str) -> Result<CommandResult, RocError> {
        self.exec_with(command, ExecOptions::default()).await
    }

    /// Execute one remote command with explicit options.
    pub async fn exec_with(
        &mut self,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandResult, RocError> {
        if !self.open {
            return Err(TransportError::SessionClosed {
                host: self.host.clone(),
            }
            .into());
        }
        debug!(
            host = %self.host,
            command = %mask_secrets(command),
            forward_agent = opts.forward_agent,
            "executing remote command"
        );
        let result = self.transport.exec(command, opts).await?;
        debug!(
            host = %self.host,
            exit_status = result.exit_status,
            "remote command finished"
        );
        Ok(result)
    }

    /// Close the channel. Idempotent; a second close is a no-op.
    pub async fn close(&mut self) -> Result<(), RocError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.transport.close().await?;
        debug!(host = %self.host, "session closed");
        Ok(())
    }
}

/// Run one composition body against a session, guaranteeing close on every
/// exit path.
///
/// The operation's outcome is returned as-is; a failure to close is logged
/// and never masks it.
pub async fn run_composition<T, R, F>(mut session: Session<T>, op: F) -> Result<R, RocError>
where
    T: Transport,
    F: AsyncFnOnce(&mut Session<T>) -> Result<R, RocError>,
{
    let outcome = op(&mut session).await;
    if let Err(err) = session.close().await {
        warn!(host = %session.host, error = %err, "failed to close session cleanly");
    }
    outcome
}
