//! Batch job dispatcher.
//!
//! Runs a workflow-supplied launcher on the remote host and parses the
//! scheduler job identifiers it prints. The launcher contract: on success it
//! exits 0 and writes nothing but whitespace-separated integer job ids to
//! stdout; on failure it exits non-zero with a diagnostic on stderr.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::ProvisionConfig;
use crate::errors::RocError;
use crate::provision::conda_prefixed;
use crate::session::{Session, Transport};
use crate::util::quote;

/// Identifier assigned by the scheduler.
pub type JobId = u64;

/// Unordered set of scheduler job identifiers.
pub type JobSet = BTreeSet<JobId>;

/// How many job ids a launcher is contracted to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobExpectation {
    /// One or more job ids.
    #[default]
    AtLeastOne,
    /// Exactly one job id; more than one is a contract violation.
    ExactlyOne,
}

/// Ordered long-form `--name value` arguments for a launcher invocation.
///
/// Values are shell-quoted at render time, so identifiers containing
/// whitespace (e.g. space-delimited model lists) stay single arguments.
#[derive(Debug, Clone, Default)]
pub struct LauncherArgs {
    args: Vec<(String, String)>,
}

impl LauncherArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.args.push((name.to_string(), value.into()));
    }

    /// Builder-style [`push`](Self::push).
    #[must_use]
    pub fn arg(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Render as a command-line fragment.
    pub fn render(&self) -> String {
        self.args
            .iter()
            .map(|(name, value)| format!("--{} {}", name, quote(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A launcher program on the remote host.
#[derive(Debug, Clone)]
pub struct Launcher {
    /// Remote path of the launcher program.
    pub path: String,
    /// Managed environment activated before the launcher runs.
    pub environment: String,
    /// Interpreter to run the launcher with, when it is not directly
    /// executable.
    pub interpreter: Option<String>,
    pub expectation: JobExpectation,
}

impl Launcher {
    pub fn new(path: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
            interpreter: None,
            expectation: JobExpectation::default(),
        }
    }

    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Contract this launcher to emit exactly one job id.
    #[must_use]
    pub fn expect_single_job(mut self) -> Self {
        self.expectation = JobExpectation::ExactlyOne;
        self
    }
}

/// Run the launcher and return the job ids it submitted.
pub async fn dispatch<T: Transport>(
    session: &mut Session<T>,
    provision: &ProvisionConfig,
    launcher: &Launcher,
    args: &LauncherArgs,
) -> Result<JobSet, RocError> {
    let mut invocation = String::new();
    if let Some(interpreter) = &launcher.interpreter {
        invocation.push_str(&quote(interpreter));
        invocation.push(' ');
    }
    invocation.push_str(&quote(&launcher.path));
    if !args.is_empty() {
        invocation.push(' ');
        invocation.push_str(&args.render());
    }
    let command = conda_prefixed(
        provision,
        &format!(
            "conda activate {} && {}",
            quote(&launcher.environment),
            invocation
        ),
    );

    debug!(launcher = %launcher.path, environment = %launcher.environment, "dispatching launcher");
    let result = session.exec(&command).await?;
    if !result.success() {
        return Err(RocError::Dispatch {
            message: format!(
                "launcher `{}` exited {}: {}",
                launcher.path, result.exit_status, result.stderr
            ),
        });
    }

    let ids = parse_job_ids(&result.stdout)?;
    if launcher.expectation == JobExpectation::ExactlyOne && ids.len() != 1 {
        return Err(RocError::Dispatch {
            message: format!(
                "launcher `{}` printed {} job ids, expected exactly one: {}",
                launcher.path,
                ids.len(),
                result.stdout
            ),
        });
    }

    let jobs: JobSet = ids.into_iter().collect();
    info!(launcher = %launcher.path, jobs = ?jobs, "launcher submitted jobs");
    Ok(jobs)
}

/// Parse launcher stdout into job ids.
///
/// Accepts whitespace-separated integers, optionally surrounded by
/// whitespace; any other token, or an empty output, violates the contract.
pub fn parse_job_ids(stdout: &str) -> Result<Vec<JobId>, RocError> {
    let tokens: Vec<&str> = stdout.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(RocError::Dispatch {
            message: "launcher printed no job ids".to_string(),
        });
    }
    tokens
        .into_iter()
        .map(|token| {
            token.parse::<JobId>().map_err(|_| RocError::Dispatch {
                message: format!("launcher printed non-integer token `{token}`"),
            })
        })
        .collect()
}
