//! In-process mock transport for tests.
//!
//! `MockTransport` answers remote commands from scripted rules instead of a
//! network: no sockets, no ssh binary, suitable for CI. Rules match on
//! command substrings in insertion order; unmatched commands succeed with
//! empty output. Tests observe behavior through the shared command log and
//! the shared closed flag.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::TransportError;
use crate::session::{CommandResult, ExecOptions, Session, Transport};

/// Route tracing output through the test harness. Safe to call from every
/// test; only the first call installs a subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .try_init();
}

/// One command observed by the mock, with its execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub command: String,
    pub forward_agent: bool,
}

#[derive(Debug, Clone)]
enum MockOutcome {
    Reply(CommandResult),
    ChannelFailure(String),
}

#[derive(Debug)]
struct Rule {
    needle: String,
    require_agent: bool,
    queued: VecDeque<MockOutcome>,
    sticky: Option<MockOutcome>,
}

impl Rule {
    fn sticky(needle: &str, outcome: MockOutcome) -> Self {
        Self {
            needle: needle.to_string(),
            require_agent: false,
            queued: VecDeque::new(),
            sticky: Some(outcome),
        }
    }
}

/// Scripted transport standing in for a remote host.
#[derive(Debug, Default)]
pub struct MockTransport {
    rules: Vec<Rule>,
    log: Arc<Mutex<Vec<ExecutedCommand>>>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command containing `needle` with `result`.
    #[must_use]
    pub fn respond(mut self, needle: &str, result: CommandResult) -> Self {
        self.rules.push(Rule::sticky(needle, MockOutcome::Reply(result)));
        self
    }

    /// Answer successive commands containing `needle` with successive
    /// results; once the sequence is exhausted the rule stops matching.
    #[must_use]
    pub fn respond_seq(mut self, needle: &str, results: Vec<CommandResult>) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            require_agent: false,
            queued: results.into_iter().map(MockOutcome::Reply).collect(),
            sticky: None,
        });
        self
    }

    /// Answer commands containing `needle`, but only when agent forwarding
    /// was requested; without it the channel fails, as a remote host that
    /// needs onward authentication would.
    #[must_use]
    pub fn respond_requiring_agent(mut self, needle: &str, result: CommandResult) -> Self {
        let mut rule = Rule::sticky(needle, MockOutcome::Reply(result));
        rule.require_agent = true;
        self.rules.push(rule);
        self
    }

    /// Fail the channel itself for commands containing `needle`.
    #[must_use]
    pub fn fail_channel(mut self, needle: &str, message: &str) -> Self {
        self.rules.push(Rule::sticky(
            needle,
            MockOutcome::ChannelFailure(message.to_string()),
        ));
        self
    }

    /// Shared handle onto the command log.
    pub fn log_handle(&self) -> Arc<Mutex<Vec<ExecutedCommand>>> {
        Arc::clone(&self.log)
    }

    /// Shared flag set when the transport is closed.
    pub fn closed_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Wrap this transport in a session against a fixed mock host.
    pub fn into_session(self) -> Session<MockTransport> {
        Session::new(self, "mock-host", "mock-user")
    }
}

impl Transport for MockTransport {
    async fn exec(
        &mut self,
        command: &str,
        opts: ExecOptions,
    ) -> Result<CommandResult, TransportError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(ExecutedCommand {
                command: command.to_string(),
                forward_agent: opts.forward_agent,
            });
        }
        for rule in &mut self.rules {
            if !command.contains(&rule.needle) {
                continue;
            }
            if rule.require_agent && !opts.forward_agent {
                return Err(TransportError::Channel {
                    host: "mock-host".to_string(),
                    message: "remote host required agent forwarding".to_string(),
                });
            }
            let Some(outcome) = rule.queued.pop_front().or_else(|| rule.sticky.clone()) else {
                continue;
            };
            return match outcome {
                MockOutcome::Reply(result) => Ok(result),
                MockOutcome::ChannelFailure(message) => Err(TransportError::Channel {
                    host: "mock-host".to_string(),
                    message,
                }),
            };
        }
        Ok(CommandResult::ok(""))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
