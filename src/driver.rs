//! Client-side request driver.
//!
//! Issues a command, suspends cooperatively until a response appears or the
//! budget elapses, and exposes a three-outcome result so callers can tell
//! "desktop unreachable or slow" (`TimedOut`) apart from "compiler rejected
//! the code" (`Failure`). One driver serves one UI; concurrent calls queue
//! behind an async mutex rather than rejecting, so user actions are never
//! dropped.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::mailbox::codec::{self, Command, CommandEnvelope, ResponseEnvelope};
use crate::mailbox::Mailbox;

/// Client-visible state of the active request. Observed by the UI, mutated
/// only by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TestingConnection,
    Compiling,
    Succeeded(ResponseEnvelope),
    Failed(String),
}

/// Outcome of a `compile` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Success {
        artifact_path: String,
        duration_ms: u64,
        stdout: String,
        /// Compiler warnings (the stderr stream of a zero-exit compile).
        warnings: String,
    },
    Failure {
        message: String,
        stderr: String,
        stdout: String,
    },
    /// No response within the budget. The request may still be running on
    /// the desktop; there is no cancellation channel to retract it.
    TimedOut,
}

/// Outcome of a `run` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success {
        stdout: String,
        stderr: String,
        exit_code: i32,
        duration_ms: u64,
    },
    Failure {
        message: String,
        stderr: String,
        stdout: String,
    },
    TimedOut,
}

/// Per-request client budgets.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeouts {
    pub ping: Duration,
    pub compile: Duration,
    pub run: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            ping: Duration::from_secs(10),
            compile: Duration::from_secs(60),
            run: Duration::from_secs(10),
        }
    }
}

impl RequestTimeouts {
    pub const fn from_config(config: &BridgeConfig) -> Self {
        Self {
            ping: config.ping_timeout,
            compile: config.compile_timeout,
            run: config.run_timeout,
        }
    }
}

/// The request driver. One instance per editor session.
pub struct RequestDriver {
    mailbox: Mailbox,
    timeouts: RequestTimeouts,
    /// Single-flight guard: only one ping/compile/run may be outstanding on
    /// the channel. Later calls queue here in arrival order.
    in_flight: Mutex<()>,
    state: watch::Sender<SessionState>,
}

impl RequestDriver {
    pub fn new(mailbox: Mailbox, timeouts: RequestTimeouts) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            mailbox,
            timeouts,
            in_flight: Mutex::new(()),
            state,
        }
    }

    /// Subscribe to session state changes.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current session state.
    pub fn current_state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Return to `Idle`, abandoning any terminal state.
    pub fn reset(&self) {
        self.state.send_replace(SessionState::Idle);
    }

    /// Connection test: publish a Ping and wait briefly for acknowledgement.
    pub async fn ping(&self) -> bool {
        let _flight = self.in_flight.lock().await;
        self.state.send_replace(SessionState::TestingConnection);

        let envelope = CommandEnvelope {
            command: Command::Ping,
            issued_at_ms: now_ms(),
        };
        match self.exchange(&envelope, self.timeouts.ping).await {
            Ok(response) if response.ok => {
                self.state.send_replace(SessionState::Succeeded(response));
                true
            }
            Ok(response) => {
                let message = response
                    .error_message
                    .unwrap_or_else(|| "bridge rejected ping".to_string());
                self.state.send_replace(SessionState::Failed(message));
                false
            }
            Err(e) => {
                info!(error = %e, "Connection test failed");
                self.state.send_replace(SessionState::Failed(e.to_string()));
                false
            }
        }
    }

    /// Compile `source` as `file_name` on the desktop.
    pub async fn compile(&self, file_name: &str, source: &str) -> CompileOutcome {
        let _flight = self.in_flight.lock().await;
        self.state.send_replace(SessionState::Compiling);

        let envelope = CommandEnvelope {
            command: Command::Compile {
                file_name: file_name.to_string(),
                source_text: source.to_string(),
            },
            issued_at_ms: now_ms(),
        };

        match self.exchange(&envelope, self.timeouts.compile).await {
            Ok(response) if response.ok => {
                let outcome = CompileOutcome::Success {
                    artifact_path: response.artifact_path.clone().unwrap_or_default(),
                    duration_ms: response.duration_ms,
                    stdout: response.stdout.clone(),
                    warnings: response.stderr.clone(),
                };
                self.state.send_replace(SessionState::Succeeded(response));
                outcome
            }
            Ok(response) => {
                let message = response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "compilation failed".to_string());
                self.state
                    .send_replace(SessionState::Failed(message.clone()));
                CompileOutcome::Failure {
                    message,
                    stderr: response.stderr,
                    stdout: response.stdout,
                }
            }
            Err(BridgeError::Timeout(budget)) => {
                info!(budget = ?budget, "Compile request timed out");
                self.state.send_replace(SessionState::Failed(
                    "no response from the desktop bridge".to_string(),
                ));
                CompileOutcome::TimedOut
            }
            Err(e) => {
                self.state.send_replace(SessionState::Failed(e.to_string()));
                CompileOutcome::Failure {
                    message: e.to_string(),
                    stderr: String::new(),
                    stdout: String::new(),
                }
            }
        }
    }

    /// Execute a previously produced artifact on the desktop.
    pub async fn run(&self, artifact_path: &str) -> RunOutcome {
        let _flight = self.in_flight.lock().await;
        self.state.send_replace(SessionState::Compiling);

        let envelope = CommandEnvelope {
            command: Command::Run {
                artifact_path: artifact_path.to_string(),
            },
            issued_at_ms: now_ms(),
        };

        match self.exchange(&envelope, self.timeouts.run).await {
            Ok(response) if response.ok => {
                let outcome = RunOutcome::Success {
                    stdout: response.stdout.clone(),
                    stderr: response.stderr.clone(),
                    exit_code: response.exit_code.unwrap_or(0),
                    duration_ms: response.duration_ms,
                };
                self.state.send_replace(SessionState::Succeeded(response));
                outcome
            }
            Ok(response) => {
                let message = response
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "program failed".to_string());
                self.state
                    .send_replace(SessionState::Failed(message.clone()));
                RunOutcome::Failure {
                    message,
                    stderr: response.stderr,
                    stdout: response.stdout,
                }
            }
            Err(BridgeError::Timeout(_)) => {
                self.state.send_replace(SessionState::Failed(
                    "no response from the desktop bridge".to_string(),
                ));
                RunOutcome::TimedOut
            }
            Err(e) => {
                self.state.send_replace(SessionState::Failed(e.to_string()));
                RunOutcome::Failure {
                    message: e.to_string(),
                    stderr: String::new(),
                    stdout: String::new(),
                }
            }
        }
    }

    /// Publish a command and wait for its matching response.
    ///
    /// Responses carrying a different issuance stamp belong to an abandoned
    /// request; they are drained and discarded, and polling continues with
    /// whatever budget remains. A stamp of 0 means the response was recovered
    /// leniently without its echo — accepted rather than dropped, since
    /// discarding a real result is worse than a weaker match.
    async fn exchange(
        &self,
        envelope: &CommandEnvelope,
        budget: Duration,
    ) -> Result<ResponseEnvelope, BridgeError> {
        self.mailbox
            .publish_command(&codec::encode_command(envelope))
            .await?;

        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let payload = self.mailbox.await_response(remaining).await.map_err(|e| {
                // Report the caller's budget, not the shrinking remainder.
                match e {
                    BridgeError::Timeout(_) => BridgeError::Timeout(budget),
                    other => other,
                }
            })?;

            let response = codec::decode_response(&payload)?;
            if response.issued_at_ms == 0 || response.issued_at_ms == envelope.issued_at_ms {
                return Ok(response);
            }
            debug!(
                got = response.issued_at_ms,
                want = envelope.issued_at_ms,
                "Discarding stale response"
            );
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
