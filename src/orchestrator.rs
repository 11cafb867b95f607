//! Desktop-side orchestrator.
//!
//! A single sequential poll loop: consume a command from the mailbox, turn
//! it into a subprocess invocation, publish a structured response. At most
//! one command is processed at a time, which matches the channel's
//! single-outstanding-request invariant — there is nothing to parallelize.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::mailbox::codec::{self, Command, CommandEnvelope, ResponseEnvelope};
use crate::mailbox::Mailbox;
use crate::subprocess;
use crate::toolchain::{self, Language, Toolchain};
use crate::workspace::Workspace;

/// Lifecycle of one consumed Compile command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    TimedOut,
}

impl JobStatus {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::TimedOut)
    }
}

/// Desktop-side record of a compilation. Ephemeral: garbage-collected once
/// its response has been drained, or after a grace period if never
/// acknowledged.
#[derive(Debug, Clone)]
pub struct CompilationJob {
    pub id: u64,
    pub source_file: PathBuf,
    pub output_file: Option<PathBuf>,
    pub language: Language,
    pub started_at: Instant,
    pub status: JobStatus,
}

/// The orchestrator service. Explicitly constructed and injectable so tests
/// can run several independent instances against isolated workspaces.
pub struct Orchestrator {
    workspace: Workspace,
    mailbox: Mailbox,
    toolchain: Toolchain,
    poll_interval: Duration,
    subprocess_timeout: Duration,
    job_grace: Duration,
    jobs: Mutex<HashMap<u64, CompilationJob>>,
    next_job_id: AtomicU64,
}

impl Orchestrator {
    pub fn new(workspace: Workspace, mailbox: Mailbox, config: &BridgeConfig) -> Self {
        Self {
            workspace,
            mailbox,
            toolchain: Toolchain::from_config(config),
            poll_interval: config.poll_interval,
            subprocess_timeout: config.subprocess_timeout,
            job_grace: config.job_grace,
            jobs: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
        }
    }

    /// Run the poll loop until the process is stopped.
    ///
    /// Clears leftover mailbox slots from a previous run first: a stale
    /// command would otherwise be compiled for a client that is long gone.
    pub async fn run(&self) {
        self.mailbox.clear().await;
        info!(
            command = %self.mailbox.command_path().display(),
            response = %self.mailbox.response_path().display(),
            "Orchestrator listening"
        );
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    warn!(error = %e, "Mailbox poll failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
            self.sweep_jobs();
        }
    }

    /// One poll step: consume at most one command and answer it.
    ///
    /// Returns whether a command was handled. The command file is deleted
    /// before orchestration begins (consume-once).
    pub async fn poll_once(&self) -> Result<bool, BridgeError> {
        let Some(payload) = self.mailbox.consume_command().await? else {
            return Ok(false);
        };

        let response = match codec::decode_command(&payload) {
            Ok(envelope) => self.handle_command(&envelope).await,
            Err(e) => {
                warn!(error = %e, "Discarding malformed command");
                failure(0, format!("malformed command: {e}"))
            }
        };

        self.mailbox
            .publish_response(&codec::encode_response(&response))
            .await?;
        Ok(true)
    }

    /// Snapshot of the job registry, ordered by id.
    pub fn jobs(&self) -> Vec<CompilationJob> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<_> = jobs.values().cloned().collect();
        snapshot.sort_by_key(|job| job.id);
        snapshot
    }

    async fn handle_command(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        match &envelope.command {
            Command::Ping => {
                info!("Ping received");
                ResponseEnvelope {
                    ok: true,
                    issued_at_ms: envelope.issued_at_ms,
                    stdout: "pong".to_string(),
                    ..ResponseEnvelope::default()
                }
            }
            Command::Compile {
                file_name,
                source_text,
            } => {
                self.handle_compile(envelope.issued_at_ms, file_name, source_text)
                    .await
            }
            Command::Run { artifact_path } => {
                self.handle_run(envelope.issued_at_ms, artifact_path).await
            }
        }
    }

    async fn handle_compile(
        &self,
        issued_at_ms: u64,
        file_name: &str,
        source_text: &str,
    ) -> ResponseEnvelope {
        // Strip any path components; the client names a file, not a location.
        let file_name = Path::new(file_name)
            .file_name()
            .map_or_else(|| "Main.kt".to_string(), |n| n.to_string_lossy().into_owned());

        let Some(language) = Language::from_file_name(&file_name) else {
            return failure(
                issued_at_ms,
                format!("unsupported file extension: {file_name}"),
            );
        };

        let source_path = self.workspace.source_dir().join(&file_name);
        let job_id = self.begin_job(&source_path, language);
        info!(job = job_id, file = %file_name, language = language.name(), "Compile request");

        if let Err(e) = tokio::fs::write(&source_path, source_text).await {
            self.finish_job(job_id, JobStatus::Failed, None);
            return failure(
                issued_at_ms,
                format!("cannot write source file {}: {e}", source_path.display()),
            );
        }

        let compiler = match toolchain::resolve(self.toolchain.compiler_for(language)) {
            Ok(path) => path,
            Err(e) => {
                warn!(job = job_id, error = %e, "Toolchain missing");
                self.finish_job(job_id, JobStatus::Failed, None);
                return failure(issued_at_ms, e.to_string());
            }
        };

        self.set_job_status(job_id, JobStatus::Running);
        let plan = toolchain::compile_plan(
            language,
            &compiler,
            &source_path,
            &self.workspace.compiled_dir(),
        );

        match subprocess::run_with_timeout(plan.command, self.subprocess_timeout).await {
            Ok(output) if output.exit_code == 0 => {
                let artifact = toolchain::locate_artifact(&plan.artifact);
                self.finish_job(job_id, JobStatus::Done, artifact.clone());
                info!(job = job_id, artifact = ?artifact, "Compilation succeeded");
                ResponseEnvelope {
                    ok: true,
                    issued_at_ms,
                    artifact_path: artifact.map(|p| p.to_string_lossy().into_owned()),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration_ms: as_millis(output.duration),
                    exit_code: Some(0),
                    error_message: None,
                }
            }
            Ok(output) => {
                info!(job = job_id, exit_code = output.exit_code, "Compilation failed");
                self.finish_job(job_id, JobStatus::Failed, None);
                ResponseEnvelope {
                    ok: false,
                    issued_at_ms,
                    artifact_path: None,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    duration_ms: as_millis(output.duration),
                    exit_code: Some(output.exit_code),
                    error_message: Some("compilation failed".to_string()),
                }
            }
            Err(BridgeError::SubprocessTimeout(budget)) => {
                warn!(job = job_id, budget = ?budget, "Compilation timed out");
                self.finish_job(job_id, JobStatus::TimedOut, None);
                failure(
                    issued_at_ms,
                    format!("compilation timeout after {}s", budget.as_secs()),
                )
            }
            Err(e) => {
                warn!(job = job_id, error = %e, "Compiler could not be spawned");
                self.finish_job(job_id, JobStatus::Failed, None);
                failure(issued_at_ms, e.to_string())
            }
        }
    }

    async fn handle_run(&self, issued_at_ms: u64, artifact_path: &str) -> ResponseEnvelope {
        let artifact = Path::new(artifact_path);
        if !artifact.exists() {
            return failure(issued_at_ms, format!("artifact not found: {artifact_path}"));
        }

        let java = match toolchain::resolve(&self.toolchain.java) {
            Ok(path) => path,
            Err(e) => return failure(issued_at_ms, e.to_string()),
        };

        info!(artifact = %artifact_path, "Run request");
        let command = toolchain::run_plan(&java, artifact);
        match subprocess::run_with_timeout(command, self.subprocess_timeout).await {
            Ok(output) => ResponseEnvelope {
                ok: output.exit_code == 0,
                issued_at_ms,
                artifact_path: Some(artifact_path.to_string()),
                stdout: output.stdout,
                stderr: output.stderr,
                duration_ms: as_millis(output.duration),
                exit_code: Some(output.exit_code),
                error_message: (output.exit_code != 0)
                    .then(|| format!("program exited with code {}", output.exit_code)),
            },
            Err(BridgeError::SubprocessTimeout(budget)) => failure(
                issued_at_ms,
                format!("execution timeout after {}s", budget.as_secs()),
            ),
            Err(e) => failure(issued_at_ms, e.to_string()),
        }
    }

    fn begin_job(&self, source_file: &Path, language: Language) -> u64 {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let job = CompilationJob {
            id,
            source_file: source_file.to_path_buf(),
            output_file: None,
            language,
            started_at: Instant::now(),
            status: JobStatus::Pending,
        };
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, job);
        id
    }

    fn set_job_status(&self, id: u64, status: JobStatus) {
        if let Some(job) = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            job.status = status;
        }
    }

    fn finish_job(&self, id: u64, status: JobStatus, output_file: Option<PathBuf>) {
        if let Some(job) = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            job.status = status;
            job.output_file = output_file;
        }
    }

    /// Drop terminal jobs once their response has been drained, or
    /// unconditionally after the grace period.
    fn sweep_jobs(&self) {
        let drained = !self.mailbox.response_path().exists();
        let grace = self.job_grace;
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, job| {
                let expired = job.status.is_terminal()
                    && (drained || job.started_at.elapsed() > grace);
                !expired
            });
    }
}

fn failure(issued_at_ms: u64, message: String) -> ResponseEnvelope {
    ResponseEnvelope {
        ok: false,
        issued_at_ms,
        error_message: Some(message),
        ..ResponseEnvelope::default()
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
