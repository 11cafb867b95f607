//! Bridge configuration.
//!
//! Timeouts and the poll interval are explicit, injectable values rather
//! than constants — polling is a requirement of the transport, but tests
//! need to poll in milliseconds. Configuration comes from an optional JSON
//! file, with environment variable overrides on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::workspace::{DEFAULT_COMMAND_FILE, DEFAULT_RESPONSE_FILE};

/// Fully resolved configuration with `Duration` fields.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Root of the shared workspace.
    pub workspace_root: PathBuf,

    /// Mailbox slot file names under the workspace root.
    pub command_file: String,
    pub response_file: String,

    /// Interval between polls of a mailbox slot.
    pub poll_interval: Duration,

    /// Client-side budget for a connection-test ping.
    pub ping_timeout: Duration,

    /// Client-side budget for a compile request.
    pub compile_timeout: Duration,

    /// Client-side budget for a run request.
    pub run_timeout: Duration,

    /// Desktop-side wall-clock budget for any spawned subprocess.
    pub subprocess_timeout: Duration,

    /// How long a finished compilation job is kept for inspection before
    /// the registry garbage-collects it.
    pub job_grace: Duration,

    /// Age past which `compiled/` and `temp/` files are swept at startup.
    pub stale_artifact_age: Duration,

    /// Toolchain executable names (or absolute paths, for pinned installs).
    pub kotlin_compiler: String,
    pub java_compiler: String,
    pub java_runtime: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("bridge-workspace"),
            command_file: DEFAULT_COMMAND_FILE.to_string(),
            response_file: DEFAULT_RESPONSE_FILE.to_string(),
            poll_interval: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(10),
            compile_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(10),
            subprocess_timeout: Duration::from_secs(30),
            job_grace: Duration::from_secs(300),
            stale_artifact_age: Duration::from_secs(24 * 3600),
            kotlin_compiler: "kotlinc".to_string(),
            java_compiler: "javac".to_string(),
            java_runtime: "java".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load from a JSON config file. Absent fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json).context("Invalid bridge config")?;
        Ok(Self::from(file))
    }

    /// Defaults with environment variable overrides.
    ///
    /// Reads `BRIDGE_WORKSPACE`, `BRIDGE_POLL_INTERVAL_MS`, and
    /// `BRIDGE_*_TIMEOUT_SECONDS` for ping/compile/run/subprocess.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("BRIDGE_WORKSPACE") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(ms) = env_u64("BRIDGE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("BRIDGE_PING_TIMEOUT_SECONDS") {
            config.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("BRIDGE_COMPILE_TIMEOUT_SECONDS") {
            config.compile_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("BRIDGE_RUN_TIMEOUT_SECONDS") {
            config.run_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("BRIDGE_SUBPROCESS_TIMEOUT_SECONDS") {
            config.subprocess_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Configuration as read from the JSON file, before unit conversion.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    #[serde(default = "default_command_file")]
    pub command_file: String,

    #[serde(default = "default_response_file")]
    pub response_file: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_seconds: u64,

    #[serde(default = "default_compile_timeout")]
    pub compile_timeout_seconds: u64,

    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    #[serde(default = "default_subprocess_timeout")]
    pub subprocess_timeout_seconds: u64,

    #[serde(default = "default_job_grace")]
    pub job_grace_seconds: u64,

    #[serde(default = "default_stale_age")]
    pub stale_artifact_age_hours: u64,

    #[serde(default = "default_kotlinc")]
    pub kotlin_compiler: String,

    #[serde(default = "default_javac")]
    pub java_compiler: String,

    #[serde(default = "default_java")]
    pub java_runtime: String,
}

impl From<ConfigFile> for BridgeConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            workspace_root: file.workspace,
            command_file: file.command_file,
            response_file: file.response_file,
            poll_interval: Duration::from_millis(file.poll_interval_ms),
            ping_timeout: Duration::from_secs(file.ping_timeout_seconds),
            compile_timeout: Duration::from_secs(file.compile_timeout_seconds),
            run_timeout: Duration::from_secs(file.run_timeout_seconds),
            subprocess_timeout: Duration::from_secs(file.subprocess_timeout_seconds),
            job_grace: Duration::from_secs(file.job_grace_seconds),
            stale_artifact_age: Duration::from_secs(file.stale_artifact_age_hours * 3600),
            kotlin_compiler: file.kotlin_compiler,
            java_compiler: file.java_compiler,
            java_runtime: file.java_runtime,
        }
    }
}

fn default_workspace() -> PathBuf {
    PathBuf::from("bridge-workspace")
}

fn default_command_file() -> String {
    DEFAULT_COMMAND_FILE.to_string()
}

fn default_response_file() -> String {
    DEFAULT_RESPONSE_FILE.to_string()
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_ping_timeout() -> u64 {
    10
}

const fn default_compile_timeout() -> u64 {
    60
}

const fn default_run_timeout() -> u64 {
    10
}

const fn default_subprocess_timeout() -> u64 {
    30
}

const fn default_job_grace() -> u64 {
    300
}

const fn default_stale_age() -> u64 {
    24
}

fn default_kotlinc() -> String {
    "kotlinc".to_string()
}

fn default_javac() -> String {
    "javac".to_string()
}

fn default_java() -> String {
    "java".to_string()
}
