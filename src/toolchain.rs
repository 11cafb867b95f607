//! Toolchain selection and command construction.
//!
//! The language is inferred from the source file extension; the matching
//! compiler binary is resolved on the system search path before anything is
//! spawned. Absence of a tool is a reportable, non-fatal condition per
//! language — the bridge keeps serving the languages it can.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Source languages the bridge knows how to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Kotlin,
    Java,
}

impl Language {
    /// Infer the language from a source file name.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let ext = Path::new(file_name).extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "kt" => Some(Self::Kotlin),
            "java" => Some(Self::Java),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Kotlin => "kotlin",
            Self::Java => "java",
        }
    }
}

/// Configured executable names for the compilers and the runtime.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub kotlinc: String,
    pub javac: String,
    pub java: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            kotlinc: "kotlinc".to_string(),
            javac: "javac".to_string(),
            java: "java".to_string(),
        }
    }
}

impl Toolchain {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            kotlinc: config.kotlin_compiler.clone(),
            javac: config.java_compiler.clone(),
            java: config.java_runtime.clone(),
        }
    }

    /// The compiler executable for a language.
    pub fn compiler_for(&self, language: Language) -> &str {
        match language {
            Language::Kotlin => &self.kotlinc,
            Language::Java => &self.javac,
        }
    }

    /// Resolve every configured tool and log the outcome. Missing tools are
    /// warnings, not errors: the request that needs one gets the failure.
    pub fn probe(&self) -> Vec<(String, Option<PathBuf>)> {
        [&self.kotlinc, &self.javac, &self.java]
            .into_iter()
            .map(|tool| {
                let resolved = which::which(tool).ok();
                match &resolved {
                    Some(path) => info!(tool = %tool, path = %path.display(), "Toolchain available"),
                    None => warn!(tool = %tool, "Toolchain not found on PATH"),
                }
                (tool.clone(), resolved)
            })
            .collect()
    }
}

/// Resolve a tool on the search path, or report it missing by name.
pub fn resolve(tool: &str) -> Result<PathBuf, BridgeError> {
    which::which(tool).map_err(|_| BridgeError::ToolchainMissing {
        tool: tool.to_string(),
    })
}

/// Where a compiler is expected to leave its artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactHint {
    /// A single output file (Kotlin's runnable jar).
    File(PathBuf),
    /// The first `.class` file in a directory (javac's output layout).
    FirstClassIn(PathBuf),
}

/// A ready-to-spawn compiler invocation plus where to look for its output.
pub struct CompilePlan {
    pub command: Command,
    pub artifact: ArtifactHint,
}

/// Build the compiler invocation for a source file.
///
/// Kotlin: `kotlinc <src> -include-runtime -d <stem>.jar` (self-contained,
/// runnable jar). Java: `javac -d <classes dir> <src>`.
pub fn compile_plan(
    language: Language,
    compiler: &Path,
    source: &Path,
    out_dir: &Path,
) -> CompilePlan {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());

    match language {
        Language::Kotlin => {
            let jar = out_dir.join(format!("{stem}.jar"));
            let mut command = Command::new(compiler);
            command
                .arg(source)
                .arg("-include-runtime")
                .arg("-d")
                .arg(&jar);
            CompilePlan {
                command,
                artifact: ArtifactHint::File(jar),
            }
        }
        Language::Java => {
            let classes = out_dir.join("classes");
            let mut command = Command::new(compiler);
            command.arg("-d").arg(&classes).arg(source);
            CompilePlan {
                command,
                artifact: ArtifactHint::FirstClassIn(classes),
            }
        }
    }
}

/// Build the runtime invocation for a produced artifact.
///
/// Jars run via `java -jar`; loose class files via `java -cp <dir> <Stem>`.
pub fn run_plan(java: &Path, artifact: &Path) -> Command {
    let mut command = Command::new(java);
    if artifact.extension().is_some_and(|ext| ext == "jar") {
        command.arg("-jar").arg(artifact);
    } else {
        let class_dir = artifact.parent().unwrap_or_else(|| Path::new("."));
        let stem = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        command.arg("-cp").arg(class_dir).arg(stem);
    }
    command
}

/// Locate the artifact a finished compilation should have produced.
pub fn locate_artifact(hint: &ArtifactHint) -> Option<PathBuf> {
    match hint {
        ArtifactHint::File(path) => path.exists().then(|| path.clone()),
        ArtifactHint::FirstClassIn(dir) => {
            let mut classes: Vec<PathBuf> = std::fs::read_dir(dir)
                .ok()?
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "class"))
                .collect();
            classes.sort();
            classes.into_iter().next()
        }
    }
}
