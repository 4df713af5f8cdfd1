//! Compiler backend driving the `opa` command line tool

pub mod args;
pub mod version;

pub use args::*;
pub use version::*;

use crate::compilation::{
    BuildOutput, BuildRequest, CompilationError, CompilerBackend, CompilerVersion, Result,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Executable looked up on `PATH` when no tool path is configured.
pub const DEFAULT_TOOL: &str = "opa";

static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*error\b|\brego_[a-z_]*error\b").expect("error line pattern is valid")
});

/// Runs `opa build` as a child process.
#[derive(Debug, Clone, Default)]
pub struct CliBackend {
    tool_path: Option<PathBuf>,
    extra_arguments: Option<String>,
}

impl CliBackend {
    pub fn new(tool_path: Option<PathBuf>, extra_arguments: Option<String>) -> Self {
        Self {
            tool_path: tool_path.filter(|p| !p.as_os_str().is_empty()),
            extra_arguments,
        }
    }

    fn resolve_tool(&self) -> Result<PathBuf> {
        match &self.tool_path {
            Some(path) => Ok(path.clone()),
            None => which::which(DEFAULT_TOOL).map_err(|e| CompilationError::ToolNotFound {
                tool: DEFAULT_TOOL.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn execute(&self, args: &[String]) -> Result<Output> {
        let tool = self.resolve_tool()?;
        debug!("Executing {} {}", tool.display(), args.join(" "));

        Command::new(&tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CompilationError::ToolNotFound {
                tool: tool.display().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Split tool output into error lines and everything else, logging the rest.
fn split_diagnostics(stdout: &str, stderr: &str) -> Vec<String> {
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        debug!("{}", line);
    }

    let mut errors = Vec::new();
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        if ERROR_LINE.is_match(line) {
            errors.push(line.to_string());
        } else {
            debug!("{}", line);
        }
    }
    errors
}

#[async_trait]
impl CompilerBackend for CliBackend {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn version(&self) -> Result<CompilerVersion> {
        let output = self.execute(&["version".to_string()]).await?;

        if !output.status.success() {
            return Err(CompilationError::BackendUnavailable {
                backend: self.name().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_version_output(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn capabilities(&self, version: &str) -> Result<Vec<u8>> {
        let args = [
            "capabilities".to_string(),
            "--version".to_string(),
            version.to_string(),
        ];
        let output = self.execute(&args).await?;

        if !output.status.success() {
            return Err(CompilationError::compilation_failed(
                format!("capabilities {version}"),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }

        Ok(output.stdout)
    }

    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput> {
        let mut request = request.clone();
        if request.extra_arguments.is_none() {
            request.extra_arguments = self.extra_arguments.clone();
        }

        let args = build_arguments(&request)?;
        let output = self.execute(&args).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let errors = split_diagnostics(&stdout, &stderr);

        if !output.status.success() || !errors.is_empty() {
            let diagnostics = if !stderr.trim().is_empty() {
                stderr.trim().to_string()
            } else {
                format!("opa build exited with {}", output.status)
            };

            return Err(CompilationError::compilation_failed(
                &request.source_path,
                diagnostics,
            ));
        }

        Ok(BuildOutput::File(request.output_path.clone()))
    }
}
