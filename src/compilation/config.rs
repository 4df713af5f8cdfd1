use super::{CompilationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Compiler settings, fixed for the lifetime of a [`super::RegoCompiler`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub backend: BackendConfig,
    /// Directory for intermediate artifacts and compiled bundles. Must exist
    /// and be writable. Defaults to the system temp directory.
    pub output_path: Option<PathBuf>,
    /// OPA capabilities version. When set together with custom capabilities
    /// the two documents are merged.
    pub capabilities_version: Option<String>,
    /// Keep the compiled bundle file instead of deleting it once read.
    pub preserve_build_artifacts: bool,
    pub debug: bool,
    pub prune_unused: bool,
    pub optimization_level: u8,
    /// File and directory name patterns to skip while loading sources.
    pub ignore: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Cli {
        /// Path to the `opa` executable; looked up on `PATH` when unset.
        #[serde(default)]
        tool_path: Option<PathBuf>,
        /// Extra arguments appended to `opa build`, split like a shell would.
        #[serde(default)]
        extra_arguments: Option<String>,
    },
    Native {
        library_path: PathBuf,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Cli {
            tool_path: None,
            extra_arguments: None,
        }
    }
}

impl CompilerConfig {
    /// Load a configuration from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            CompilationError::InvalidInput(format!(
                "invalid compiler configuration {}: {e}",
                path.display()
            ))
        })
    }

    /// Directory intermediate artifacts are written to.
    pub fn artifact_dir(&self) -> PathBuf {
        self.output_path.clone().unwrap_or_else(std::env::temp_dir)
    }
}
