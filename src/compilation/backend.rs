//! The seam between the orchestrator and the two compiler backends

use super::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Compiler version information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerVersion {
    pub version: Option<String>,
    pub commit: Option<String>,
    pub go_version: Option<String>,
    pub platform: Option<String>,
}

/// How a backend wants raw policy text laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMaterialization {
    /// One-entry bundle archive holding `policy.rego`, compiled in bundle mode.
    BundleArchive,
    /// Plain `.rego` file, compiled outside bundle mode.
    RegoFile,
}

/// Normalized build parameters handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Forward-slash source path: a `.rego` file, bundle directory or archive.
    pub source_path: String,
    pub bundle_mode: bool,
    pub entrypoints: Vec<String>,
    pub capabilities_file: Option<String>,
    pub capabilities_version: Option<String>,
    pub optimization_level: u8,
    pub prune_unused: bool,
    pub debug: bool,
    pub ignore: Vec<String>,
    pub extra_arguments: Option<String>,
    /// Where file-producing backends write the compiled bundle.
    pub output_path: PathBuf,
}

/// What a backend produced.
#[derive(Debug)]
pub enum BuildOutput {
    /// The bundle was written to this file.
    File(PathBuf),
    /// The bundle bytes, already copied into owned memory.
    Bytes(Vec<u8>),
}

/// A compiler backend. Calls are independent of each other; backends hold no
/// per-call state.
#[async_trait]
pub trait CompilerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn source_materialization(&self) -> SourceMaterialization {
        SourceMaterialization::BundleArchive
    }

    async fn version(&self) -> Result<CompilerVersion>;

    /// Capabilities document of the given OPA version.
    async fn capabilities(&self, version: &str) -> Result<Vec<u8>>;

    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput>;
}
