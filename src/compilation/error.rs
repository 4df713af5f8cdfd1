use crate::bundle::BundleError;
use crate::capabilities::CapabilitiesError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("Compiler tool not found: {tool} - {reason}")]
    ToolNotFound { tool: String, reason: String },

    #[error("Compiler backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Native compiler library ABI version {found} is not supported (expected {expected})")]
    IncompatibleAbi { expected: u32, found: u32 },

    #[error("Malformed capabilities for {origin}: {cause}")]
    MalformedCapabilities {
        origin: String,
        #[source]
        cause: CapabilitiesError,
    },

    #[error("Capabilities file {path} was not found")]
    CapabilitiesNotFound { path: PathBuf },

    #[error("Compilation of {origin} failed: {diagnostics}")]
    CompilationFailed { origin: String, diagnostics: String },

    #[error("Compiler reported success for {origin} but returned no bundle")]
    BadResult { origin: String },

    #[error("Failed to locate expected output file {expected_path} for {origin}")]
    MissingOutputArtifact { origin: String, expected_path: PathBuf },

    #[error("Failed to remove build artifact {path}: {reason}")]
    ResourceCleanupFailure { path: PathBuf, reason: String },

    #[error("Invalid compilation input: {0}")]
    InvalidInput(String),

    #[error("Compilation cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CompilationError {
    pub fn compilation_failed(origin: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::CompilationFailed {
            origin: origin.into(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn malformed_capabilities(origin: impl Into<String>, cause: CapabilitiesError) -> Self {
        Self::MalformedCapabilities {
            origin: origin.into(),
            cause,
        }
    }

    /// Backend diagnostic text carried by the error, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::CompilationFailed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilationError>;
