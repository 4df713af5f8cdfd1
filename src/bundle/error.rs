use thiserror::Error;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Invalid bundle entry path '{path}': {reason}")]
    InvalidEntryPath { path: String, reason: String },

    #[error("Bundle writer is already closed")]
    WriterClosed,

    #[error("Malformed bundle manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
