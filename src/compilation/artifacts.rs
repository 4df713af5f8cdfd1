//! Temporary build artifacts owned by a single compilation

use super::CompilationError;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Materialized policy source or bundle archive.
    Source,
    /// Capabilities document written or merged for this call.
    Capabilities,
    /// Compiled bundle produced by the backend.
    Output,
}

#[derive(Debug)]
struct TempArtifact {
    path: PathBuf,
    kind: ArtifactKind,
}

/// Ordered set of temporary files created by one compilation.
///
/// Artifacts are removed in reverse order of reservation when
/// [`ArtifactStack::cleanup`] runs or the stack is dropped. A released
/// artifact belongs to someone else and is left alone. Removal failures are
/// logged and never returned.
#[derive(Debug)]
pub struct ArtifactStack {
    dir: PathBuf,
    artifacts: Vec<TempArtifact>,
}

impl ArtifactStack {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            artifacts: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a unique path `<dir>/<uuid>.<extension>` and track it for
    /// cleanup. The file itself is not created.
    pub fn reserve(&mut self, kind: ArtifactKind, extension: &str) -> PathBuf {
        let path = self.dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        self.artifacts.push(TempArtifact {
            path: path.clone(),
            kind,
        });
        path
    }

    /// Stop tracking `path`. Returns false when it was not tracked.
    pub fn release(&mut self, path: &Path) -> bool {
        match self.artifacts.iter().rposition(|a| a.path == path) {
            Some(index) => {
                self.artifacts.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Remove every tracked artifact, newest first. Blocks the calling thread;
    /// async callers use [`ArtifactStack::cleanup_async`].
    pub fn cleanup(&mut self) {
        while let Some(artifact) = self.artifacts.pop() {
            let result = std::fs::remove_file(&artifact.path);
            log_removal(artifact, result);
        }
    }

    /// Remove every tracked artifact, newest first, on tokio's fs pool.
    pub async fn cleanup_async(&mut self) {
        while let Some(artifact) = self.artifacts.pop() {
            let result = tokio::fs::remove_file(&artifact.path).await;
            log_removal(artifact, result);
        }
    }
}

fn log_removal(artifact: TempArtifact, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(
            "Removed {:?} artifact {}",
            artifact.kind,
            artifact.path.display()
        ),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            let failure = CompilationError::ResourceCleanupFailure {
                path: artifact.path,
                reason: e.to_string(),
            };
            warn!("{}", failure);
        }
    }
}

impl Drop for ArtifactStack {
    fn drop(&mut self) {
        self.cleanup();
    }
}
