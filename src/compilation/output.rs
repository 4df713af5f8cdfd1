use crate::bundle::{read_bundle, Bundle, BundleError};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A compiled policy bundle returned by [`super::RegoCompiler`].
///
/// File backed bundles delete their file when dropped unless the compiler was
/// configured to preserve build artifacts, in which case the file belongs to
/// the caller.
#[derive(Debug)]
pub struct CompiledBundle {
    storage: Storage,
}

#[derive(Debug)]
enum Storage {
    File {
        file: Option<File>,
        path: PathBuf,
        delete_on_close: bool,
    },
    Memory(Cursor<Vec<u8>>),
}

impl CompiledBundle {
    pub(crate) async fn open_file(path: &Path, delete_on_close: bool) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?.into_std().await;
        Ok(Self {
            storage: Storage::File {
                file: Some(file),
                path: path.to_path_buf(),
                delete_on_close,
            },
        })
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            storage: Storage::Memory(Cursor::new(bytes)),
        }
    }

    /// File backing this bundle, if any.
    pub fn backing_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::File { path, .. } => Some(path),
            Storage::Memory(_) => None,
        }
    }

    /// File that outlives this stream, if artifacts are preserved.
    pub fn persisted_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::File {
                path,
                delete_on_close: false,
                ..
            } => Some(path),
            _ => None,
        }
    }

    /// Read the whole bundle from the start.
    pub fn to_vec(&mut self) -> io::Result<Vec<u8>> {
        self.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Expand the bundle from the start.
    pub fn bundle(&mut self) -> Result<Bundle, BundleError> {
        self.seek(SeekFrom::Start(0))?;
        read_bundle(&mut *self)
    }

    /// Close the stream, deleting a non-persisted backing file.
    pub fn close(self) {}
}

fn closed() -> io::Error {
    io::Error::other("compiled bundle stream is closed")
}

impl Read for CompiledBundle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.storage {
            Storage::File { file, .. } => file.as_mut().ok_or_else(closed)?.read(buf),
            Storage::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for CompiledBundle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.storage {
            Storage::File { file, .. } => file.as_mut().ok_or_else(closed)?.seek(pos),
            Storage::Memory(cursor) => cursor.seek(pos),
        }
    }
}

impl Drop for CompiledBundle {
    fn drop(&mut self) {
        if let Storage::File {
            file,
            path,
            delete_on_close: true,
        } = &mut self.storage
        {
            // the handle must be gone before removal on platforms that lock open files
            drop(file.take());
            match std::fs::remove_file(&*path) {
                Ok(()) => debug!("Removed compiled bundle {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove compiled bundle {}: {}", path.display(), e),
            }
        }
    }
}
