//! Bundle archive writer

use super::{BundleError, BundleManifest, MANIFEST_PATH};
use flate2::{write::GzEncoder, Compression};
use std::{
    fs::File,
    io::{self, Read, Write},
    path::Path,
};
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};

/// Size of the classic ustar name field.
const NAME_FIELD_LEN: usize = 100;

const GNU_LONG_LINK: &[u8] = b"././@LongLink";

/// Writes entries into a tar+gzip policy bundle.
///
/// Entries are not readable from the destination until [`BundleWriter::close`]
/// has flushed the tar terminator and the gzip trailer. Dropping an unclosed
/// writer closes it and logs any failure.
///
/// ```
/// use rego_compile::bundle::BundleWriter;
///
/// let mut bundle = Vec::new();
/// let mut writer = BundleWriter::new(&mut bundle, None).unwrap();
/// writer.write_entry("policy.rego", b"package test").unwrap();
/// writer.close().unwrap();
/// drop(writer);
///
/// assert!(!bundle.is_empty());
/// ```
pub struct BundleWriter<W: Write> {
    builder: Option<Builder<GzEncoder<W>>>,
    finished: Option<W>,
    entries_written: usize,
}

impl<W: Write> BundleWriter<W> {
    /// Open a bundle over `destination`, writing `/.manifest` first when a
    /// manifest is supplied.
    pub fn new(destination: W, manifest: Option<&BundleManifest>) -> Result<Self, BundleError> {
        let encoder = GzEncoder::new(destination, Compression::default());
        let mut writer = Self {
            builder: Some(Builder::new(encoder)),
            finished: None,
            entries_written: 0,
        };

        if let Some(manifest) = manifest {
            let content = serde_json::to_vec(manifest)?;
            writer.append_normalized(MANIFEST_PATH, &content)?;
        }

        Ok(writer)
    }

    /// Write `content` at `path`. Paths are normalized with
    /// [`normalize_entry_path`]; duplicate paths produce duplicate entries.
    pub fn write_entry(&mut self, path: &str, content: &[u8]) -> Result<(), BundleError> {
        let normalized = normalize_entry_path(path)?;
        self.append_normalized(&normalized, content)
    }

    /// Write everything readable from `reader` at `path`.
    pub fn write_entry_from_reader<R: Read>(
        &mut self,
        path: &str,
        mut reader: R,
    ) -> Result<(), BundleError> {
        // tar headers carry the entry size, so the content is buffered first
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        self.write_entry(path, &content)
    }

    /// Write every regular file below `root` at its root-relative path.
    pub fn write_directory(&mut self, root: &Path) -> Result<usize, BundleError> {
        let mut written = 0;

        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| BundleError::Io(io::Error::other(e.to_string())))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).map_err(|e| {
                BundleError::InvalidEntryPath {
                    path: entry.path().display().to_string(),
                    reason: e.to_string(),
                }
            })?;

            let file = File::open(entry.path())?;
            self.write_entry_from_reader(&relative.to_string_lossy(), file)?;
            written += 1;
        }

        debug!("Packed {} files from {}", written, root.display());
        Ok(written)
    }

    /// Number of entries written so far, including the manifest.
    pub fn entries_written(&self) -> usize {
        self.entries_written
    }

    /// Flush the archive terminator and the gzip trailer. Calling it again is
    /// a no-op.
    pub fn close(&mut self) -> Result<(), BundleError> {
        if let Some(builder) = self.builder.take() {
            let encoder = builder.into_inner()?;
            self.finished = Some(encoder.finish()?);
        }
        Ok(())
    }

    /// Close the writer and hand back the destination.
    pub fn into_inner(mut self) -> Result<W, BundleError> {
        self.close()?;
        self.finished.take().ok_or(BundleError::WriterClosed)
    }

    fn append_normalized(&mut self, path: &str, content: &[u8]) -> Result<(), BundleError> {
        let builder = self.builder.as_mut().ok_or(BundleError::WriterClosed)?;
        append_entry(builder, path, content)?;
        self.entries_written += 1;
        Ok(())
    }
}

impl<W: Write> Drop for BundleWriter<W> {
    fn drop(&mut self) {
        if self.builder.is_some() {
            if let Err(e) = self.close() {
                warn!("Failed to close bundle writer: {}", e);
            }
        }
    }
}

/// Normalize a bundle entry path to a forward-slash path rooted at `/`.
///
/// Backslashes become forward slashes, a rooted drive prefix such as `c:\` is
/// dropped, and empty or `.` segments are removed. Parent segments are
/// rejected.
pub fn normalize_entry_path(path: &str) -> Result<String, BundleError> {
    if path.trim().is_empty() {
        return Err(BundleError::InvalidEntryPath {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }

    let unified = path.replace('\\', "/");
    let without_drive = strip_drive_prefix(&unified);

    let mut segments = Vec::new();
    for segment in without_drive.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(BundleError::InvalidEntryPath {
                    path: path.to_string(),
                    reason: "parent directory segments are not allowed".to_string(),
                })
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(BundleError::InvalidEntryPath {
            path: path.to_string(),
            reason: "path does not name a file".to_string(),
        });
    }

    Ok(format!("/{}", segments.join("/")))
}

fn strip_drive_prefix(path: &str) -> &str {
    let bytes = path.as_bytes();
    // only a rooted drive such as `c:/`; `a:policy.rego` is an ordinary name
    if bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/' {
        &path[2..]
    } else {
        path
    }
}

// `Builder::append_data` refuses rooted paths, so headers are filled by hand.
fn append_entry<T: Write>(builder: &mut Builder<T>, path: &str, content: &[u8]) -> io::Result<()> {
    let name = path.as_bytes();
    let mtime = chrono::Utc::now().timestamp().max(0) as u64;

    if name.len() > NAME_FIELD_LEN {
        let mut long_name = Vec::with_capacity(name.len() + 1);
        long_name.extend_from_slice(name);
        long_name.push(0);

        let mut header = Header::new_gnu();
        set_raw_name(&mut header, GNU_LONG_LINK);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::GNULongName);
        header.set_size(long_name.len() as u64);
        header.set_mtime(mtime);
        header.set_cksum();
        builder.append(&header, long_name.as_slice())?;
    }

    let mut header = Header::new_gnu();
    set_raw_name(&mut header, name);
    header.set_mode(0o644);
    header.set_entry_type(EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mtime(mtime);
    header.set_cksum();
    builder.append(&header, content)
}

fn set_raw_name(header: &mut Header, name: &[u8]) {
    let field = &mut header.as_old_mut().name;
    let len = name.len().min(field.len());
    field.fill(0);
    field[..len].copy_from_slice(&name[..len]);
}
