//! Bundle archive reader

use super::{BundleError, BundleManifest, DATA_JSON_PATH, MANIFEST_PATH, POLICY_WASM_PATH};
use flate2::read::GzDecoder;
use std::io::{self, Read};
use tar::Archive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub path: String,
    pub data: Vec<u8>,
}

/// An expanded bundle: every regular file entry in archive order.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    entries: Vec<BundleEntry>,
}

impl Bundle {
    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    /// First entry stored at `path`. Later duplicates are ignored.
    pub fn entry(&self, path: &str) -> Option<&BundleEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn policy_wasm(&self) -> Option<&[u8]> {
        self.entry(POLICY_WASM_PATH).map(|e| e.data.as_slice())
    }

    pub fn data_json(&self) -> Option<&[u8]> {
        self.entry(DATA_JSON_PATH).map(|e| e.data.as_slice())
    }

    pub fn manifest(&self) -> Result<Option<BundleManifest>, BundleError> {
        match self.entry(MANIFEST_PATH) {
            Some(entry) => Ok(Some(serde_json::from_slice(&entry.data)?)),
            None => Ok(None),
        }
    }
}

/// Expand a tar+gzip bundle into memory.
///
/// Entry paths are reported as stored, with a leading `/` added when the
/// producer wrote relative names (as `opa build` does).
pub fn read_bundle<R: Read>(reader: R) -> Result<Bundle, BundleError> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut entries = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let path = if raw_path.starts_with('/') {
            raw_path
        } else {
            format!("/{}", raw_path.trim_start_matches("./"))
        };

        // header sizes come from the archive, so grow with the bytes actually read
        let declared = entry.size();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        if data.len() as u64 != declared {
            return Err(BundleError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry {path} declares {declared} bytes but holds {}", data.len()),
            )));
        }

        entries.push(BundleEntry { path, data });
    }

    Ok(Bundle { entries })
}
