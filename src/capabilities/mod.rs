//! Capabilities document merging
//!
//! A capabilities document declares the builtin functions a compile target
//! accepts. Merging appends the builtins of a second document to those of a
//! first one, so a version pinned baseline can be extended with custom
//! builtins.

use serde_json::Value;
use thiserror::Error;

const BUILTINS_KEY: &str = "builtins";

#[derive(Error, Debug)]
pub enum CapabilitiesError {
    #[error("{document} capabilities document has no top-level 'builtins' array")]
    MissingBuiltins { document: &'static str },

    #[error("{document} capabilities document is not valid JSON: {source}")]
    InvalidJson {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Merge two capabilities documents.
///
/// Every element of `extension`'s `builtins` array is appended, in order, to
/// `base`'s array. Nothing is de-duplicated; all other keys of `base` are kept
/// as they are and those of `extension` are ignored.
pub fn merge_capabilities(base: &[u8], extension: &[u8]) -> Result<Vec<u8>, CapabilitiesError> {
    let mut merged = parse_document(base, "base")?;
    let mut extension = parse_document(extension, "extension")?;

    if let (Some(Value::Array(builtins)), Value::Array(extra)) =
        (merged.get_mut(BUILTINS_KEY), extension[BUILTINS_KEY].take())
    {
        builtins.extend(extra);
    }

    serde_json::to_vec(&merged).map_err(|source| CapabilitiesError::InvalidJson {
        document: "merged",
        source,
    })
}

fn parse_document(bytes: &[u8], document: &'static str) -> Result<Value, CapabilitiesError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|source| CapabilitiesError::InvalidJson { document, source })?;

    match value.get(BUILTINS_KEY) {
        Some(Value::Array(_)) => Ok(value),
        _ => Err(CapabilitiesError::MissingBuiltins { document }),
    }
}
