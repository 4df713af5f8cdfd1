use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bundle metadata written to `/.manifest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BundleManifest {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
