//! Mapping-document loading and validation.

mod types;
mod validation;

pub use types::*;

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::Result;

impl MappingDocument {
    /// Load a mapping document from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a mapping document from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let doc: MappingDocument = serde_yaml::from_str(yaml)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Validate the document.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA-256 hash of the document, used to refuse resuming a run whose
    /// mapping has changed.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
