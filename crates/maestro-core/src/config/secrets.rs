//! Secret store
//!
//! Keys are resolved by name from a JSON file kept outside the main config
//! (and outside version control). The store only ever hands out values by
//! exact name; nothing here logs secret material.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{OrchestratorError, Result};

/// Name → value secret source.
#[derive(Debug, Default)]
pub struct SecretStore {
    values: HashMap<String, String>,
}

impl SecretStore {
    /// An empty store (for configs with no secret references).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from a JSON object file. A missing file yields an empty store;
    /// whether that is fatal depends on whether any profile names a secret.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no secrets file, starting empty");
            return Ok(Self::empty());
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let values: HashMap<String, String> = serde_json::from_str(&text).map_err(|e| {
            OrchestratorError::Configuration(format!("malformed secrets file: {e}"))
        })?;

        tracing::info!(count = values.len(), "loaded secret store");
        Ok(Self { values })
    }

    /// Look up a secret by name.
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    #[cfg(test)]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_empty_store() {
        let store = SecretStore::load(Path::new("/nonexistent/secrets.json")).unwrap();
        assert!(store.get("anything").is_none());
    }

    #[test]
    fn loads_values_by_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ollama_api_key": "abc123"}}"#).unwrap();

        let store = SecretStore::load(file.path()).unwrap();
        assert_eq!(store.get("ollama_api_key").as_deref(), Some("abc123"));
        assert!(store.get("other").is_none());
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(SecretStore::load(file.path()).is_err());
    }
}
