//! Persistent user preference flags.
//!
//! A flat JSON object of boolean flags keyed by fixed names, stored in a
//! single file. Without a path the store lives in memory only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Whether text queries are machine-translated before dispatch.
pub const TRANSLATE_ENABLED: &str = "translate-checkbox";

#[derive(Debug, Clone, Default)]
pub struct PreferenceStore {
    path: Option<PathBuf>,
    flags: BTreeMap<String, bool>,
}

impl PreferenceStore {
    /// In-memory store; nothing is written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load flags from `path`. A missing file yields an empty store that
    /// will be created on the first [`set`](Self::set).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let flags = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), count = flags.len(), "Loaded preferences");
        Ok(Self {
            path: Some(path),
            flags,
        })
    }

    /// Flag value; unknown keys read as `false`.
    pub fn get(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    /// Set a flag and persist the whole store.
    pub fn set(&mut self, key: &str, value: bool) -> Result<(), CoreError> {
        self.flags.insert(key.to_string(), value);
        self.persist()
    }

    fn persist(&self) -> Result<(), CoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.flags)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::load(dir.path().join("prefs.json")).unwrap();
        assert!(!store.get(TRANSLATE_ENABLED));
    }

    #[test]
    fn flags_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");

        let mut store = PreferenceStore::load(&path).unwrap();
        store.set(TRANSLATE_ENABLED, true).unwrap();

        let reloaded = PreferenceStore::load(&path).unwrap();
        assert!(reloaded.get(TRANSLATE_ENABLED));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(
            PreferenceStore::load(&path),
            Err(CoreError::PreferenceFormat(_))
        );
    }

    #[test]
    fn in_memory_store_does_not_touch_disk() {
        let mut store = PreferenceStore::in_memory();
        store.set(TRANSLATE_ENABLED, true).unwrap();
        assert!(store.get(TRANSLATE_ENABLED));
    }
}
