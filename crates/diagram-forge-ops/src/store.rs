//! Persisted form values.
//!
//! The configuration is stored under a single key as JSON, with volatile
//! fields stripped. Storage failures never reach the caller: the store
//! degrades to an in-memory copy and keeps working.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use diagram_forge_core::{Configuration, FieldName, Snapshot};
use tracing::{debug, info, warn};

use crate::error::{OpsError, OpsResult};

/// Key holding the serialized configuration.
pub const FORM_VALUES_KEY: &str = "formValues";

/// Minimal durable key/value storage.
pub trait KeyValueStore: Send + fmt::Debug {
    /// Read a value, `None` if the key was never written.
    fn get(&self, key: &str) -> OpsResult<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&mut self, key: &str, value: &str) -> OpsResult<()>;

    /// Delete a value. Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> OpsResult<()>;

    /// Human-readable location, for logs and `state path`.
    fn describe(&self) -> String;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> OpsResult<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OpsError::storage(path, e.to_string())),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> OpsResult<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| OpsError::storage(&self.dir, e.to_string()))?;

        // Write beside the target and rename so readers never see a torn file
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value).map_err(|e| OpsError::storage(&tmp, e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| OpsError::storage(&path, e.to_string()))?;

        debug!(path = %path.display(), bytes = value.len(), "Wrote state file");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> OpsResult<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OpsError::storage(path, e.to_string())),
        }
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Process-local storage, also the fallback when the disk is unusable.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> OpsResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> OpsResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> OpsResult<()> {
        self.values.remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Load/save of the [`Configuration`] on top of a [`KeyValueStore`].
#[derive(Debug)]
pub struct StateStore {
    backend: Box<dyn KeyValueStore>,
    /// Set once the backend failed; all further traffic stays in memory.
    fallback: Option<MemoryStore>,
    last_revision: Option<u64>,
}

impl StateStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            fallback: None,
            last_revision: None,
        }
    }

    /// Store backed by JSON files in `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileStore::new(dir))
    }

    /// Store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Whether storage failed and values are only kept in memory.
    pub fn is_degraded(&self) -> bool {
        self.fallback.is_some()
    }

    /// Where the values live.
    pub fn location(&self) -> String {
        match &self.fallback {
            Some(memory) => format!("{} (degraded)", memory.describe()),
            None => self.backend.describe(),
        }
    }

    /// The persisted configuration, or defaults if absent or unreadable.
    pub fn load(&mut self) -> Configuration {
        let raw = match self.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(location = %self.location(), "No persisted form values");
                return Configuration::default();
            }
            Err(e) => {
                warn!(error = %e, "Could not read persisted form values, using defaults");
                self.degrade();
                return Configuration::default();
            }
        };

        match serde_json::from_str::<Configuration>(&raw) {
            Ok(mut config) => {
                // Generated text is never trusted from disk
                config.design_instructions.clear();
                debug!(location = %self.location(), "Restored form values");
                config
            }
            Err(e) => {
                warn!(error = %e, "Persisted form values are corrupt, using defaults");
                Configuration::default()
            }
        }
    }

    /// Persist `config` without the `excluding` fields.
    ///
    /// Volatile fields are always excluded. Never fails: storage errors
    /// switch the store to in-memory operation.
    pub fn save(&mut self, config: &Configuration, excluding: &[FieldName]) {
        let json = match sanitize(config, excluding) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Could not serialize form values");
                return;
            }
        };

        if let Err(e) = self.write(&json) {
            warn!(error = %e, "Persisting form values failed, continuing in memory");
            self.degrade();
            if let Err(e) = self.write(&json) {
                warn!(error = %e, "In-memory fallback rejected form values");
            }
        }
    }

    /// Persist a settled snapshot unless a newer one was already written.
    ///
    /// Returns `true` if the snapshot was saved.
    pub fn save_snapshot(&mut self, snapshot: &Snapshot) -> bool {
        if self.last_revision.is_some_and(|last| snapshot.revision <= last) {
            debug!(
                revision = snapshot.revision,
                last = ?self.last_revision,
                "Ignoring out-of-order snapshot"
            );
            return false;
        }
        self.save(&snapshot.configuration, FieldName::volatile());
        self.last_revision = Some(snapshot.revision);
        true
    }

    /// Forget the persisted values.
    pub fn clear(&mut self) {
        let result = match &mut self.fallback {
            Some(memory) => memory.remove(FORM_VALUES_KEY),
            None => self.backend.remove(FORM_VALUES_KEY),
        };
        if let Err(e) = result {
            warn!(error = %e, "Could not remove persisted form values");
        } else {
            info!(location = %self.location(), "Cleared persisted form values");
        }
    }

    fn read(&self) -> OpsResult<Option<String>> {
        match &self.fallback {
            Some(memory) => memory.get(FORM_VALUES_KEY),
            None => self.backend.get(FORM_VALUES_KEY),
        }
    }

    fn write(&mut self, json: &str) -> OpsResult<()> {
        match &mut self.fallback {
            Some(memory) => memory.set(FORM_VALUES_KEY, json),
            None => self.backend.set(FORM_VALUES_KEY, json),
        }
    }

    fn degrade(&mut self) {
        if self.fallback.is_none() {
            warn!(location = %self.backend.describe(), "State storage unavailable, degrading to memory");
            self.fallback = Some(MemoryStore::new());
        }
    }
}

/// JSON of `config` with volatile and `excluding` fields removed.
fn sanitize(config: &Configuration, excluding: &[FieldName]) -> OpsResult<String> {
    let mut value = serde_json::to_value(config)?;
    if let Some(object) = value.as_object_mut() {
        for field in FieldName::volatile().iter().chain(excluding) {
            object.remove(field.as_str());
        }
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Configuration {
        Configuration {
            source_folder: "proj".into(),
            gitignore_path: "proj/.gitignore".into(),
            diagram_category: "flowchart".into(),
            diagram_option: "basic".into(),
            include_folder_tree: false,
            include_python_code_outline: true,
            llm_vendor: "openai".into(),
            llm_model: "gpt-4".into(),
            design_instructions: "a very long generated text".into(),
        }
    }

    #[test]
    fn test_missing_state_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::file(dir.path());
        assert_eq!(store.load(), Configuration::default());
        assert!(!store.is_degraded());
    }

    #[test]
    fn test_round_trip_strips_design_instructions() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::file(dir.path());
        store.save(&sample(), &[]);

        let raw = std::fs::read_to_string(dir.path().join("formValues.json")).unwrap();
        assert!(!raw.contains("design_instructions"));
        assert!(!raw.contains("generated text"));

        let restored = StateStore::file(dir.path()).load();
        let expected = Configuration {
            design_instructions: String::new(),
            ..sample()
        };
        assert_eq!(restored, expected);
    }

    #[test]
    fn test_extra_exclusions() {
        let mut store = StateStore::in_memory();
        store.save(&sample(), &[FieldName::GitignorePath]);
        let restored = store.load();
        assert_eq!(restored.gitignore_path, "");
        assert_eq!(restored.source_folder, "proj");
    }

    #[test]
    fn test_corrupt_state_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("formValues.json"), "{not json").unwrap();

        let mut store = StateStore::file(dir.path());
        assert_eq!(store.load(), Configuration::default());
    }

    #[test]
    fn test_injected_design_instructions_are_ignored() {
        let mut backend = MemoryStore::new();
        backend
            .set(
                FORM_VALUES_KEY,
                r#"{"source_folder": "proj", "design_instructions": "stale"}"#,
            )
            .unwrap();
        let mut store = StateStore::new(backend);
        let config = store.load();
        assert_eq!(config.source_folder, "proj");
        assert!(config.design_instructions.is_empty());
        assert!(config.include_folder_tree);
    }

    #[test]
    fn test_unavailable_storage_degrades_to_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "a file, not a directory").unwrap();

        let mut store = StateStore::file(blocker.join("state"));
        store.save(&sample(), &[]);

        assert!(store.is_degraded());
        assert_eq!(store.load().source_folder, "proj");
        assert!(store.location().contains("degraded"));
    }

    #[test]
    fn test_older_snapshot_does_not_overwrite_newer() {
        let mut store = StateStore::in_memory();

        let mut newer = sample();
        newer.source_folder = "newer".into();
        assert!(store.save_snapshot(&Snapshot::new(2, newer)));

        let mut older = sample();
        older.source_folder = "older".into();
        assert!(!store.save_snapshot(&Snapshot::new(1, older)));

        assert_eq!(store.load().source_folder, "newer");
    }

    #[test]
    fn test_clear_removes_values() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::file(dir.path());
        store.save(&sample(), &[]);
        store.clear();
        assert_eq!(store.load(), Configuration::default());
        assert!(!dir.path().join("formValues.json").exists());
    }
}
