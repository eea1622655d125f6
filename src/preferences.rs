//! Persistent user preferences
//!
//! Preferences are a flat string map. The file-backed store keeps it as a
//! single pretty-printed JSON object in an XDG-compliant config directory
//! (`~/.config/carfx/preferences.json` on Linux).

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use parking_lot::RwLock;
use thiserror::Error;

const PREFERENCES_FILE: &str = "preferences.json";

/// Errors that can occur while reading or writing preferences
#[derive(Debug, Error)]
pub enum PreferenceError {
    /// The preference file could not be read or written
    #[error("Preference storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The preference file exists but is not a JSON string map
    #[error("Preference file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// No home directory, so no default location exists
    #[error("Could not determine a preference directory")]
    NoDirectory,
}

/// Key/value storage for user preferences
pub trait PreferenceStore: Send + Sync + fmt::Debug {
    /// Returns the stored value, or `None` if the key was never set
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError>;

    /// Removes `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), PreferenceError>;
}

/// In-memory store, for tests and for runs that must not touch disk
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// Stores preferences as a JSON object on disk
///
/// Every call reads the file fresh, so edits made by another process are
/// picked up. A missing file reads as an empty map.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    /// Directory holding the preference file
    config_dir: PathBuf,
}

impl FilePreferenceStore {
    /// Creates a store in the XDG config directory
    ///
    /// Uses `~/.config/carfx/` on Linux, or the platform equivalent.
    pub fn new() -> Result<Self, PreferenceError> {
        let project_dirs =
            ProjectDirs::from("", "", "carfx").ok_or(PreferenceError::NoDirectory)?;
        Ok(Self {
            config_dir: project_dirs.config_dir().to_path_buf(),
        })
    }

    /// Creates a store in a custom directory
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Full path of the preference file
    pub fn path(&self) -> PathBuf {
        self.config_dir.join(PREFERENCES_FILE)
    }

    fn load(&self) -> Result<BTreeMap<String, String>, PreferenceError> {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(PreferenceError::Io { path, source }),
        };

        serde_json::from_str(&content).map_err(|e| PreferenceError::Corrupt {
            path,
            message: e.to_string(),
        })
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<(), PreferenceError> {
        let io_error = |path: &Path, source| PreferenceError::Io {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.config_dir).map_err(|e| io_error(&self.config_dir, e))?;

        let path = self.path();
        let json = serde_json::to_string_pretty(values).map_err(|e| PreferenceError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;

        // Write to a sibling file then rename so a crash never leaves a torn file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>, PreferenceError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<(), PreferenceError> {
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}
