//! Persisted key/value settings used for the user's volume choices
//!
//! The file-backed store lives at `~/.config/resonance/audio.toml`

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AudioError;

/// Key/value store for small floating-point settings.
pub trait SettingsStore {
    fn get_f32(&self, key: &str) -> Option<f32>;

    /// Record a value. Stores that persist should write it out immediately.
    fn set_f32(&mut self, key: &str, value: f32);

    /// Force any buffered values out to storage.
    fn flush(&mut self) -> Result<(), AudioError>;
}

/// Settings kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    values: HashMap<String, f32>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: f32) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

impl SettingsStore for MemorySettings {
    fn get_f32(&self, key: &str) -> Option<f32> {
        self.values.get(key).copied()
    }

    fn set_f32(&mut self, key: &str, value: f32) {
        self.values.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Settings persisted to a TOML file, rewritten on every change.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
    values: BTreeMap<String, f32>,
}

impl TomlSettingsStore {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("resonance"))
    }

    /// Open the store in the user's config directory.
    pub fn open_default() -> Result<Self, AudioError> {
        let Some(dir) = Self::config_dir() else {
            return Err(AudioError::Settings(
                "could not determine config directory".into(),
            ));
        };
        Ok(Self::open(dir.join("audio.toml")))
    }

    /// Open the store at `path`, or start empty if the file is missing or bad.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = Self::read(&path);
        Self { path, values }
    }

    fn read(path: &Path) -> BTreeMap<String, f32> {
        if !path.exists() {
            info!("No audio settings file found, using defaults");
            return BTreeMap::new();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(values) => {
                    info!("Loaded audio settings from {:?}", path);
                    values
                }
                Err(e) => {
                    warn!("Failed to parse audio settings: {}, using defaults", e);
                    BTreeMap::new()
                }
            },
            Err(e) => {
                warn!("Failed to read audio settings file: {}, using defaults", e);
                BTreeMap::new()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), AudioError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| AudioError::Settings(e.to_string()))?;
            }
        }

        let content =
            toml::to_string_pretty(&self.values).map_err(|e| AudioError::Settings(e.to_string()))?;
        fs::write(&self.path, content).map_err(|e| AudioError::Settings(e.to_string()))?;
        Ok(())
    }
}

impl SettingsStore for TomlSettingsStore {
    fn get_f32(&self, key: &str) -> Option<f32> {
        self.values.get(key).copied()
    }

    fn set_f32(&mut self, key: &str, value: f32) {
        self.values.insert(key.to_string(), value);
        if let Err(e) = self.save() {
            warn!("Failed to save audio settings to {:?}: {}", self.path, e);
        }
    }

    fn flush(&mut self) -> Result<(), AudioError> {
        self.save()
    }
}
