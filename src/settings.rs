//! The part of the player state that survives a restart.
//!
//! Only the volume crosses this boundary. Track, position and play state
//! are rebuilt empty on every start.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PersistedSettings {
    pub volume_percent: u8,
}

pub trait SettingsStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> anyhow::Result<Option<PersistedSettings>>;

    fn save(&self, settings: &PersistedSettings) -> anyhow::Result<()>;
}

/// Keeps the settings in a JSON file on the local disk.
#[derive(Clone, Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> anyhow::Result<Option<PersistedSettings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let settings: PersistedSettings = config::Config::builder()
            .add_source(config::File::new(
                &self.path.to_string_lossy(),
                config::FileFormat::Json,
            ))
            .build()?
            .try_deserialize()
            .with_context(|| format!("Invalid player settings in {}", self.path.display()))?;
        Ok(Some(PersistedSettings {
            volume_percent: settings.volume_percent.min(100),
        }))
    }

    fn save(&self, settings: &PersistedSettings) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)
            .with_context(|| format!("Could not write settings to {}", self.path.display()))?;
        debug!("Saved player settings to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("player.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("nested").join("player.json"));
        store
            .save(&PersistedSettings { volume_percent: 0 })
            .unwrap();

        let reloaded = JsonSettingsStore::new(store.path());
        assert_eq!(
            reloaded.load().unwrap(),
            Some(PersistedSettings { volume_percent: 0 })
        );
    }

    #[test]
    fn test_load_clamps_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        fs::write(&path, r#"{ "volume_percent": 250 }"#).unwrap();
        let store = JsonSettingsStore::new(&path);
        assert_eq!(store.load().unwrap().map(|s| s.volume_percent), Some(100));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.json");
        fs::write(&path, "not json").unwrap();
        assert!(JsonSettingsStore::new(&path).load().is_err());
    }
}
