//! Installed-version state
//!
//! Stored as `{"version": "<token>"}`. A missing or unreadable file means
//! nothing has been installed yet (version "0").

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, UpdaterError};
use crate::version::UNKNOWN_VERSION;

/// Last successfully applied installer version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    #[serde(default = "unknown_version")]
    pub version: String,
}

fn unknown_version() -> String {
    UNKNOWN_VERSION.to_string()
}

impl Default for InstalledVersion {
    fn default() -> Self {
        Self {
            version: unknown_version(),
        }
    }
}

/// Write data to a file atomically using temp file + rename
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Same directory so the rename never crosses filesystems
    let temp_path = path.with_extension("tmp");

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> InstalledVersion {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No state file at {}, assuming version 0", self.path.display());
                return InstalledVersion::default();
            }
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return InstalledVersion::default();
            }
        };

        match serde_json::from_str::<InstalledVersion>(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!("Corrupt state file {}: {}", self.path.display(), e);
                InstalledVersion::default()
            }
        }
    }

    pub fn get_installed_version(&self) -> String {
        let version = self.load().version;
        debug!("Installed installer version: {}", version);
        version
    }

    pub fn set_installed_version(&self, version: &str) -> Result<()> {
        let state = InstalledVersion {
            version: version.to_string(),
        };
        let content = serde_json::to_string_pretty(&state)
            .map_err(|e| UpdaterError::fs(&self.path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        atomic_write(&self.path, content.as_bytes()).map_err(|e| UpdaterError::fs(&self.path, e))?;
        info!("Installed version recorded: {}", version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_defaults_to_zero() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("installer_version.json"));
        assert_eq!(store.get_installed_version(), "0");
    }

    #[test]
    fn test_set_then_get() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::new(temp.path().join("nested/installer_version.json"));

        store.set_installed_version("2").unwrap();
        assert_eq!(store.get_installed_version(), "2");

        store.set_installed_version("3").unwrap();
        assert_eq!(store.get_installed_version(), "3");

        // No temp file left behind
        assert!(!temp.path().join("nested/installer_version.tmp").exists());
    }

    #[test]
    fn test_written_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("installer_version.json");
        let store = StateStore::new(&path);
        store.set_installed_version("7").unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], "7");
    }

    #[test]
    fn test_corrupt_file_defaults_to_zero() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("installer_version.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(StateStore::new(&path).get_installed_version(), "0");

        fs::write(&path, r#"{"version": 5}"#).unwrap();
        assert_eq!(StateStore::new(&path).get_installed_version(), "0");
    }

    #[test]
    fn test_missing_field_defaults_to_zero() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("installer_version.json");
        fs::write(&path, "{}").unwrap();
        assert_eq!(StateStore::new(&path).get_installed_version(), "0");
    }

    #[test]
    fn test_failed_write_keeps_previous_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("installer_version.json");
        let store = StateStore::new(&path);
        store.set_installed_version("4").unwrap();

        // A directory squatting on the temp name makes the write fail
        fs::create_dir(path.with_extension("tmp")).unwrap();
        assert!(store.set_installed_version("5").is_err());
        assert_eq!(store.get_installed_version(), "4");
    }
}
