//! TOML file backend for the device settings document.
//!
//! Each settings section becomes a TOML table of string values:
//!
//! ```toml
//! [Settings]
//! DebugLogging = "false"
//! DeviceIds = "dev1"
//!
//! [dev1]
//! Name = "Rack PDU"
//! IPAddress = "10.0.0.5"
//! ```
//!
//! Saves are atomic: the document is written to a sibling temp file and then
//! renamed over the target, so a crash mid-write leaves the previous file
//! intact.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::application::settings::{PersistenceError, SettingsDocument, SettingsStore};

/// [`SettingsStore`] backed by a TOML file on disk.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<SettingsDocument, PersistenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => toml::from_str(&content).map_err(|e| PersistenceError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file yet; starting empty");
                Ok(SettingsDocument::new())
            }
            Err(e) => Err(Self::io_error(&self.path, e)),
        }
    }

    fn save(&self, document: &SettingsDocument) -> Result<(), PersistenceError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| Self::io_error(dir, e))?;
        }

        let content = toml::to_string_pretty(document)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        let temp = self.temp_path();
        std::fs::write(&temp, content).map_err(|e| Self::io_error(&temp, e))?;
        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(Self::io_error(&self.path, e));
        }
        debug!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
