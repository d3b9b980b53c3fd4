//! Section/key/value settings document and the persistence trait behind it.
//!
//! The registry persists into a document shaped like an INI file: one default
//! section for global values and one section per device.  All values are
//! culture-invariant strings; interpreting them is the registry's job.
//!
//! A [`SettingsStore`] loads and saves the *whole* document.  Saving the whole
//! document in one step is what lets a registry mutation either land
//! completely or not at all.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key → value pairs of one section.
pub type Section = BTreeMap<String, String>;

/// Errors raised by a [`SettingsStore`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored document could not be parsed.
    #[error("failed to parse settings at {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The document could not be serialized.
    #[error("failed to serialize settings: {0}")]
    Serialize(String),

    /// The store refused the operation.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),

    /// A writer panicked while holding the registry lock.
    #[error("registry lock poisoned by a panicked writer")]
    Poisoned,
}

/// In-memory image of the persisted settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsDocument {
    sections: BTreeMap<String, Section>,
}

impl SettingsDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `key` in `section`, if present.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Sets `key` in `section`, creating the section if needed.
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Removes every key of `section`, and the section itself.
    pub fn clear_section(&mut self, section: &str) {
        self.sections.remove(section);
    }

    pub fn section(&self, section: &str) -> Option<&Section> {
        self.sections.get(section)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}

/// Loads and saves the settings document.
///
/// Implementations must make `save` all-or-nothing: after an `Err`, a
/// subsequent `load` returns the previously saved document.
#[cfg_attr(test, mockall::automock)]
pub trait SettingsStore: Send + Sync {
    /// Returns the persisted document, or an empty one if nothing was saved yet.
    fn load(&self) -> Result<SettingsDocument, PersistenceError>;

    /// Replaces the persisted document with `document`.
    fn save(&self, document: &SettingsDocument) -> Result<(), PersistenceError>;
}

/// A [`SettingsStore`] that keeps the document in memory.
///
/// Clones share the same document, so a caller can keep a handle and inspect
/// what was saved, or construct a second registry from it to simulate a
/// restart.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    document: Arc<Mutex<SettingsDocument>>,
    read_only: Arc<AtomicBool>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `document`.
    pub fn with_document(document: SettingsDocument) -> Self {
        Self {
            document: Arc::new(Mutex::new(document)),
            read_only: Arc::default(),
        }
    }

    /// Returns a copy of the last saved document.
    pub fn document(&self) -> SettingsDocument {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// While read-only, every `save` fails with [`PersistenceError::Unavailable`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<SettingsDocument, PersistenceError> {
        Ok(self.document())
    }

    fn save(&self, document: &SettingsDocument) -> Result<(), PersistenceError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "settings store is read-only".to_string(),
            ));
        }
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = document.clone();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
