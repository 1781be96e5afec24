//! Token Store Adapters
//!
//! Two [`TokenStore`] implementations:
//!
//! - [`MemoryTokenStore`]: process-local map, for tests and ephemeral runs
//! - [`FileTokenStore`]: JSON object on disk, loaded once at startup
//!
//! The file store writes to a sibling temp file and renames it over the
//! target, so readers of the file never see half a session.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::application::ports::{StoreError, StoreKey, TokenStore};
use crate::domain::session::SessionTokens;

type Entries = BTreeMap<String, String>;

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: RwLock<Entries>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: StoreKey) -> Option<String> {
        self.entries.read().get(key.as_str()).cloned()
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        self.entries.write().remove(key.as_str());
        Ok(())
    }

    fn set_session(&self, tokens: &SessionTokens) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        entries.insert(
            StoreKey::AccessToken.as_str().to_string(),
            tokens.access_token().to_string(),
        );
        entries.insert(
            StoreKey::RefreshToken.as_str().to_string(),
            tokens.refresh_token().to_string(),
        );
        Ok(())
    }

    fn clear_session(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        entries.remove(StoreKey::AccessToken.as_str());
        entries.remove(StoreKey::RefreshToken.as_str());
        Ok(())
    }
}

// =============================================================================
// File Store
// =============================================================================

/// JSON-file-backed token store.
///
/// All values are cached in memory; every mutation rewrites the file. The
/// cache is only updated after the file write succeeded.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    entries: RwLock<Entries>,
}

impl FileTokenStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Entries::new(),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::Serialize(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No token store file, starting empty");
                Entries::new()
            }
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", path.display()))),
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "Token store loaded");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the entries, persist it, then swap it in.
    fn update(&self, change: impl FnOnce(&mut Entries)) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let mut next = entries.clone();
        change(&mut next);
        write_atomically(&self.path, &next)?;
        *entries = next;
        Ok(())
    }
}

fn write_atomically(path: &Path, entries: &Entries) -> Result<(), StoreError> {
    let json =
        serde_json::to_string_pretty(entries).map_err(|e| StoreError::Serialize(e.to_string()))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| StoreError::Io(format!("{}: {e}", parent.display())))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(|e| StoreError::Io(format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: StoreKey) -> Option<String> {
        self.entries.read().get(key.as_str()).cloned()
    }

    fn set(&self, key: StoreKey, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.as_str().to_string(), value.to_string());
        })
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        if self.get(key).is_none() {
            return Ok(());
        }
        self.update(|entries| {
            entries.remove(key.as_str());
        })
    }

    fn set_session(&self, tokens: &SessionTokens) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(
                StoreKey::AccessToken.as_str().to_string(),
                tokens.access_token().to_string(),
            );
            entries.insert(
                StoreKey::RefreshToken.as_str().to_string(),
                tokens.refresh_token().to_string(),
            );
        })
    }

    fn clear_session(&self) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(StoreKey::AccessToken.as_str());
            entries.remove(StoreKey::RefreshToken.as_str());
        })
    }
}
