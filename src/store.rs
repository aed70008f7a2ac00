//! Persisted credential slot.
//!
//! The store holds at most one access/refresh token pair. A save replaces
//! both tokens in a single write, so a reader never sees the new access
//! token next to the old refresh token or the other way around.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{HeatmapError, Result};
use crate::session::Credential;

/// Key under which the access token is stored.
pub const ACCESS_TOKEN_KEY: &str = "strava_access_token";
/// Key under which the refresh token is stored.
pub const REFRESH_TOKEN_KEY: &str = "strava_refresh_token";

/// Single-slot storage for the current credential.
pub trait CredentialStore {
    /// Read the stored credential, if both tokens are present.
    fn load(&self) -> Result<Option<Credential>>;

    /// Replace the stored credential with `credential`.
    fn save(&mut self, credential: &Credential) -> Result<()>;

    /// Remove any stored credential.
    fn clear(&mut self) -> Result<()>;
}

/// In-memory store. Nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    slot: Option<Credential>,
    writes: u32,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a credential, as if saved by an earlier run.
    pub fn with_credential(credential: Credential) -> Self {
        Self { slot: Some(credential), writes: 0 }
    }

    /// Number of successful saves since creation.
    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.slot.clone())
    }

    fn save(&mut self, credential: &Credential) -> Result<()> {
        self.slot = Some(credential.clone());
        self.writes += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.slot = None;
        Ok(())
    }
}

/// On-disk layout: one JSON object keyed like the browser's local storage.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredTokens {
    #[serde(rename = "strava_access_token", default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(rename = "strava_refresh_token", default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// JSON file store.
///
/// Saves go to a sibling temp file which is then renamed over the target,
/// so the file on disk always holds a complete pair.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
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
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[CredentialStore] No credential file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(HeatmapError::store(e)),
        };

        let stored: StoredTokens = serde_json::from_str(&raw).map_err(HeatmapError::store)?;
        match (stored.access_token, stored.refresh_token) {
            (Some(access_token), Some(refresh_token)) => {
                Ok(Some(Credential::new(access_token, refresh_token)))
            }
            (None, None) => Ok(None),
            _ => {
                warn!(
                    "[CredentialStore] {} holds only one of {} / {}, ignoring it",
                    self.path.display(),
                    ACCESS_TOKEN_KEY,
                    REFRESH_TOKEN_KEY
                );
                Ok(None)
            }
        }
    }

    fn save(&mut self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(HeatmapError::store)?;
            }
        }

        let stored = StoredTokens {
            access_token: Some(credential.access_token.clone()),
            refresh_token: Some(credential.refresh_token.clone()),
        };
        let body = serde_json::to_vec_pretty(&stored).map_err(HeatmapError::store)?;

        let temp = self.temp_path();
        fs::File::create(&temp)
            .and_then(|mut file| {
                file.write_all(&body)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp, &self.path))
            .map_err(HeatmapError::store)?;

        debug!("[CredentialStore] Saved credential to {}", self.path.display());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HeatmapError::store(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(access: &str, refresh: &str) -> Credential {
        Credential::new(access.to_string(), refresh.to_string())
    }

    #[test]
    fn test_memory_store_overwrites() {
        let mut store = MemoryCredentialStore::new();
        assert_eq!(store.load().unwrap(), None);

        store.save(&credential("a1", "r1")).unwrap();
        store.save(&credential("a2", "r2")).unwrap();
        assert_eq!(store.load().unwrap(), Some(credential("a2", "r2")));
        assert_eq!(store.writes(), 2);

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");

        let mut store = FileCredentialStore::new(&path);
        store.save(&credential("a1", "r1")).unwrap();
        store.save(&credential("a2", "r2")).unwrap();

        // A fresh handle sees the last pair written
        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.load().unwrap(), Some(credential("a2", "r2")));
        assert!(!store.temp_path().exists());

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(ACCESS_TOKEN_KEY));
        assert!(raw.contains(REFRESH_TOKEN_KEY));
    }

    #[test]
    fn test_file_store_partial_pair_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, r#"{"strava_access_token": "only-access"}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_file_store_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCredentialStore::new(dir.path().join("tokens.json"));
        store.save(&credential("a1", "r1")).unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.load(), Err(crate::HeatmapError::Store { .. })));
    }
}
