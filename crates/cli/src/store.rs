// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential persistence: one JSON document with atomic writes.
//!
//! The access/refresh pair is stored as a single document and replaced
//! wholesale (write tmp + rename), so no reader can observe an access
//! credential from one generation paired with a refresh credential from
//! another.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the persisted document inside the state dir.
const FILE_NAME: &str = "credentials.json";

/// Persisted credential pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedPair {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

/// Durable store for the access/refresh credential pair.
///
/// Operations are synchronous and touch nothing beyond the persistence file.
/// Values are trimmed before storage; no content validation happens here.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store rooted at the given directory.
    pub fn new(dir: &Path) -> Self {
        Self { path: dir.join(FILE_NAME) }
    }

    /// Store rooted at the default state directory.
    pub fn open_default() -> Self {
        Self::new(&state_dir())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a new credential pair, replacing any previous pair atomically.
    pub fn save(&self, access: &str, refresh: &str) -> anyhow::Result<()> {
        let doc = PersistedPair {
            access_token: access.trim().to_owned(),
            refresh_token: refresh.trim().to_owned(),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// The stored access credential, if any.
    pub fn load_access(&self) -> Option<String> {
        self.read().map(|p| p.access_token).filter(|s| !s.is_empty())
    }

    /// The stored refresh credential, if any.
    pub fn load_refresh(&self) -> Option<String> {
        self.read().map(|p| p.refresh_token).filter(|s| !s.is_empty())
    }

    /// Remove both credentials. A missing file is already-cleared, not an
    /// error.
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), err = %e, "failed to clear credentials");
            }
        }
    }

    fn read(&self) -> Option<PersistedPair> {
        let data = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&data) {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), err = %e, "unreadable credential file");
                None
            }
        }
    }
}

/// Resolve the state directory for signon data.
///
/// Checks `SIGNON_STATE_DIR`, then `$XDG_STATE_HOME/signon`,
/// then `$HOME/.local/state/signon`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SIGNON_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("signon");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/signon");
    }
    PathBuf::from(".signon")
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
