// /////////////////////////////////////////////////////////////////////////////
// DProc RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Provider Secrets Store
//!
//! API keys live in `$HOME/.dproc/secrets.json` with user-only permissions.
//! Environment variables (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
//! `GOOGLE_API_KEY`) always take precedence over the file, so deployments
//! can inject keys without touching disk.
//!
//! The file is read once per process; `dproc configure` rewrites it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dproc_domain::{DprocError, LlmProviderKind};

/// On-disk shape of `secrets.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretsFile {
    #[serde(default)]
    api_keys: BTreeMap<String, String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

/// Resolves provider API keys from the environment and the secrets file.
#[derive(Debug, Clone)]
pub struct SecretsStore {
    path: PathBuf,
    file: SecretsFile,
}

impl SecretsStore {
    /// Default location: `$HOME/.dproc/secrets.json`.
    pub fn default_path() -> Result<PathBuf, DprocError> {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| DprocError::storage("HOME is not set; cannot locate the secrets file"))?;
        Ok(home.join(".dproc").join("secrets.json"))
    }

    /// Loads the store. A missing file is not an error; it just means only
    /// environment keys are available.
    pub fn load(path: PathBuf) -> Result<Self, DprocError> {
        let file = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| DprocError::storage(format!("secrets file is malformed: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SecretsFile::default(),
            Err(e) => {
                return Err(DprocError::storage(format!(
                    "cannot read secrets file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Self { path, file })
    }

    pub fn load_default() -> Result<Self, DprocError> {
        Self::load(Self::default_path()?)
    }

    /// Resolves the key for a provider: environment first, then the file.
    pub fn api_key(&self, provider: LlmProviderKind) -> Option<String> {
        if let Ok(key) = std::env::var(provider.api_key_env_var()) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }
        self.file.api_keys.get(provider.secrets_key()).cloned()
    }

    /// Whether any key source exists for the provider.
    pub fn has_api_key(&self, provider: LlmProviderKind) -> bool {
        self.api_key(provider).is_some()
    }

    /// Stores a key and rewrites the file with user-only permissions.
    pub fn set_api_key(&mut self, provider: LlmProviderKind, key: String) -> Result<(), DprocError> {
        self.file
            .api_keys
            .insert(provider.secrets_key().to_string(), key);
        self.file.last_updated = Some(Utc::now());
        self.persist()
    }

    fn persist(&self) -> Result<(), DprocError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DprocError::storage(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let body = serde_json::to_string_pretty(&self.file)?;
        std::fs::write(&self.path, body)
            .map_err(|e| DprocError::storage(format!("cannot write {}: {}", self.path.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(|e| {
                DprocError::storage(format!("cannot restrict {}: {}", self.path.display(), e))
            })?;
        }

        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SecretsStore {
        SecretsStore::load(dir.path().join("secrets.json")).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        // Guard against ambient keys leaking into the assertion.
        if std::env::var(LlmProviderKind::Anthropic.api_key_env_var()).is_err() {
            assert!(!store.has_api_key(LlmProviderKind::Anthropic));
        }
    }

    #[test]
    fn test_set_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store
            .set_api_key(LlmProviderKind::OpenAi, "sk-test-123".to_string())
            .unwrap();

        let reloaded = store_in(&dir);
        if std::env::var(LlmProviderKind::OpenAi.api_key_env_var()).is_err() {
            assert_eq!(reloaded.api_key(LlmProviderKind::OpenAi).as_deref(), Some("sk-test-123"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_user_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store
            .set_api_key(LlmProviderKind::Google, "g-key".to_string())
            .unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, "not json").unwrap();
        let err = SecretsStore::load(path).unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}
