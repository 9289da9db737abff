/// Persisted connection state.
///
/// JSON file in the user config directory holding the last known API
/// base URL, the connection-mode preference, and the manual URL
/// override. A corrupt file is logged and replaced rather than taking
/// the subsystem down.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::ConnectionMode;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration directory not found")]
    NoConfigDir,
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredState {
    /// Base URL of the last server that validated.
    last_api_url: Option<String>,
    /// Preferred connection mode.
    #[serde(default)]
    mode: ConnectionMode,
    /// Operator-entered URL used by manual/remote modes.
    manual_url: Option<String>,
}

/// File-backed store with an in-memory cache. Every mutation writes
/// through to disk before returning.
pub struct ConnectionStore {
    path: PathBuf,
    state: RwLock<StoredState>,
}

impl ConnectionStore {
    /// Open the store at the default location
    /// (`<config_dir>/cloudbite/connection.json`).
    pub async fn open() -> StorageResult<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Open the store at a specific path.
    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str(&raw) {
                Ok(state) => {
                    info!(path = %path.display(), "Loaded persisted connection state");
                    state
                }
                Err(e) => {
                    warn!(error = %e, "Persisted connection state unreadable, starting fresh");
                    StoredState::default()
                }
            }
        } else {
            debug!(path = %path.display(), "No persisted connection state yet");
            StoredState::default()
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn default_path() -> StorageResult<PathBuf> {
        let dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(dir.join("cloudbite").join("connection.json"))
    }

    pub async fn last_api_url(&self) -> Option<String> {
        self.state.read().await.last_api_url.clone()
    }

    pub async fn set_last_api_url(&self, url: Option<String>) -> StorageResult<()> {
        {
            let mut state = self.state.write().await;
            state.last_api_url = url;
        }
        self.flush().await
    }

    pub async fn mode(&self) -> ConnectionMode {
        self.state.read().await.mode
    }

    pub async fn set_mode(&self, mode: ConnectionMode) -> StorageResult<()> {
        {
            let mut state = self.state.write().await;
            state.mode = mode;
        }
        self.flush().await
    }

    pub async fn manual_url(&self) -> Option<String> {
        self.state.read().await.manual_url.clone()
    }

    pub async fn set_manual_url(&self, url: Option<String>) -> StorageResult<()> {
        {
            let mut state = self.state.write().await;
            state.manual_url = url;
        }
        self.flush().await
    }

    async fn flush(&self) -> StorageResult<()> {
        let json = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&*state)?
        };
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.json");

        let store = ConnectionStore::with_path(path.clone()).await.unwrap();
        store
            .set_last_api_url(Some("http://192.168.1.50:3737".into()))
            .await
            .unwrap();
        store.set_mode(ConnectionMode::Manual).await.unwrap();
        store
            .set_manual_url(Some("http://10.0.0.9:3737".into()))
            .await
            .unwrap();

        let reopened = ConnectionStore::with_path(path).await.unwrap();
        assert_eq!(
            reopened.last_api_url().await.as_deref(),
            Some("http://192.168.1.50:3737")
        );
        assert_eq!(reopened.mode().await, ConnectionMode::Manual);
        assert_eq!(
            reopened.manual_url().await.as_deref(),
            Some("http://10.0.0.9:3737")
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = ConnectionStore::with_path(path).await.unwrap();
        assert_eq!(store.last_api_url().await, None);
        assert_eq!(store.mode().await, ConnectionMode::Auto);
    }

    #[tokio::test]
    async fn test_clearing_url_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.json");

        let store = ConnectionStore::with_path(path.clone()).await.unwrap();
        store
            .set_last_api_url(Some("http://192.168.1.50:3737".into()))
            .await
            .unwrap();
        store.set_last_api_url(None).await.unwrap();

        let reopened = ConnectionStore::with_path(path).await.unwrap();
        assert_eq!(reopened.last_api_url().await, None);
    }
}
