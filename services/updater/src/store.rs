//! Persistent system configuration store.
//!
//! The store is a JSON file owned by the wider admin surface; this module
//! reads and writes only the `dockerAutoUpdate.history` subtree and
//! preserves every other key untouched. Saves are atomic: write a sibling
//! temp file, then rename over the target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use drydock_retention::ImageHistory;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryState {
    #[serde(default)]
    images: ImageHistory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AutoUpdateState {
    #[serde(default)]
    history: HistoryState,

    #[serde(flatten)]
    rest: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SystemConfig {
    #[serde(rename = "dockerAutoUpdate", default)]
    docker_auto_update: AutoUpdateState,

    // Foreign keys owned by other subsystems, carried verbatim.
    #[serde(flatten)]
    rest: BTreeMap<String, serde_json::Value>,
}

/// File-backed system configuration holding the image history.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    config: SystemConfig,
}

impl StateStore {
    /// Load the store from `path`. A missing file yields empty state; a
    /// present-but-malformed file is an error.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let config = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "State file absent, starting empty");
                SystemConfig::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        Ok(Self { path, config })
    }

    /// The image history subtree.
    pub fn history(&self) -> &ImageHistory {
        &self.config.docker_auto_update.history.images
    }

    /// Mutable access to the image history subtree. Callers track dirtiness
    /// themselves (the ledger's `record` reports whether it changed).
    pub fn history_mut(&mut self) -> &mut ImageHistory {
        &mut self.config.docker_auto_update.history.images
    }

    /// Path this store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically persist the whole configuration: serialize, write
    /// `<path>.tmp`, rename over `<path>`.
    pub async fn save(&self) -> Result<(), StoreError> {
        let serialized =
            serde_json::to_vec_pretty(&self.config).map_err(|source| StoreError::Malformed {
                path: self.path.clone(),
                source,
            })?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &serialized)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
