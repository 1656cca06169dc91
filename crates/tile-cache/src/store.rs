use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metadata::TileMetadata;

/// Default location of the tile metadata snapshot.
pub const DEFAULT_STATE_FILE: &str = "mti.json";

/// Errors that can occur while reading or writing the snapshot file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no snapshot file at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("snapshot file {} is not valid", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize tile snapshot: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("snapshot I/O failed for {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Flat-file snapshot of the durable `fileName -> TileMetadata` mapping.
///
/// The file holds a JSON array of `[fileName, metadata]` pairs. Writes go to
/// a sibling temporary file which is then renamed over the target, so a
/// reader never observes a half-written snapshot.
#[derive(Debug, Clone)]
pub struct TileStore {
    path: PathBuf,
}

impl TileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot.
    pub async fn load(&self) -> Result<HashMap<String, TileMetadata>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let pairs: Vec<(String, TileMetadata)> =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        Ok(pairs.into_iter().collect())
    }

    /// Read the snapshot, starting empty when it is missing, unparseable or
    /// cannot be read at all.
    pub async fn load_or_default(&self) -> HashMap<String, TileMetadata> {
        match self.load().await {
            Ok(map) => {
                info!(path = %self.path.display(), entries = map.len(), "tile snapshot loaded");
                map
            }
            Err(StoreError::NotFound { .. }) => {
                info!(path = %self.path.display(), "no tile snapshot found; starting empty");
                HashMap::new()
            }
            Err(err) => {
                let cause = std::error::Error::source(&err);
                warn!(%err, ?cause, "discarding unreadable tile snapshot; starting empty");
                HashMap::new()
            }
        }
    }

    /// Write the full mapping, replacing any previous snapshot.
    pub async fn save(&self, by_name: &HashMap<String, TileMetadata>) -> Result<(), StoreError> {
        let mut pairs: Vec<(&String, &TileMetadata)> = by_name.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let json = serde_json::to_vec(&pairs).map_err(StoreError::Serialize)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), entries = pairs.len(), "tile snapshot saved");
        Ok(())
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

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Default for TileStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}
