//! Named model checkpoints on disk
//!
//! Models are stored as `<root>/<name>.json`: a small metadata envelope
//! around the agent's weight snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use signal_rl_core::{RLError, Result};

/// Checkpoint file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<W> {
    /// Model name
    pub name: String,
    /// Variant that produced the weights
    pub variant: String,
    /// Episode the weights were taken after
    pub episode: Option<usize>,
    /// Total waiting time of that episode
    pub total_waiting_time: Option<f64>,
    /// Save time
    pub saved_at: DateTime<Utc>,
    /// Weight snapshot
    pub weights: W,
}

/// Directory of named checkpoints
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    /// Store rooted at `root`; the directory is created on first save
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the checkpoints
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a model name maps to
    ///
    /// # Errors
    /// Returns [`RLError::Checkpoint`] for names that are empty or would
    /// escape the store directory.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(RLError::Checkpoint(format!("invalid model name '{name}'")));
        }
        Ok(self.root.join(format!("{name}.json")))
    }

    /// Write a checkpoint, replacing any previous one of the same name
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub async fn save<W: Serialize>(&self, checkpoint: &Checkpoint<W>) -> Result<PathBuf> {
        let path = self.path(&checkpoint.name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_vec_pretty(checkpoint)?;

        // Rename over the old file only once the new one is fully written.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;

        info!(model = %checkpoint.name, path = %path.display(), "saved checkpoint");
        Ok(path)
    }

    /// Read a checkpoint back
    ///
    /// # Errors
    /// Returns [`RLError::Checkpoint`] when the model does not exist, or a
    /// serialization error when the file is malformed.
    pub async fn load<W: DeserializeOwned>(&self, name: &str) -> Result<Checkpoint<W>> {
        let path = self.path(name)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RLError::Checkpoint(format!(
                    "no model '{name}' at {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Check whether a model exists
    pub async fn exists(&self, name: &str) -> bool {
        match self.path(name) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
