//! Locker configuration.
//!
//! Two-layer merge: built-in defaults, then an optional TOML overlay
//! (host config or embedding application). Every overlay field is optional;
//! unset fields keep the layer below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// Effective locker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockerConfig {
    /// Root directory of the evidence store.
    pub root: PathBuf,

    /// Number of leading hash characters used for directory fan-out.
    pub fanout_width: usize,

    /// Actor recorded when a caller supplies none.
    pub default_actor: String,

    /// Directory export packages are written to. Defaults to `<root>/exports`.
    pub export_dir: Option<PathBuf>,

    /// Maximum gap in seconds between clips that still belong to one
    /// recording sequence.
    pub sequence_gap_seconds: i64,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("evidence-locker"),
            fanout_width: 2,
            default_actor: "system".to_string(),
            export_dir: None,
            sequence_gap_seconds: 120,
        }
    }
}

impl LockerConfig {
    /// Resolved export directory.
    pub fn effective_export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(|| self.root.join("exports"))
    }

    /// Apply an overlay on top of this configuration.
    pub fn with_overlay(mut self, overlay: ConfigOverlay) -> Self {
        if let Some(root) = overlay.root {
            self.root = root;
        }
        if let Some(fanout_width) = overlay.fanout_width {
            self.fanout_width = fanout_width;
        }
        if let Some(default_actor) = overlay.default_actor {
            self.default_actor = default_actor;
        }
        if let Some(export_dir) = overlay.export_dir {
            self.export_dir = Some(export_dir);
        }
        if let Some(gap) = overlay.sequence_gap_seconds {
            self.sequence_gap_seconds = gap;
        }
        self
    }

    /// Load defaults merged with a TOML overlay file, if one exists.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let base = Self::default();
        if !path.exists() {
            return Ok(base);
        }
        Ok(base.with_overlay(ConfigOverlay::from_toml_file(path)?))
    }
}

/// Partial configuration: one merge layer, all fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverlay {
    pub root: Option<PathBuf>,
    pub fanout_width: Option<usize>,
    pub default_actor: Option<String>,
    pub export_dir: Option<PathBuf>,
    pub sequence_gap_seconds: Option<i64>,
}

impl ConfigOverlay {
    /// Parse an overlay from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
