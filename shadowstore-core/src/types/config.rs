//! Configuration types for shadowstore.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use crate::error::{Result, StoreError};

/// Settings shared by every store and scope in a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Directory under which each session gets its own shadow root
    pub staging_root: PathBuf,

    /// Public URL prefix the base store is served under
    pub root_url: String,

    /// Level for this crate's targets: `off`, `error`, `warn`, `info`,
    /// `debug` or `trace`
    pub log_level: String,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir().join("shadowstore"),
            root_url: "/".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ShadowConfig {
    /// Creates a new ShadowConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config suitable for development/testing.
    pub fn development() -> Self {
        Self {
            staging_root: PathBuf::from("./.shadowstore"),
            root_url: "/".to_string(),
            log_level: "debug".to_string(),
        }
    }

    /// Loads a JSON config file. Missing fields take their default values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::from_io(path.display().to_string(), e))?;
        serde_json::from_str(&raw).map_err(|source| StoreError::Config {
            path: path.display().to_string(),
            source,
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.staging_root.as_os_str().is_empty() {
            errors.push("staging_root must not be empty".to_string());
        } else if let Some(parent) = self.staging_root.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                errors.push(format!("Staging root parent does not exist: {:?}", parent));
            }
        }

        if self.level().is_none() {
            errors.push(format!("Unknown log level: {}", self.log_level));
        }

        if !(self.root_url.starts_with('/') || self.root_url.contains("://")) {
            errors.push(format!(
                "root_url must be absolute or start with '/': {}",
                self.root_url
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parsed `log_level`.
    pub fn level(&self) -> Option<LevelFilter> {
        self.log_level.parse().ok()
    }

    /// Directive for `tracing_subscriber::EnvFilter`. An unparsable level
    /// falls back to `info`.
    pub fn filter_directive(&self) -> String {
        let level = self.level().unwrap_or(LevelFilter::INFO);
        format!("shadowstore={},shadowstore_core={}", level, level)
    }
}
