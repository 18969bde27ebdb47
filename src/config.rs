//! Settings loading.
//!
//! Settings file: `~/.lightspeed/settings.json`. A missing file means
//! defaults; unknown keys are ignored so the file can be shared with other
//! tooling.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Production Lightspeed service URL.
pub const DEFAULT_LIGHTSPEED_URL: &str = "https://c.ai.ansible.redhat.com";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch for Lightspeed features.
    #[serde(alias = "lightspeedEnabled")]
    pub enabled: Option<bool>,

    /// Lightspeed service URL.
    #[serde(alias = "lightspeedUrl", alias = "URL")]
    pub url: Option<String>,
}

impl Config {
    /// Load settings from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    /// Default location of the settings file.
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".lightspeed").join("settings.json"))
            .ok_or_else(|| Error::config("Could not determine home directory"))
    }

    /// Whether Lightspeed features are enabled (default: true).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Effective service URL.
    #[must_use]
    pub fn service_url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_LIGHTSPEED_URL)
    }
}
