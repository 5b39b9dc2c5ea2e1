//! Application configuration loaded from an optional TOML file.

use std::path::Path;

use rekon_callback::DeliveryConfig;
use rekon_core::{Error, Result};
use rekon_reconciler::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Engine policies plus callback delivery settings.
///
/// Every section and field is optional; missing ones keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub delivery: DeliveryConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid TOML or policies that could never work.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::config(format!("invalid TOML: {e}")))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Load from `path`, or use defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value has no TOML representation.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(format!("cannot render TOML: {e}")))
    }
}
