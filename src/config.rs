//! Configuration loading and schema definitions for barrage.
//!
//! Configuration is a TOML file declaring the assembly set, the executor
//! invocation, and the strategy selection. See [`schema`] for the full
//! layout.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads barrage configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains invalid TOML, or
/// does not match the expected schema.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads barrage configuration from a TOML string.
///
/// Useful for testing or generating configuration programmatically.
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
