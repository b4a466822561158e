//! Show the effective configuration.

use anyhow::{Context, Result};
use pairsync_client::SyncConfig;
use std::path::Path;

/// Load configuration from `path`, or the defaults when `None`.
pub fn load(path: Option<&Path>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("Invalid configuration in {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

/// Run the config command.
pub fn run(config: &SyncConfig) -> Result<()> {
    print!("{}", render(config)?);
    Ok(())
}

fn render(config: &SyncConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to render configuration")
}
