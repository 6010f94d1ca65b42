//! API key lookup for the remote backend.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::RemoteConfig;

/// Resolve the API key from `api_key_file` or the configured environment
/// variable. A missing or empty key is an error.
pub fn load_api_key(config: &RemoteConfig) -> Result<String> {
    resolve_api_key(config, |name| std::env::var(name).ok())
}

/// Same as [`load_api_key`] with an injectable environment.
pub fn resolve_api_key(
    config: &RemoteConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    if let Some(path) = &config.api_key_file {
        let key = read_key_file(path)?;
        debug!(path = %path.display(), "Using API key from file");
        return Ok(key);
    }

    env(&config.api_key_env)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .with_context(|| {
            format!(
                "No API key for the remote backend: set {} or remote.api_key_file",
                config.api_key_env
            )
        })
}

fn read_key_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read API key file: {}", path.display()))?;
    let key = content.trim();
    if key.is_empty() {
        anyhow::bail!("API key file is empty: {}", path.display());
    }
    Ok(key.to_string())
}
