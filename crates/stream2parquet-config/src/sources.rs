// Configuration source loading.
//
// Priority order:
// 1. Environment variables (STREAM2PARQUET_* prefix)
// 2. Config file path from STREAM2PARQUET_CONFIG
// 3. Inline config content from STREAM2PARQUET_CONFIG_CONTENT
// 4. Default config files (./config.toml, ./.stream2parquet.toml)

use crate::SinkConfig;
use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;

/// Load configuration from the standard sources.
pub fn load_config() -> Result<SinkConfig> {
    let Some(mut config) = load_from_default_sources()? else {
        bail!(
            "no configuration found; set STREAM2PARQUET_CONFIG or provide ./config.toml"
        );
    };
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a specific file path (for a --config flag).
/// Environment overrides still apply on top of the file content.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<SinkConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config: SinkConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn load_from_default_sources() -> Result<Option<SinkConfig>> {
    if let Ok(path) = env::var("STREAM2PARQUET_CONFIG") {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: SinkConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    if let Ok(content) = env::var("STREAM2PARQUET_CONFIG_CONTENT") {
        let config: SinkConfig = toml::from_str(&content)
            .context("Failed to parse inline config from STREAM2PARQUET_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in &["./config.toml", "./.stream2parquet.toml"] {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            let config: SinkConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?;
            return Ok(Some(config));
        }
    }

    Ok(None)
}

fn apply_env_overrides(config: &mut SinkConfig) -> Result<()> {
    if let Ok(value) = env::var("STREAM2PARQUET_FLUSH_SIZE") {
        config.rotation.flush_size = value
            .parse()
            .context("STREAM2PARQUET_FLUSH_SIZE must be an integer")?;
    }

    if let Ok(value) = env::var("STREAM2PARQUET_FORMAT") {
        config.format = value;
    }

    if let Ok(value) = env::var("STREAM2PARQUET_TOPICS_DIR") {
        config.topics_dir = value;
    }

    if let Ok(value) = env::var("STREAM2PARQUET_LOGS_DIR") {
        config.logs_dir = value;
    }

    Ok(())
}
