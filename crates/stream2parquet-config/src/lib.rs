// stream2parquet-config - Sink configuration
//
// Supports configuration from multiple sources:
// 1. Environment variables (STREAM2PARQUET_* prefix, highest priority)
// 2. Config file path from STREAM2PARQUET_CONFIG
// 3. Config file contents from STREAM2PARQUET_CONFIG_CONTENT
// 4. Default config file locations (./config.toml, ./.stream2parquet.toml)

use serde::{Deserialize, Serialize};
use stream2parquet_core::PartitionerSpec;

mod sources;
mod validation;

pub use sources::{load_config, load_from_file_path};

/// Main sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub storage: StorageConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    /// Target file format, resolved through the writer-provider registry
    #[serde(default = "default_format")]
    pub format: String,

    /// Ordered child partition functions; an empty list is legal and
    /// collapses the destination path to the stream name
    #[serde(default)]
    pub partitioners: Vec<PartitionerSpec>,

    /// Root directory for committed data files
    #[serde(default = "default_topics_dir")]
    pub topics_dir: String,

    /// Root directory for per-shard write-ahead logs
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

fn default_format() -> String {
    "parquet".to_string()
}

fn default_topics_dir() -> String {
    "topics".to_string()
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

/// File rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Records per file before the commit protocol runs
    pub flush_size: usize,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { flush_size: 1000 }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Atomicity strategy for `commit(temp, final)`. An explicit choice:
    /// copying when the backend could rename races concurrent readers,
    /// so the fallback is never silent.
    #[serde(default)]
    pub commit_mode: CommitMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
        }
    }
}

/// How `commit(temp, final)` makes the final file visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Single-namespace atomic rename: a failure mid-operation leaves
    /// either the old or the new state, never a mix.
    #[default]
    AtomicRename,
    /// Copy into the destination namespace, verify length, then delete
    /// the temp file. Not atomic against concurrent readers of the
    /// destination.
    CopyVerify,
}

/// Local filesystem backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub root: String,
}

/// S3-compatible backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

impl SinkConfig {
    /// Parse a config from TOML text without touching the environment.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: SinkConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_fs_config() {
        let config = SinkConfig::from_toml(
            r#"
            [storage]
            backend = "fs"
            fs = { root = "/var/data" }
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.commit_mode, CommitMode::AtomicRename);
        assert_eq!(config.format, "parquet");
        assert_eq!(config.rotation.flush_size, 1000);
        assert!(config.partitioners.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_partitioner_list_parses_in_order() {
        let config = SinkConfig::from_toml(
            r#"
            [storage]
            backend = "fs"
            fs = { root = "/var/data" }

            [[partitioners]]
            type = "field"
            config = { "field.name" = "region" }

            [[partitioners]]
            type = "time_bucket"
            config = { "bucket.format" = "%Y-%m" }
            "#,
        )
        .unwrap();

        assert_eq!(config.partitioners.len(), 2);
        assert_eq!(config.partitioners[0].kind, "field");
        assert_eq!(config.partitioners[1].kind, "time_bucket");
    }

    #[test]
    fn test_commit_mode_parses() {
        let config = SinkConfig::from_toml(
            r#"
            [storage]
            backend = "s3"
            commit_mode = "copy_verify"
            s3 = { bucket = "sink", region = "us-east-1" }
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.commit_mode, CommitMode::CopyVerify);
    }
}
