// Configuration validation
//
// Validates that required fields are present and values are sensible.
// Partitioner type names are resolved later by the registry, which also
// fails fast; the checks here catch what the registry cannot see.

use crate::{SinkConfig, StorageBackend};
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &SinkConfig) -> Result<()> {
    validate_rotation(config)?;
    validate_storage(config)?;
    validate_layout(config)?;

    for (idx, spec) in config.partitioners.iter().enumerate() {
        if spec.kind.is_empty() {
            bail!("partitioners[{}] has an empty type name", idx);
        }
    }

    if config.format.is_empty() {
        bail!("format must not be empty");
    }

    Ok(())
}

fn validate_rotation(config: &SinkConfig) -> Result<()> {
    if config.rotation.flush_size == 0 {
        bail!("rotation.flush_size must be greater than 0");
    }

    if config.rotation.flush_size > 10_000_000 {
        warn!(
            flush_size = config.rotation.flush_size,
            "rotation.flush_size is very large; files rotate rarely and buffer in memory"
        );
    }

    Ok(())
}

fn validate_storage(config: &SinkConfig) -> Result<()> {
    match config.storage.backend {
        StorageBackend::Fs => {
            let Some(fs) = &config.storage.fs else {
                bail!("storage.fs section required for the fs backend");
            };
            if fs.root.is_empty() {
                bail!("storage.fs.root must not be empty");
            }
        }
        StorageBackend::S3 => {
            let Some(s3) = &config.storage.s3 else {
                bail!("storage.s3 section required for the s3 backend");
            };
            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket must not be empty");
            }
            if s3.region.is_empty() {
                bail!("storage.s3.region must not be empty");
            }
        }
    }
    Ok(())
}

fn validate_layout(config: &SinkConfig) -> Result<()> {
    if config.topics_dir.is_empty() {
        bail!("topics_dir must not be empty");
    }
    if config.logs_dir.is_empty() {
        bail!("logs_dir must not be empty");
    }
    if config.topics_dir == config.logs_dir {
        bail!("topics_dir and logs_dir must differ; WAL files would mix with data files");
    }
    Ok(())
}
