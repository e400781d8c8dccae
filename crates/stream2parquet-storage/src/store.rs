//! OpenDAL-backed store
//!
//! Unified storage access across backends (local filesystem, S3-compatible
//! object stores, in-memory for tests). Backend polymorphism is delegated
//! to OpenDAL; this type adds the contract the commit protocol needs:
//! idempotent two-phase commit, definite existence probes for recovery,
//! and the WAL factory.

use opendal::{ErrorKind, Operator};
use tracing::{debug, warn};

use stream2parquet_config::{CommitMode, StorageBackend, StorageConfig};
use stream2parquet_core::{Result, ShardId, SinkError};

use crate::wal::Wal;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub path: String,
    pub is_dir: bool,
    pub len: u64,
}

/// Store handle bound to one backend and one commit strategy.
///
/// Cheap to clone; clones share the underlying operator.
#[derive(Clone)]
pub struct Store {
    op: Operator,
    commit_mode: CommitMode,
}

impl Store {
    pub fn new(op: Operator, commit_mode: CommitMode) -> Self {
        Self { op, commit_mode }
    }

    /// Build a store from validated configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let op = match config.backend {
            #[cfg(feature = "services-fs")]
            StorageBackend::Fs => {
                let fs = config.storage_fs()?;
                let builder = opendal::services::Fs::default().root(&fs.root);
                Operator::new(builder)
                    .map_err(|e| {
                        SinkError::config(format!("failed to create filesystem operator: {}", e))
                    })?
                    .finish()
            }
            #[cfg(not(feature = "services-fs"))]
            StorageBackend::Fs => {
                return Err(SinkError::config(
                    "fs backend requires the services-fs feature",
                ));
            }
            #[cfg(feature = "services-s3")]
            StorageBackend::S3 => {
                let s3 = config.storage_s3()?;
                let mut builder = opendal::services::S3::default()
                    .bucket(&s3.bucket)
                    .region(&s3.region);
                if let Some(endpoint) = &s3.endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let Some(key) = &s3.access_key_id {
                    builder = builder.access_key_id(key);
                }
                if let Some(secret) = &s3.secret_access_key {
                    builder = builder.secret_access_key(secret);
                }
                Operator::new(builder)
                    .map_err(|e| SinkError::config(format!("failed to create S3 operator: {}", e)))?
                    .finish()
            }
            #[cfg(not(feature = "services-s3"))]
            StorageBackend::S3 => {
                return Err(SinkError::config(
                    "s3 backend requires the services-s3 feature",
                ));
            }
        };
        Ok(Self::new(op, config.commit_mode))
    }

    pub fn commit_mode(&self) -> CommitMode {
        self.commit_mode
    }

    /// List a directory's entries, ordered by path.
    ///
    /// Fails with `NotFound` when the path is absent, `Io` on transport
    /// failure.
    pub async fn list_status(&self, path: &str) -> Result<Vec<FileStatus>> {
        let dir = normalize_dir(path);
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SinkError::NotFound(path.to_string()))
            }
            Err(e) => return Err(SinkError::io(e)),
        };

        if entries.is_empty() && !self.try_exists(&dir).await? {
            return Err(SinkError::NotFound(path.to_string()));
        }

        let mut statuses = Vec::new();
        for entry in entries {
            // Some services include the listed directory itself.
            if entry.path() == dir {
                continue;
            }
            let meta = self.op.stat(entry.path()).await.map_err(SinkError::io)?;
            statuses.push(FileStatus {
                path: entry.path().trim_end_matches('/').to_string(),
                is_dir: meta.is_dir(),
                len: meta.content_length(),
            });
        }
        statuses.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(statuses)
    }

    /// List with a caller-supplied filter on the entries.
    pub async fn list_status_filtered<F>(&self, path: &str, filter: F) -> Result<Vec<FileStatus>>
    where
        F: Fn(&FileStatus) -> bool,
    {
        let mut statuses = self.list_status(path).await?;
        statuses.retain(|s| filter(s));
        Ok(statuses)
    }

    /// Create a directory and any missing parents.
    ///
    /// Returns true whether the directory was created or already existed;
    /// concurrent callers racing on the same path are fine.
    pub async fn mkdirs(&self, path: &str) -> Result<bool> {
        self.op
            .create_dir(&normalize_dir(path))
            .await
            .map_err(SinkError::io)?;
        Ok(true)
    }

    /// Weak existence probe: a transport failure resolves to `false`.
    ///
    /// Only safe as a liveness check. The commit protocol and recovery
    /// use [`Store::try_exists`], which surfaces transport failures.
    pub async fn exists(&self, path: &str) -> bool {
        match self.try_exists(path).await {
            Ok(found) => found,
            Err(e) => {
                warn!(path, error = %e, "existence probe failed; treating as absent");
                false
            }
        }
    }

    /// Definite existence probe: `NotFound` maps to `false`, any other
    /// failure is an error.
    pub async fn try_exists(&self, path: &str) -> Result<bool> {
        match self.op.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SinkError::io(e)),
        }
    }

    /// Read a whole object.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        match self.op.read(path).await {
            Ok(data) => Ok(data.to_vec()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SinkError::NotFound(path.to_string()))
            }
            Err(e) => Err(SinkError::io(e)),
        }
    }

    /// Write a whole object.
    pub async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.op.write(path, data).await.map_err(SinkError::io)?;
        Ok(())
    }

    /// Make `final_path` contain exactly the bytes of `temp_path`.
    ///
    /// No-op when `temp_path == final_path`. Idempotent: retrying after a
    /// partial failure converges, and a retry that finds the temp file
    /// gone but the final file present is treated as already committed.
    pub async fn commit(&self, temp_path: &str, final_path: &str) -> Result<()> {
        if temp_path == final_path {
            return Ok(());
        }
        match self.commit_mode {
            CommitMode::AtomicRename => self.rename_commit(temp_path, final_path).await,
            CommitMode::CopyVerify => self.copy_commit(temp_path, final_path).await,
        }
    }

    async fn rename_commit(&self, temp_path: &str, final_path: &str) -> Result<()> {
        match self.op.rename(temp_path, final_path).await {
            Ok(()) => {
                debug!(temp_path, final_path, "renamed temp file into place");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.try_exists(final_path).await? {
                    debug!(final_path, "temp file gone and final present; commit already done");
                    Ok(())
                } else {
                    Err(SinkError::NotFound(temp_path.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::Unsupported => Err(SinkError::config(format!(
                "backend does not support rename; configure commit_mode = \"copy_verify\": {}",
                e
            ))),
            Err(e) => Err(SinkError::io(e)),
        }
    }

    // Copy across namespaces. Not atomic against concurrent readers of
    // the destination; the temp file survives until the copy verifies.
    async fn copy_commit(&self, temp_path: &str, final_path: &str) -> Result<()> {
        self.copy_commit_inner(temp_path, final_path, None).await
    }

    // `reported_length` stands in for the destination stat, modelling a
    // store whose reported size disagrees with the bytes written.
    async fn copy_commit_inner(
        &self,
        temp_path: &str,
        final_path: &str,
        reported_length: Option<u64>,
    ) -> Result<()> {
        let temp_meta = match self.op.stat(temp_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return if self.try_exists(final_path).await? {
                    debug!(final_path, "temp file gone and final present; commit already done");
                    Ok(())
                } else {
                    Err(SinkError::NotFound(temp_path.to_string()))
                };
            }
            Err(e) => return Err(SinkError::io(e)),
        };

        let bytes = self.read(temp_path).await?;
        let expected = bytes.len() as u64;
        self.write(final_path, bytes).await?;

        let reported = match reported_length {
            Some(len) => len,
            None => self
                .op
                .stat(final_path)
                .await
                .map_err(SinkError::io)?
                .content_length(),
        };
        if reported != expected || reported != temp_meta.content_length() {
            return Err(SinkError::io(format!(
                "copy verification failed for '{}': wrote {} bytes, destination reports {}",
                final_path, expected, reported
            )));
        }

        self.op.delete(temp_path).await.map_err(SinkError::io)?;
        debug!(temp_path, final_path, "copied and verified temp file");
        Ok(())
    }

    /// Delete a file, or a directory tree when `recursive` is set.
    ///
    /// Used for abandoned temp files and WAL housekeeping, never for
    /// committed final files.
    pub async fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        if recursive {
            self.op
                .remove_all(&normalize_dir(path))
                .await
                .map_err(SinkError::io)?;
        } else {
            self.op.delete(path).await.map_err(SinkError::io)?;
        }
        Ok(())
    }

    /// Open (but do not yet replay) the WAL for a shard.
    pub fn open_wal(&self, logs_dir: &str, shard: &ShardId) -> Wal {
        Wal::new(self.clone(), logs_dir, shard.clone())
    }
}

fn normalize_dir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("scheme", &self.op.info().scheme())
            .field("commit_mode", &self.commit_mode)
            .finish()
    }
}

/// Accessors that turn missing config sections into `SinkError::Config`.
trait StorageConfigExt {
    #[allow(dead_code)]
    fn storage_fs(&self) -> Result<&stream2parquet_config::FsConfig>;
    #[allow(dead_code)]
    fn storage_s3(&self) -> Result<&stream2parquet_config::S3Config>;
}

impl StorageConfigExt for StorageConfig {
    fn storage_fs(&self) -> Result<&stream2parquet_config::FsConfig> {
        self.fs
            .as_ref()
            .ok_or_else(|| SinkError::config("fs config required for filesystem backend"))
    }

    fn storage_s3(&self) -> Result<&stream2parquet_config::S3Config> {
        self.s3
            .as_ref()
            .ok_or_else(|| SinkError::config("s3 config required for S3 backend"))
    }
}
