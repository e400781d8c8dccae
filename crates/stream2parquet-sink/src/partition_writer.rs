//! Per-shard partition writer
//!
//! Strictly sequential within a shard: record ingestion, rotation, WAL
//! append and store commit happen in program order, because the WAL's
//! ordering guarantee depends on it. Exclusive shard ownership is the
//! upstream assignment mechanism's job and is assumed here.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use stream2parquet_config::SinkConfig;
use stream2parquet_core::{
    Partitioner, PartitionerRegistry, Record, Result, ShardId, SinkError,
};
use stream2parquet_storage::{Store, Wal, WalEntry};
use stream2parquet_writer::{RecordWriter, RecordWriterProvider, WriterProviderRegistry};

/// Layout and rotation settings for one shard.
#[derive(Debug, Clone)]
pub struct PartitionWriterOptions {
    /// Root directory for committed data files
    pub topics_dir: String,
    /// Root directory for per-shard WALs
    pub logs_dir: String,
    /// Records per file before the commit protocol runs
    pub flush_size: usize,
}

struct OpenFile {
    writer: Box<dyn RecordWriter>,
    temp_path: String,
    start_offset: u64,
    end_offset: u64,
}

/// Orchestrator for one shard's files and commits.
pub struct PartitionWriter {
    shard: ShardId,
    store: Store,
    wal: Wal,
    partitioner: Arc<dyn Partitioner>,
    provider: Arc<dyn RecordWriterProvider>,
    options: PartitionWriterOptions,
    open_files: HashMap<String, OpenFile>,
    safe_offset: Option<u64>,
    /// Lowest start offset among aborted files. Their records were
    /// dropped, so the safe offset must stay below this until the shard
    /// is reopened and upstream re-delivers them.
    watermark_cap: Option<u64>,
    ready: bool,
}

impl std::fmt::Debug for PartitionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionWriter")
            .field("shard", &self.shard)
            .field("options", &self.options)
            .field("safe_offset", &self.safe_offset)
            .field("watermark_cap", &self.watermark_cap)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl PartitionWriter {
    pub fn new(
        store: Store,
        shard: ShardId,
        partitioner: Arc<dyn Partitioner>,
        provider: Arc<dyn RecordWriterProvider>,
        options: PartitionWriterOptions,
    ) -> Self {
        let wal = store.open_wal(&options.logs_dir, &shard);
        Self {
            shard,
            store,
            wal,
            partitioner,
            provider,
            options,
            open_files: HashMap::new(),
            safe_offset: None,
            watermark_cap: None,
            ready: false,
        }
    }

    /// Assemble a shard writer from validated configuration.
    ///
    /// Partitioner and format names resolve through the registries here,
    /// so a bad type name fails before the shard opens.
    pub fn from_config(store: Store, shard: ShardId, config: &SinkConfig) -> Result<Self> {
        let composite = PartitionerRegistry::builtin().build_composite(&config.partitioners)?;
        let provider = WriterProviderRegistry::builtin().resolve(&config.format)?;
        Ok(Self::new(
            store,
            shard,
            Arc::new(composite),
            provider,
            PartitionWriterOptions {
                topics_dir: config.topics_dir.clone(),
                logs_dir: config.logs_dir.clone(),
                flush_size: config.rotation.flush_size,
            },
        ))
    }

    /// Open the shard: replay the WAL and resolve any commit a crash
    /// left in flight. No record is accepted until this succeeds.
    pub async fn open(&mut self) -> Result<()> {
        self.store
            .mkdirs(&format!("{}/{}", self.options.topics_dir, self.shard.stream))
            .await?;
        self.wal.open().await?;
        self.wal.recover().await?;
        self.safe_offset = self.wal.last_committed_offset();
        self.ready = true;
        info!(
            shard = %self.shard,
            safe_offset = ?self.safe_offset,
            "shard open and recovered"
        );
        Ok(())
    }

    /// Ingest one record, rotating its destination file when full.
    pub async fn write(&mut self, record: &Record) -> Result<()> {
        self.require_ready()?;

        let encoded = self.partitioner.encode_partition(record)?;

        let file = match self.open_files.entry(encoded.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let temp_path = format!(
                    "{}/{}/+tmp/{}/{}{}",
                    self.options.topics_dir,
                    self.shard.stream,
                    self.shard.partition,
                    Uuid::new_v4(),
                    self.provider.file_extension()
                );
                let writer = self.provider.create_writer(
                    &self.store,
                    &temp_path,
                    record,
                    self.partitioner.partition_fields(),
                )?;
                debug!(temp_path = %temp_path, partition = %encoded, "opened temp file");
                entry.insert(OpenFile {
                    writer,
                    temp_path,
                    start_offset: record.offset(),
                    end_offset: record.offset(),
                })
            }
        };

        if let Err(e) = file.writer.write(record) {
            // Abort the whole file: no partial commit, and the safe
            // offset never passes this file's start.
            self.abort_file(&encoded).await;
            return Err(e);
        }
        file.end_offset = record.offset();
        let rotate = file.writer.row_count() >= self.options.flush_size;

        if rotate {
            self.commit_file(&encoded).await?;
        }
        Ok(())
    }

    /// Commit every open file, releasing the shard's resources. The
    /// WAL's durable log is retained for the next open.
    pub async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.ready = false;
        info!(shard = %self.shard, safe_offset = ?self.safe_offset, "shard closed");
        Ok(())
    }

    /// Rotate every open file through the commit protocol now.
    pub async fn flush(&mut self) -> Result<()> {
        self.require_ready()?;
        let partitions: Vec<String> = self.open_files.keys().cloned().collect();
        for encoded in partitions {
            self.commit_file(&encoded).await?;
        }
        Ok(())
    }

    /// Highest logical offset whose file has a durable Commit entry,
    /// capped below the start of any aborted file. Records up to here
    /// may be acknowledged upstream.
    pub fn safe_offset(&self) -> Option<u64> {
        self.safe_offset
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    async fn commit_file(&mut self, encoded: &str) -> Result<()> {
        let Some(mut file) = self.open_files.remove(encoded) else {
            return Ok(());
        };

        let rows = file.writer.row_count();
        if let Err(e) = file.writer.close().await {
            self.cap_watermark(file.start_offset);
            self.discard_temp(&file.temp_path).await;
            return Err(e);
        }

        let dest_dir = format!(
            "{}/{}",
            self.options.topics_dir,
            self.partitioner.generate_path(&self.shard.stream, encoded)
        );
        let final_path = format!(
            "{}/{}+{}+{}+{}{}",
            dest_dir,
            self.shard.stream,
            self.shard.partition,
            file.start_offset,
            file.end_offset,
            self.provider.file_extension()
        );

        if let Err(e) = self.store.mkdirs(&dest_dir).await {
            self.cap_watermark(file.start_offset);
            self.discard_temp(&file.temp_path).await;
            return Err(e);
        }

        // BeginCommit must be durable before the store commit: a crash
        // in between is replayed on the next open.
        if let Err(e) = self
            .wal
            .append(WalEntry::begin_commit(
                &file.temp_path,
                &final_path,
                file.start_offset,
                file.end_offset,
            ))
            .await
        {
            self.halt();
            return Err(e);
        }

        // A failure here leaves the BeginCommit dangling for the next
        // open's recovery. The shard halts: committing further files
        // would let truncation drop the dangling unit.
        if let Err(e) = self.store.commit(&file.temp_path, &final_path).await {
            self.halt();
            return Err(e);
        }

        if let Err(e) = self
            .wal
            .append(WalEntry::commit(
                &file.temp_path,
                &final_path,
                file.start_offset,
                file.end_offset,
            ))
            .await
        {
            self.halt();
            return Err(e);
        }

        let advanced = self
            .safe_offset
            .map_or(file.end_offset, |o| o.max(file.end_offset));
        self.safe_offset = match self.watermark_cap {
            // Offsets at or past an aborted file's start stay
            // unacknowledged; upstream must re-deliver them.
            Some(cap) if advanced >= cap => match cap.checked_sub(1) {
                Some(capped) => Some(self.safe_offset.map_or(capped, |o| o.max(capped))),
                None => self.safe_offset,
            },
            _ => Some(advanced),
        };

        // Housekeeping only; the log stays correct without it
        if let Err(e) = self.wal.truncate().await {
            warn!(shard = %self.shard, error = %e, "WAL truncation failed");
        }

        info!(
            shard = %self.shard,
            path = %final_path,
            rows,
            start_offset = file.start_offset,
            end_offset = file.end_offset,
            "committed file"
        );
        Ok(())
    }

    async fn abort_file(&mut self, encoded: &str) {
        if let Some(file) = self.open_files.remove(encoded) {
            self.cap_watermark(file.start_offset);
            self.discard_temp(&file.temp_path).await;
        }
    }

    fn cap_watermark(&mut self, start_offset: u64) {
        self.watermark_cap = Some(
            self.watermark_cap
                .map_or(start_offset, |cap| cap.min(start_offset)),
        );
    }

    /// A durable-log or store-commit failure stops ingestion; the shard
    /// rejects writes until a new open replays the WAL.
    fn halt(&mut self) {
        self.ready = false;
        warn!(shard = %self.shard, "shard halted after commit failure");
    }

    async fn discard_temp(&self, temp_path: &str) {
        // The temp file may never have been materialized; best effort
        if let Err(e) = self.store.delete(temp_path, false).await {
            warn!(shard = %self.shard, temp_path, error = %e, "failed to delete abandoned temp file");
        }
    }

    fn require_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(SinkError::io(format!(
                "shard {} is not open for writes",
                self.shard
            )))
        }
    }
}
