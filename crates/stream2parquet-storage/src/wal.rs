//! Per-shard write-ahead log
//!
//! The WAL is the source of truth for which final files exist: the
//! store's own directory listing is not trusted after a crash until it
//! has been reconciled against the log. Entries are serialized JSON, one
//! object per zero-padded sequence-numbered file under the shard's log
//! directory. Writing a whole object per append keeps appends atomic as
//! a unit on stores that have no append primitive: a torn entry cannot
//! be observed, the object is either there or not.
//!
//! Commit ordering: `BeginCommit` is durable before the store-level
//! commit runs, and `Commit` is appended only after it succeeds. A crash
//! between the two is resolved by replay on the next open.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stream2parquet_core::{Result, ShardId, SinkError};

use crate::store::Store;

const WAL_EXTENSION: &str = ".wal";

/// Lifecycle operation recorded for a commit unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalOp {
    BeginCommit,
    Commit,
    Truncate,
}

/// One WAL entry: a commit-unit transition plus the logical offset range
/// the unit covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub op: WalOp,
    #[serde(default)]
    pub temp_path: String,
    #[serde(default)]
    pub final_path: String,
    #[serde(default)]
    pub start_offset: u64,
    #[serde(default)]
    pub end_offset: u64,
}

impl WalEntry {
    pub fn begin_commit(
        temp_path: impl Into<String>,
        final_path: impl Into<String>,
        start_offset: u64,
        end_offset: u64,
    ) -> Self {
        Self {
            op: WalOp::BeginCommit,
            temp_path: temp_path.into(),
            final_path: final_path.into(),
            start_offset,
            end_offset,
        }
    }

    pub fn commit(
        temp_path: impl Into<String>,
        final_path: impl Into<String>,
        start_offset: u64,
        end_offset: u64,
    ) -> Self {
        Self {
            op: WalOp::Commit,
            temp_path: temp_path.into(),
            final_path: final_path.into(),
            start_offset,
            end_offset,
        }
    }

    fn truncate_marker() -> Self {
        Self {
            op: WalOp::Truncate,
            temp_path: String::new(),
            final_path: String::new(),
            start_offset: 0,
            end_offset: 0,
        }
    }

    fn same_unit(&self, other: &WalEntry) -> bool {
        self.temp_path == other.temp_path && self.final_path == other.final_path
    }
}

/// Append-only log for one shard's commit units.
pub struct Wal {
    store: Store,
    log_dir: String,
    shard: ShardId,
    entries: Vec<(u64, WalEntry)>,
    next_seq: u64,
    opened: bool,
}

impl Wal {
    pub(crate) fn new(store: Store, logs_dir: &str, shard: ShardId) -> Self {
        let log_dir = format!(
            "{}/{}/{}",
            logs_dir.trim_end_matches('/'),
            shard.stream,
            shard.partition
        );
        Self {
            store,
            log_dir,
            shard,
            entries: Vec::new(),
            next_seq: 0,
            opened: false,
        }
    }

    pub fn shard(&self) -> &ShardId {
        &self.shard
    }

    /// Read all previously appended entries, in order.
    pub async fn open(&mut self) -> Result<()> {
        self.store.mkdirs(&self.log_dir).await?;

        let mut seqs = Vec::new();
        for status in self.store.list_status(&self.log_dir).await? {
            if status.is_dir {
                continue;
            }
            let Some(name) = status.path.rsplit('/').next() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(WAL_EXTENSION) else {
                warn!(shard = %self.shard, path = %status.path, "ignoring non-log file in WAL directory");
                continue;
            };
            match stem.parse::<u64>() {
                Ok(seq) => seqs.push(seq),
                Err(_) => {
                    warn!(shard = %self.shard, path = %status.path, "ignoring log file with unparsable sequence");
                }
            }
        }
        seqs.sort_unstable();

        for seq in seqs {
            let bytes = self.store.read(&self.entry_file(seq)).await?;
            let entry: WalEntry = serde_json::from_slice(&bytes).map_err(|e| {
                SinkError::io(format!(
                    "corrupt WAL entry {} for shard {}: {}",
                    seq, self.shard, e
                ))
            })?;
            self.entries.push((seq, entry));
        }

        self.next_seq = self.entries.last().map(|(seq, _)| seq + 1).unwrap_or(0);
        self.opened = true;
        debug!(shard = %self.shard, entries = self.entries.len(), "opened WAL");
        Ok(())
    }

    /// Resolve any commit unit a crash left in flight.
    ///
    /// Scans for the last `BeginCommit` with no following `Commit` for
    /// the same temp/final pair. If the temp file still exists the store
    /// commit is re-issued (it is idempotent); if only the final file
    /// exists the `Commit` entry is back-filled without re-copying; if
    /// neither exists the commit unit is lost and the shard cannot
    /// proceed.
    pub async fn recover(&mut self) -> Result<()> {
        self.require_open()?;

        let mut pending: Option<WalEntry> = None;
        for (_, entry) in &self.entries {
            match entry.op {
                WalOp::BeginCommit => pending = Some(entry.clone()),
                WalOp::Commit => {
                    if pending.as_ref().is_some_and(|p| p.same_unit(entry)) {
                        pending = None;
                    }
                }
                WalOp::Truncate => {}
            }
        }

        let Some(begin) = pending else {
            return Ok(());
        };

        if self.store.try_exists(&begin.temp_path).await? {
            self.store.commit(&begin.temp_path, &begin.final_path).await?;
            info!(
                shard = %self.shard,
                final_path = %begin.final_path,
                "re-issued interrupted commit during recovery"
            );
        } else if self.store.try_exists(&begin.final_path).await? {
            info!(
                shard = %self.shard,
                final_path = %begin.final_path,
                "final file already present; back-filling commit entry"
            );
        } else {
            return Err(SinkError::recovery(
                &self.shard,
                format!(
                    "commit unit lost: temp '{}' and final '{}' both missing",
                    begin.temp_path, begin.final_path
                ),
            ));
        }

        self.append(WalEntry::commit(
            begin.temp_path,
            begin.final_path,
            begin.start_offset,
            begin.end_offset,
        ))
        .await
    }

    /// Durably append one entry.
    ///
    /// A failure here is fatal to the shard: no record may be
    /// acknowledged without a durable log entry, so the caller must stop
    /// ingesting and surface the error.
    pub async fn append(&mut self, entry: WalEntry) -> Result<()> {
        self.require_open()?;
        let seq = self.next_seq;
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| SinkError::io(format!("failed to serialize WAL entry: {}", e)))?;
        self.store.write(&self.entry_file(seq), bytes).await?;
        self.entries.push((seq, entry));
        self.next_seq = seq + 1;
        Ok(())
    }

    /// Compact away entries no longer needed for recovery.
    ///
    /// Keeps everything from the most recent matched
    /// `BeginCommit`/`Commit` pair onward; that pair is only released
    /// once a newer one supersedes it. A no-op until a pair exists.
    pub async fn truncate(&mut self) -> Result<()> {
        self.require_open()?;

        let mut last_begin: Option<usize> = None;
        let mut keep_from: Option<usize> = None;
        for (idx, (_, entry)) in self.entries.iter().enumerate() {
            match entry.op {
                WalOp::BeginCommit => last_begin = Some(idx),
                WalOp::Commit => {
                    if let Some(begin_idx) = last_begin {
                        if self.entries[begin_idx].1.same_unit(entry) {
                            keep_from = Some(begin_idx);
                            last_begin = None;
                        }
                    }
                }
                WalOp::Truncate => {}
            }
        }

        let Some(cut) = keep_from else {
            return Ok(());
        };
        if cut == 0 {
            return Ok(());
        }

        for (seq, _) in &self.entries[..cut] {
            self.store.delete(&self.entry_file(*seq), false).await?;
        }
        let dropped = cut;
        self.entries.drain(..cut);
        self.append(WalEntry::truncate_marker()).await?;
        debug!(shard = %self.shard, dropped, "truncated WAL");
        Ok(())
    }

    /// Highest logical offset covered by a durable `Commit` entry.
    pub fn last_committed_offset(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter(|(_, e)| e.op == WalOp::Commit)
            .map(|(_, e)| e.end_offset)
            .max()
    }

    /// Entries currently in the log, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &WalEntry> {
        self.entries.iter().map(|(_, e)| e)
    }

    fn entry_file(&self, seq: u64) -> String {
        format!("{}/{:020}{}", self.log_dir, seq, WAL_EXTENSION)
    }

    fn require_open(&self) -> Result<()> {
        if self.opened {
            Ok(())
        } else {
            Err(SinkError::io(format!(
                "WAL for shard {} used before open",
                self.shard
            )))
        }
    }
}
