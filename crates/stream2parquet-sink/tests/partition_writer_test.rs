// End-to-end shard tests against an in-memory store

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use opendal::{services, Operator};

use stream2parquet_config::{CommitMode, SinkConfig};
use stream2parquet_core::record::SchemaRef;
use stream2parquet_core::{Record, ShardId, SinkError, Value};
use stream2parquet_sink::{PartitionWriter, Store};
use stream2parquet_storage::WalEntry;

fn memory_store() -> Store {
    let op = Operator::new(services::Memory::default()).unwrap().finish();
    Store::new(op, CommitMode::CopyVerify)
}

fn fs_store() -> Store {
    let root = std::env::temp_dir().join(format!("s2p-sink-{}", uuid::Uuid::new_v4()));
    let builder = services::Fs::default().root(root.to_str().unwrap());
    Store::new(Operator::new(builder).unwrap().finish(), CommitMode::CopyVerify)
}

fn test_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("ts", DataType::Timestamp(TimeUnit::Nanosecond, None), false),
        Field::new("name", DataType::Utf8, false),
        Field::new("count", DataType::Int64, true),
    ]))
}

fn record(region: &str, offset: u64) -> Record {
    Record::new(
        test_schema(),
        vec![
            Value::Str(region.to_string()),
            // 2024-01-15 14:30:00 UTC
            Value::TimestampNanos(1_705_327_800_000_000_000),
            Value::Str(format!("item-{}", offset)),
            Value::Int(offset as i64),
        ],
        offset,
    )
    .unwrap()
}

/// A record that routes to the given region but lacks the `name` field
/// the projected schema requires, so the active writer rejects it.
fn narrow_record(region: &str, offset: u64) -> Record {
    let schema = Arc::new(Schema::new(vec![
        Field::new("region", DataType::Utf8, false),
        Field::new("ts", DataType::Timestamp(TimeUnit::Nanosecond, None), false),
    ]));
    Record::new(
        schema,
        vec![
            Value::Str(region.to_string()),
            Value::TimestampNanos(1_705_327_800_000_000_000),
        ],
        offset,
    )
    .unwrap()
}

fn sink_config(flush_size: usize) -> SinkConfig {
    SinkConfig::from_toml(&format!(
        r#"
        [storage]
        backend = "fs"
        commit_mode = "copy_verify"
        fs = {{ root = "/unused" }}

        [rotation]
        flush_size = {}

        [[partitioners]]
        type = "field"
        config = {{ "field.name" = "region" }}

        [[partitioners]]
        type = "time_bucket"
        config = {{ "bucket.format" = "%Y-%m", "bucket.field" = "ts" }}
        "#,
        flush_size
    ))
    .unwrap()
}

async fn open_writer(store: &Store, flush_size: usize) -> PartitionWriter {
    let config = sink_config(flush_size);
    let mut writer =
        PartitionWriter::from_config(store.clone(), ShardId::new("orders", 0), &config).unwrap();
    writer.open().await.unwrap();
    writer
}

#[tokio::test]
async fn test_rotation_commits_partitioned_file() {
    let store = memory_store();
    let mut writer = open_writer(&store, 2).await;

    writer.write(&record("eu", 0)).await.unwrap();
    assert_eq!(writer.safe_offset(), None);
    writer.write(&record("eu", 1)).await.unwrap();

    // Rotation at two records drove the commit protocol
    assert_eq!(writer.safe_offset(), Some(1));

    let final_path = "topics/orders/eu/2024-01/orders+0+0+1.parquet";
    let bytes = store.read(final_path).await.unwrap();
    assert_eq!(&bytes[0..4], b"PAR1");

    // Temp directory drained after commit
    let leftovers = match store
        .list_status_filtered("topics/orders/+tmp/0", |s| !s.is_dir)
        .await
    {
        Ok(entries) => entries,
        Err(SinkError::NotFound(_)) => Vec::new(),
        Err(e) => panic!("listing temp dir failed: {}", e),
    };
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn test_records_route_to_separate_partitions() {
    let store = memory_store();
    let mut writer = open_writer(&store, 2).await;

    writer.write(&record("eu", 0)).await.unwrap();
    writer.write(&record("us", 1)).await.unwrap();
    writer.write(&record("us", 2)).await.unwrap();

    // Only the us file is full
    assert!(store
        .try_exists("topics/orders/us/2024-01/orders+0+1+2.parquet")
        .await
        .unwrap());
    assert_eq!(writer.safe_offset(), Some(2));

    writer.write(&record("eu", 3)).await.unwrap();
    assert!(store
        .try_exists("topics/orders/eu/2024-01/orders+0+0+3.parquet")
        .await
        .unwrap());
    assert_eq!(writer.safe_offset(), Some(3));
}

#[tokio::test]
async fn test_close_drains_open_files() {
    let store = memory_store();
    let mut writer = open_writer(&store, 100).await;

    writer.write(&record("eu", 0)).await.unwrap();
    writer.close().await.unwrap();

    assert!(store
        .try_exists("topics/orders/eu/2024-01/orders+0+0+0.parquet")
        .await
        .unwrap());
    assert_eq!(writer.safe_offset(), Some(0));

    // Closed shard rejects further records
    assert!(writer.write(&record("eu", 1)).await.is_err());
}

#[tokio::test]
async fn test_recovery_finishes_interrupted_commit() {
    let store = memory_store();

    // Simulate a crash between BeginCommit and the store commit: the
    // temp file exists and the WAL records the in-flight unit.
    let temp_path = "topics/orders/+tmp/0/dangling.parquet";
    let final_path = "topics/orders/eu/2024-01/orders+0+5+9.parquet";
    store.write(temp_path, b"stub-bytes".to_vec()).await.unwrap();

    let shard = ShardId::new("orders", 0);
    let mut wal = store.open_wal("logs", &shard);
    wal.open().await.unwrap();
    wal.append(WalEntry::begin_commit(temp_path, final_path, 5, 9))
        .await
        .unwrap();
    drop(wal);

    // Reopening the shard replays the WAL before accepting records
    let writer = open_writer(&store, 10).await;
    assert_eq!(writer.safe_offset(), Some(9));
    assert_eq!(store.read(final_path).await.unwrap(), b"stub-bytes");
    assert!(!store.try_exists(temp_path).await.unwrap());
}

#[tokio::test]
async fn test_recovery_failure_blocks_shard() {
    let store = memory_store();

    let shard = ShardId::new("orders", 0);
    let mut wal = store.open_wal("logs", &shard);
    wal.open().await.unwrap();
    // Commit unit whose temp and final file are both gone
    wal.append(WalEntry::begin_commit("gone.tmp", "gone.parquet", 0, 0))
        .await
        .unwrap();
    drop(wal);

    let config = sink_config(10);
    let mut writer = PartitionWriter::from_config(store, shard, &config).unwrap();
    let err = writer.open().await.unwrap_err();
    assert!(matches!(err, SinkError::Recovery { .. }));

    // Startup aborted: the shard takes no records
    assert!(writer.write(&record("eu", 0)).await.is_err());
}

#[tokio::test]
async fn test_ingestion_error_abandons_file() {
    let store = memory_store();
    let mut writer = open_writer(&store, 10).await;

    writer.write(&record("eu", 0)).await.unwrap();

    // Same partition, but the record no longer carries a projected field
    let err = writer.write(&narrow_record("eu", 1)).await.unwrap_err();
    assert!(matches!(err, SinkError::Format(_)));

    // The file was abandoned, never committed
    assert_eq!(writer.safe_offset(), None);
    let committed = store.exists("topics/orders/eu/2024-01").await;
    assert!(!committed);
}

#[tokio::test]
async fn test_watermark_stays_below_aborted_file_start() {
    let store = memory_store();
    let mut writer = open_writer(&store, 2).await;

    // The eu file starts at offset 0 and is aborted before rotating
    writer.write(&record("eu", 0)).await.unwrap();
    assert!(writer.write(&narrow_record("eu", 1)).await.is_err());

    // A later commit for a different partition succeeds on the store
    writer.write(&record("us", 2)).await.unwrap();
    writer.write(&record("us", 3)).await.unwrap();
    assert!(store
        .try_exists("topics/orders/us/2024-01/orders+0+2+3.parquet")
        .await
        .unwrap());

    // The dropped eu records were never stored, so nothing at or past
    // their start offset may be acknowledged upstream
    assert_eq!(writer.safe_offset(), None);

    writer.close().await.unwrap();
    assert_eq!(writer.safe_offset(), None);
}

#[tokio::test]
async fn test_commit_failure_halts_shard() {
    let store = fs_store();
    let config = SinkConfig::from_toml(
        r#"
        [storage]
        backend = "fs"
        commit_mode = "copy_verify"
        fs = { root = "/unused" }

        [rotation]
        flush_size = 1
        "#,
    )
    .unwrap();

    // A directory squatting on the final path makes the store commit fail
    store
        .mkdirs("topics/orders/orders+0+0+0.parquet")
        .await
        .unwrap();

    let mut writer =
        PartitionWriter::from_config(store.clone(), ShardId::new("orders", 0), &config).unwrap();
    writer.open().await.unwrap();

    assert!(writer.write(&record("eu", 0)).await.is_err());
    assert_eq!(writer.safe_offset(), None);

    // The BeginCommit is dangling; the shard takes no further records
    // until a new open runs recovery
    assert!(writer.write(&record("eu", 1)).await.is_err());
    assert!(writer.flush().await.is_err());
}

#[tokio::test]
async fn test_empty_partitioner_list_uses_stream_root() {
    let store = memory_store();
    let config = SinkConfig::from_toml(
        r#"
        [storage]
        backend = "fs"
        commit_mode = "copy_verify"
        fs = { root = "/unused" }

        [rotation]
        flush_size = 1
        "#,
    )
    .unwrap();

    let mut writer =
        PartitionWriter::from_config(store.clone(), ShardId::new("orders", 0), &config).unwrap();
    writer.open().await.unwrap();
    writer.write(&record("eu", 0)).await.unwrap();

    // No partition segments: the destination collapses to the stream name
    assert!(store
        .try_exists("topics/orders/orders+0+0+0.parquet")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unknown_partitioner_type_fails_setup() {
    let store = memory_store();
    let config = SinkConfig::from_toml(
        r#"
        [storage]
        backend = "fs"
        fs = { root = "/unused" }

        [[partitioners]]
        type = "mystery"
        "#,
    )
    .unwrap();

    let err = PartitionWriter::from_config(store, ShardId::new("orders", 0), &config).unwrap_err();
    assert!(matches!(err, SinkError::Config(_)));
}

#[tokio::test]
async fn test_safe_offset_survives_reopen() {
    let store = memory_store();
    let mut writer = open_writer(&store, 1).await;
    writer.write(&record("eu", 0)).await.unwrap();
    writer.write(&record("eu", 1)).await.unwrap();
    writer.close().await.unwrap();

    let reopened = open_writer(&store, 1).await;
    assert_eq!(reopened.safe_offset(), Some(1));
}
