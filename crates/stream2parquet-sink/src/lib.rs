// stream2parquet-sink - Shard orchestration
//
// One `PartitionWriter` owns one shard: its WAL, and one active record
// writer per partitioned destination directory. It drives the commit
// protocol (BeginCommit -> store commit -> Commit) and tracks the safe
// offset the upstream consumer may acknowledge.

mod partition_writer;

pub use partition_writer::{PartitionWriter, PartitionWriterOptions};

// The types callers need to assemble a shard
pub use stream2parquet_core::{Partitioner, Record, ShardId, SinkError, Value};
pub use stream2parquet_storage::Store;
pub use stream2parquet_writer::WriterProviderRegistry;
