// stream2parquet-core - Platform-agnostic core logic
//
// This crate contains the PURE logic of the sink: the record model,
// schema projection and the partitioning scheme. No I/O, no async,
// no runtime dependencies. Storage and encoding live in the
// stream2parquet-storage and stream2parquet-writer crates.

pub mod error;
pub mod partition;
pub mod projection;
pub mod record;
pub mod registry;

// Re-export commonly used types
pub use error::{Result, SinkError};
pub use partition::{CompositePartitioner, FieldPartitioner, Partitioner, TimeBucketPartitioner};
pub use projection::project_schema;
pub use record::{Record, ShardId, Value};
pub use registry::{PartitionerRegistry, PartitionerSpec};
