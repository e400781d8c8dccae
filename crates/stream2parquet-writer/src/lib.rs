// stream2parquet-writer - Format-aware record writers
//
// A record writer is bound to one temp file and a schema with the
// partition fields projected out. It buffers records, encodes them on
// close into a structurally complete file at the temp path, and never
// moves the file to its final name: that is strictly the commit
// protocol's job.

mod encode;
mod parquet;
mod properties;
mod provider;

pub use parquet::{ParquetRecordWriterProvider, ProjectedParquetWriter};
pub use properties::writer_properties;
pub use provider::{RecordWriter, RecordWriterProvider, WriterProviderRegistry};
