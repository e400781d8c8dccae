//! Projected Parquet writer
//!
//! Buffers projected rows in memory, encodes them with `ArrowWriter` on
//! close and uploads the finished bytes to the temp path in one write.
//! Buffer-then-upload keeps the temp file all-or-nothing: a crash while
//! buffering leaves no partial object behind.

use parquet::arrow::ArrowWriter;
use tracing::debug;

use async_trait::async_trait;

use stream2parquet_core::projection::{project_schema, project_values};
use stream2parquet_core::record::SchemaRef;
use stream2parquet_core::{Record, Result, SinkError, Value};
use stream2parquet_storage::Store;

use crate::encode::rows_to_batch;
use crate::properties::writer_properties;
use crate::provider::{RecordWriter, RecordWriterProvider};

/// Provider for the Parquet target format.
pub struct ParquetRecordWriterProvider;

impl RecordWriterProvider for ParquetRecordWriterProvider {
    fn file_extension(&self) -> &'static str {
        ".parquet"
    }

    fn create_writer(
        &self,
        store: &Store,
        path: &str,
        sample: &Record,
        partition_fields: &[String],
    ) -> Result<Box<dyn RecordWriter>> {
        Ok(Box::new(ProjectedParquetWriter::new(
            store.clone(),
            path,
            sample.schema(),
            partition_fields,
        )))
    }
}

/// Writer bound to one temp file with partition fields projected out.
pub struct ProjectedParquetWriter {
    store: Store,
    path: String,
    projected: SchemaRef,
    rows: Vec<Vec<Value>>,
    closed: bool,
}

impl ProjectedParquetWriter {
    pub fn new(
        store: Store,
        path: &str,
        schema: &SchemaRef,
        partition_fields: &[String],
    ) -> Self {
        let projected = project_schema(schema, partition_fields);
        Self {
            store,
            path: path.to_string(),
            projected,
            rows: Vec::new(),
            closed: false,
        }
    }

    pub fn projected_schema(&self) -> &SchemaRef {
        &self.projected
    }

    pub fn temp_path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl RecordWriter for ProjectedParquetWriter {
    fn write(&mut self, record: &Record) -> Result<()> {
        if self.closed {
            return Err(SinkError::format(format!(
                "write to '{}' after close",
                self.path
            )));
        }
        let row = project_values(record, &self.projected)?;
        self.rows.push(row);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // No reuse after a failed close either; the orchestrator
        // abandons the file.
        self.closed = true;

        let batch = rows_to_batch(&self.projected, &self.rows)?;

        let mut buffer = Vec::new();
        let props = writer_properties().clone();
        let mut arrow_writer =
            ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
                .map_err(|e| SinkError::format(format!("failed to open parquet writer: {}", e)))?;
        arrow_writer
            .write(&batch)
            .map_err(|e| SinkError::format(format!("failed to encode parquet: {}", e)))?;
        arrow_writer
            .close()
            .map_err(|e| SinkError::format(format!("failed to finalize parquet: {}", e)))?;

        let bytes = buffer.len();
        self.store.write(&self.path, buffer).await?;
        debug!(
            path = %self.path,
            rows = self.rows.len(),
            bytes,
            "finalized temp parquet file"
        );
        Ok(())
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};
    use bytes::Bytes;
    use opendal::{services, Operator};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::sync::Arc;
    use stream2parquet_config::CommitMode;

    fn memory_store() -> Store {
        let op = Operator::new(services::Memory::default()).unwrap().finish();
        Store::new(op, CommitMode::CopyVerify)
    }

    fn sample_record(offset: u64) -> Record {
        let schema = Arc::new(Schema::new(vec![
            Field::new("region", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("count", DataType::Int64, true),
        ]));
        Record::new(
            schema,
            vec![
                Value::Str("eu".into()),
                Value::Str("widget".into()),
                Value::Int(offset as i64),
            ],
            offset,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_writes_projected_parquet() {
        let store = memory_store();
        let record = sample_record(0);
        let provider = ParquetRecordWriterProvider;
        let mut writer = provider
            .create_writer(&store, "tmp/file.parquet", &record, &["region".to_string()])
            .unwrap();

        writer.write(&record).unwrap();
        writer.write(&sample_record(1)).unwrap();
        assert_eq!(writer.row_count(), 2);
        writer.close().await.unwrap();

        let bytes = store.read("tmp/file.parquet").await.unwrap();
        assert_eq!(&bytes[0..4], b"PAR1");

        // Partition field is projected out of the stored schema
        let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes)).unwrap();
        let names: Vec<String> = reader
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["name", "count"]);
    }

    #[tokio::test]
    async fn test_write_after_close_is_error() {
        let store = memory_store();
        let record = sample_record(0);
        let mut writer =
            ProjectedParquetWriter::new(store, "tmp/file.parquet", record.schema(), &[]);

        writer.write(&record).unwrap();
        writer.close().await.unwrap();

        let err = writer.write(&record).unwrap_err();
        assert!(matches!(err, SinkError::Format(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = memory_store();
        let record = sample_record(0);
        let mut writer =
            ProjectedParquetWriter::new(store, "tmp/file.parquet", record.schema(), &[]);
        writer.write(&record).unwrap();
        writer.close().await.unwrap();
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_projection_keeps_schema() {
        let store = memory_store();
        let record = sample_record(0);
        let writer =
            ProjectedParquetWriter::new(store, "tmp/file.parquet", record.schema(), &[]);
        assert_eq!(writer.projected_schema(), record.schema());
    }
}
