//! Record writer trait and provider registry
//!
//! Providers are resolved per target format through a typed registry,
//! once, at configuration time. An unknown format is a fatal
//! configuration error.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use stream2parquet_core::{Record, Result, SinkError};
use stream2parquet_storage::Store;

use crate::parquet::ParquetRecordWriterProvider;

/// Per-file writer bound to a temp path and a projected schema.
#[async_trait]
pub trait RecordWriter: Send {
    /// Project the record onto the derived schema and buffer it.
    fn write(&mut self, record: &Record) -> Result<()>;

    /// Flush and finalize the file at its temp path. After a successful
    /// close the file is structurally complete and readable; only then
    /// may the commit protocol run on it.
    async fn close(&mut self) -> Result<()>;

    /// Records buffered or written so far.
    fn row_count(&self) -> usize;
}

/// Factory for record writers of one target format.
pub trait RecordWriterProvider: Send + Sync {
    /// Extension for files of this format, including the dot.
    fn file_extension(&self) -> &'static str;

    /// Open a writer for one temp file. The sample record supplies the
    /// schema; `partition_fields` are projected out of it.
    fn create_writer(
        &self,
        store: &Store,
        path: &str,
        sample: &Record,
        partition_fields: &[String],
    ) -> Result<Box<dyn RecordWriter>>;
}

impl std::fmt::Debug for dyn RecordWriterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriterProvider")
            .field("file_extension", &self.file_extension())
            .finish_non_exhaustive()
    }
}

/// Registry mapping format names to writer providers.
pub struct WriterProviderRegistry {
    providers: BTreeMap<String, Arc<dyn RecordWriterProvider>>,
}

impl WriterProviderRegistry {
    /// Registry with the built-in formats registered.
    pub fn builtin() -> Self {
        let mut registry = Self {
            providers: BTreeMap::new(),
        };
        registry.register("parquet", Arc::new(ParquetRecordWriterProvider));
        registry
    }

    pub fn register(&mut self, format: impl Into<String>, provider: Arc<dyn RecordWriterProvider>) {
        self.providers.insert(format.into(), provider);
    }

    /// Resolve a format name. Unknown formats fail at setup, never
    /// mid-stream.
    pub fn resolve(&self, format: &str) -> Result<Arc<dyn RecordWriterProvider>> {
        self.providers.get(format).cloned().ok_or_else(|| {
            SinkError::config(format!(
                "unknown writer format '{}' (registered: {})",
                format,
                self.providers
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parquet_provider_registered() {
        let registry = WriterProviderRegistry::builtin();
        let provider = registry.resolve("parquet").unwrap();
        assert_eq!(provider.file_extension(), ".parquet");
    }

    #[test]
    fn test_unknown_format_is_config_error() {
        let registry = WriterProviderRegistry::builtin();
        let err = registry.resolve("orc").unwrap_err();
        assert!(matches!(err, SinkError::Config(_)));
    }
}
