//! Parquet tuning shared by every file the sink produces.

use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use std::sync::OnceLock;

/// Shared writer properties, built once.
///
/// ZSTD at a low level keeps encode cost predictable on the ingestion
/// path; dictionary encoding and page statistics do the heavy lifting
/// for the repetitive columns partitioned streams tend to carry.
pub fn writer_properties() -> &'static WriterProperties {
    static PROPERTIES: OnceLock<WriterProperties> = OnceLock::new();
    PROPERTIES.get_or_init(|| {
        let zstd = ZstdLevel::try_new(2).unwrap_or_default();
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(zstd))
            .set_dictionary_enabled(true)
            .set_dictionary_page_size_limit(128 * 1024)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_data_page_size_limit(256 * 1024)
            .set_write_batch_size(32 * 1024)
            // Small row groups so query engines can prune against the
            // page statistics without reading whole files
            .set_max_row_group_size(32 * 1024)
            .build()
    })
}
