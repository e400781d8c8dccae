//! Partition functions
//!
//! A partition function maps a record to a path segment and declares which
//! record fields it consumed. The composite function chains an ordered
//! list of children so orthogonal axes (a schema-derived key, a time
//! bucket) combine without knowing about each other.

use chrono::{DateTime, Utc};

use crate::error::{Result, SinkError};
use crate::record::{Record, Value};

/// Pure mapping from a record to a partition path segment.
pub trait Partitioner: Send + Sync {
    /// Encode the record's partition segment. Deterministic for a fixed
    /// configuration and record.
    fn encode_partition(&self, record: &Record) -> Result<String>;

    /// Record fields consumed by partitioning; these are projected out of
    /// the stored schema.
    fn partition_fields(&self) -> &[String];

    /// Destination directory for a shard's stream and an encoded segment.
    fn generate_path(&self, stream: &str, encoded: &str) -> String {
        if encoded.is_empty() {
            // Legal with an empty child list: the path degenerates to the
            // stream name alone.
            stream.to_string()
        } else {
            format!("{}/{}", stream, encoded)
        }
    }
}

/// Sanitize a value for use as a path segment.
///
/// Replaces special characters with underscores to ensure valid paths.
fn sanitize_segment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '=' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Partitions by the value of a single record field.
pub struct FieldPartitioner {
    fields: Vec<String>,
}

impl FieldPartitioner {
    pub fn new(field_name: impl Into<String>) -> Result<Self> {
        let field_name = field_name.into();
        if field_name.is_empty() {
            return Err(SinkError::config("field partitioner requires a field name"));
        }
        Ok(Self {
            fields: vec![field_name],
        })
    }

    fn field_name(&self) -> &str {
        &self.fields[0]
    }
}

impl Partitioner for FieldPartitioner {
    fn encode_partition(&self, record: &Record) -> Result<String> {
        let value = record.get(self.field_name()).ok_or_else(|| {
            SinkError::format(format!(
                "record has no partition field '{}'",
                self.field_name()
            ))
        })?;
        Ok(sanitize_segment(&value.to_segment()?))
    }

    fn partition_fields(&self) -> &[String] {
        &self.fields
    }
}

/// Partitions by a time bucket rendered with a chrono format string.
///
/// The bucket comes from a configured timestamp field when one is given,
/// otherwise from the wall clock. The partitioner declares no record
/// fields: a timestamp read for bucketing stays in the stored schema.
pub struct TimeBucketPartitioner {
    format: String,
    timestamp_field: Option<String>,
    fields: Vec<String>,
}

impl TimeBucketPartitioner {
    pub fn new(format: impl Into<String>, timestamp_field: Option<String>) -> Result<Self> {
        let format = format.into();
        if format.is_empty() {
            return Err(SinkError::config("time bucket partitioner requires a format"));
        }
        // Reject bad strftime specifiers at configuration time; a broken
        // format must not surface per-record.
        chrono::format::StrftimeItems::new(&format)
            .parse()
            .map_err(|e| {
                SinkError::config(format!("invalid time bucket format '{}': {}", format, e))
            })?;
        Ok(Self {
            format,
            timestamp_field,
            fields: Vec::new(),
        })
    }

    fn bucket_time(&self, record: &Record) -> Result<DateTime<Utc>> {
        let Some(field) = &self.timestamp_field else {
            return Ok(Utc::now());
        };
        let value = record.get(field).ok_or_else(|| {
            SinkError::format(format!("record has no timestamp field '{}'", field))
        })?;
        let nanos = match value {
            Value::TimestampNanos(ns) => *ns,
            Value::Int(ns) => *ns,
            other => {
                return Err(SinkError::format(format!(
                    "timestamp field '{}' has non-timestamp value {:?}",
                    field, other
                )))
            }
        };
        let secs = nanos.div_euclid(1_000_000_000);
        let subsec = nanos.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, subsec).ok_or_else(|| {
            SinkError::format(format!("timestamp {} out of range in field '{}'", nanos, field))
        })
    }
}

impl Partitioner for TimeBucketPartitioner {
    fn encode_partition(&self, record: &Record) -> Result<String> {
        let dt = self.bucket_time(record)?;
        Ok(dt.format(&self.format).to_string())
    }

    fn partition_fields(&self) -> &[String] {
        &self.fields
    }
}

/// Ordered composition of child partition functions.
///
/// Encoding joins each child's segment with `/` in configured order;
/// declared fields are the union of the children's, first occurrence
/// winning on case-insensitive duplicates.
pub struct CompositePartitioner {
    children: Vec<Box<dyn Partitioner>>,
    fields: Vec<String>,
}

impl std::fmt::Debug for CompositePartitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositePartitioner")
            .field("children", &self.children.len())
            .field("fields", &self.fields)
            .finish()
    }
}

impl CompositePartitioner {
    pub fn new(children: Vec<Box<dyn Partitioner>>) -> Self {
        let mut fields: Vec<String> = Vec::new();
        for child in &children {
            for name in child.partition_fields() {
                if !fields.iter().any(|f| f.eq_ignore_ascii_case(name)) {
                    fields.push(name.clone());
                }
            }
        }
        Self { children, fields }
    }

    pub fn children(&self) -> usize {
        self.children.len()
    }
}

impl Partitioner for CompositePartitioner {
    fn encode_partition(&self, record: &Record) -> Result<String> {
        let segments = self
            .children
            .iter()
            .map(|child| child.encode_partition(record))
            .collect::<Result<Vec<_>>>()?;
        Ok(segments.join("/"))
    }

    fn partition_fields(&self) -> &[String] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
    use std::sync::Arc;

    fn record_with_region() -> Record {
        let schema = Arc::new(Schema::new(vec![
            Field::new("region", DataType::Utf8, false),
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Nanosecond, None),
                false,
            ),
        ]));
        Record::new(
            schema,
            vec![
                Value::Str("eu".into()),
                // 2024-01-15 14:30:00 UTC
                Value::TimestampNanos(1_705_327_800_000_000_000),
            ],
            0,
        )
        .unwrap()
    }

    #[test]
    fn test_field_partitioner_encodes_and_declares() {
        let p = FieldPartitioner::new("region").unwrap();
        assert_eq!(p.encode_partition(&record_with_region()).unwrap(), "eu");
        assert_eq!(p.partition_fields(), &["region".to_string()]);
    }

    #[test]
    fn test_time_bucket_uses_record_timestamp() {
        let p = TimeBucketPartitioner::new("%Y-%m", Some("ts".to_string())).unwrap();
        assert_eq!(p.encode_partition(&record_with_region()).unwrap(), "2024-01");
        assert!(p.partition_fields().is_empty());
    }

    #[test]
    fn test_time_bucket_rejects_bad_format() {
        assert!(TimeBucketPartitioner::new("%Q-nope", None).is_err());
    }

    #[test]
    fn test_two_level_composite() {
        let composite = CompositePartitioner::new(vec![
            Box::new(FieldPartitioner::new("region").unwrap()),
            Box::new(TimeBucketPartitioner::new("%Y-%m", Some("ts".to_string())).unwrap()),
        ]);

        let encoded = composite.encode_partition(&record_with_region()).unwrap();
        assert_eq!(encoded, "eu/2024-01");
        assert_eq!(composite.partition_fields(), &["region".to_string()]);
        assert_eq!(composite.generate_path("orders", &encoded), "orders/eu/2024-01");
    }

    #[test]
    fn test_composite_encode_is_deterministic() {
        let composite = CompositePartitioner::new(vec![
            Box::new(FieldPartitioner::new("region").unwrap()),
            Box::new(TimeBucketPartitioner::new("%Y-%m", Some("ts".to_string())).unwrap()),
        ]);
        let record = record_with_region();
        let first = composite.encode_partition(&record).unwrap();
        let second = composite.encode_partition(&record).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_child_list_degenerates_to_stream_name() {
        let composite = CompositePartitioner::new(Vec::new());
        let encoded = composite.encode_partition(&record_with_region()).unwrap();
        assert_eq!(encoded, "");
        assert_eq!(composite.generate_path("orders", &encoded), "orders");
        assert!(composite.partition_fields().is_empty());
    }

    #[test]
    fn test_segment_sanitized() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "region",
            DataType::Utf8,
            false,
        )]));
        let record = Record::new(schema, vec![Value::Str("eu west/1".into())], 0).unwrap();
        let p = FieldPartitioner::new("region").unwrap();
        assert_eq!(p.encode_partition(&record).unwrap(), "eu_west_1");
    }
}
