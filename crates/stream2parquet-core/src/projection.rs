//! Schema projection
//!
//! Partition fields are consumed to compute the partition path and are
//! projected out of the persisted schema: the derived schema is the
//! original minus the partition fields (matched case-insensitively), with
//! the remaining fields' order, type and metadata preserved exactly.

use std::sync::Arc;

use arrow::datatypes::{FieldRef, Schema};

use crate::error::{Result, SinkError};
use crate::record::{Record, SchemaRef, Value};

/// Derive the stored schema by removing partition fields.
///
/// An empty `partition_fields` set yields the input schema unchanged.
pub fn project_schema(schema: &SchemaRef, partition_fields: &[String]) -> SchemaRef {
    if partition_fields.is_empty() {
        return Arc::clone(schema);
    }

    let retained: Vec<FieldRef> = schema
        .fields()
        .iter()
        .filter(|f| !is_partition_field(f.name(), partition_fields))
        .cloned()
        .collect();

    Arc::new(Schema::new_with_metadata(retained, schema.metadata().clone()))
}

/// Project a record's values onto a derived schema.
///
/// Copies only the retained fields, in the derived schema's order. Fails
/// with a format error if the record is missing a field the derived
/// schema requires.
pub fn project_values(record: &Record, projected: &SchemaRef) -> Result<Vec<Value>> {
    projected
        .fields()
        .iter()
        .map(|field| {
            record.get(field.name()).cloned().ok_or_else(|| {
                SinkError::format(format!(
                    "record is missing projected field '{}'",
                    field.name()
                ))
            })
        })
        .collect()
}

fn is_partition_field(name: &str, partition_fields: &[String]) -> bool {
    partition_fields
        .iter()
        .any(|p| p.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field};
    use std::collections::HashMap;

    fn schema_with_docs() -> SchemaRef {
        let documented = Field::new("payload", DataType::Utf8, true).with_metadata(
            HashMap::from([("doc".to_string(), "opaque payload".to_string())]),
        );
        Arc::new(Schema::new(vec![
            Field::new("Region", DataType::Utf8, false),
            documented,
            Field::new("count", DataType::Int64, true),
        ]))
    }

    #[test]
    fn test_projection_removes_partition_fields_case_insensitively() {
        let schema = schema_with_docs();
        let projected = project_schema(&schema, &["region".to_string()]);

        let names: Vec<&str> = projected.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["payload", "count"]);
    }

    #[test]
    fn test_projection_preserves_order_type_and_metadata() {
        let schema = schema_with_docs();
        let projected = project_schema(&schema, &["count".to_string()]);

        assert_eq!(projected.field(0).name(), "Region");
        assert_eq!(projected.field(1).name(), "payload");
        assert_eq!(projected.field(1).data_type(), &DataType::Utf8);
        assert_eq!(
            projected.field(1).metadata().get("doc").map(String::as_str),
            Some("opaque payload")
        );
    }

    #[test]
    fn test_empty_partition_set_round_trips() {
        let schema = schema_with_docs();
        let projected = project_schema(&schema, &[]);
        assert_eq!(&projected, &schema);
    }

    #[test]
    fn test_project_values_retains_only_derived_fields() {
        let schema = schema_with_docs();
        let record = Record::new(
            Arc::clone(&schema),
            vec![
                Value::Str("eu".into()),
                Value::Str("hello".into()),
                Value::Int(3),
            ],
            0,
        )
        .unwrap();

        let projected = project_schema(&schema, &["region".to_string()]);
        let values = project_values(&record, &projected).unwrap();
        assert_eq!(values, vec![Value::Str("hello".into()), Value::Int(3)]);
    }
}
