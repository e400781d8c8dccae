//! Typed-row to Arrow conversion
//!
//! Buffered rows are turned into one `RecordBatch` per file at close
//! time. Supported field types mirror the record value model: Utf8,
//! Int64, Float64, Boolean and nanosecond timestamps.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, RecordBatchOptions,
    StringBuilder, TimestampNanosecondBuilder,
};
use arrow::datatypes::{DataType, Field, TimeUnit};

use stream2parquet_core::record::SchemaRef;
use stream2parquet_core::{Result, SinkError, Value};

/// Build one `RecordBatch` from buffered rows, column by column.
pub fn rows_to_batch(schema: &SchemaRef, rows: &[Vec<Value>]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| build_column(field, idx, rows))
        .collect::<Result<_>>()?;

    // A fully projected-out schema still needs a row count
    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    RecordBatch::try_new_with_options(Arc::clone(schema), columns, &options)
        .map_err(|e| SinkError::format(format!("failed to assemble record batch: {}", e)))
}

fn build_column(field: &Field, idx: usize, rows: &[Vec<Value>]) -> Result<ArrayRef> {
    match field.data_type() {
        DataType::Utf8 => {
            let mut builder = StringBuilder::new();
            for row in rows {
                match &row[idx] {
                    Value::Str(s) => builder.append_value(s),
                    Value::Null => append_null(field, || builder.append_null())?,
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for row in rows {
                match &row[idx] {
                    Value::Int(i) => builder.append_value(*i),
                    Value::Null => append_null(field, || builder.append_null())?,
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for row in rows {
                match &row[idx] {
                    Value::Float(x) => builder.append_value(*x),
                    Value::Int(i) => builder.append_value(*i as f64),
                    Value::Null => append_null(field, || builder.append_null())?,
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for row in rows {
                match &row[idx] {
                    Value::Bool(b) => builder.append_value(*b),
                    Value::Null => append_null(field, || builder.append_null())?,
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, None) => {
            let mut builder = TimestampNanosecondBuilder::new();
            for row in rows {
                match &row[idx] {
                    Value::TimestampNanos(ns) => builder.append_value(*ns),
                    Value::Int(ns) => builder.append_value(*ns),
                    Value::Null => append_null(field, || builder.append_null())?,
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        other => Err(SinkError::format(format!(
            "unsupported data type {:?} for field '{}'",
            other,
            field.name()
        ))),
    }
}

fn append_null(field: &Field, append: impl FnOnce()) -> Result<()> {
    if field.is_nullable() {
        append();
        Ok(())
    } else {
        Err(SinkError::format(format!(
            "null value for non-nullable field '{}'",
            field.name()
        )))
    }
}

fn type_mismatch(field: &Field, value: &Value) -> SinkError {
    SinkError::format(format!(
        "value {:?} does not match field '{}' of type {:?}",
        value,
        field.name(),
        field.data_type()
    ))
}
