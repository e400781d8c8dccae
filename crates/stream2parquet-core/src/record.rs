//! Record and shard model
//!
//! Records carry an ordered, named, typed field set plus values and the
//! logical offset assigned by the upstream stream. Schemas are structural:
//! the arrow `Schema` field list is the source of truth, matched by name.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::Schema;

use crate::error::{Result, SinkError};

pub type SchemaRef = Arc<Schema>;

/// One independently-owned partition of the input stream.
///
/// Exactly one partition writer owns a shard at a time; exclusivity is
/// enforced by the upstream assignment mechanism, not re-checked here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId {
    pub stream: String,
    pub partition: i32,
}

impl ShardId {
    pub fn new(stream: impl Into<String>, partition: i32) -> Self {
        Self {
            stream: stream.into(),
            partition,
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.stream, self.partition)
    }
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Nanoseconds since the Unix epoch
    TimestampNanos(i64),
}

impl Value {
    /// Render the value as a partition path segment.
    ///
    /// Fails for `Null`: a partition key must resolve to a concrete value.
    pub fn to_segment(&self) -> Result<String> {
        match self {
            Value::Null => Err(SinkError::format("null value cannot form a partition segment")),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(x) => Ok(x.to_string()),
            Value::Str(s) => Ok(s.clone()),
            Value::TimestampNanos(ns) => Ok(ns.to_string()),
        }
    }
}

/// One structured record with its logical offset.
#[derive(Debug, Clone)]
pub struct Record {
    schema: SchemaRef,
    values: Vec<Value>,
    offset: u64,
}

impl Record {
    /// Build a record, checking that the value list matches the schema arity.
    pub fn new(schema: SchemaRef, values: Vec<Value>, offset: u64) -> Result<Self> {
        if schema.fields().len() != values.len() {
            return Err(SinkError::format(format!(
                "record has {} values but schema declares {} fields",
                values.len(),
                schema.fields().len()
            )));
        }
        Ok(Self {
            schema,
            values,
            offset,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Look up a field value by name, case-insensitively.
    ///
    /// Partition functions and projection both match names this way, so a
    /// field declared as `Region` is found by a partitioner configured
    /// with `region`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .fields()
            .iter()
            .position(|f| f.name().eq_ignore_ascii_case(name))
            .map(|idx| &self.values[idx])
    }
}
