//! Typed partition-function registry
//!
//! Partition functions are configured by type name plus a string-keyed
//! config map. The registry resolves every name to a factory once, at
//! configuration time: an unknown type fails construction outright.
//! Silently dropping a misconfigured child would change the effective
//! partition layout without detection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SinkError};
use crate::partition::{
    CompositePartitioner, FieldPartitioner, Partitioner, TimeBucketPartitioner,
};

/// Declarative configuration for one child partition function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionerSpec {
    /// Registered type name, e.g. `"field"` or `"time_bucket"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific settings
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl PartitionerSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            config: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Factory resolved for a configured type name.
pub type PartitionerFactory = fn(&BTreeMap<String, String>) -> Result<Box<dyn Partitioner>>;

/// Registry mapping configured type names to partitioner factories.
pub struct PartitionerRegistry {
    factories: BTreeMap<String, PartitionerFactory>,
}

impl PartitionerRegistry {
    /// Registry with the built-in partitioner types registered.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register("field", build_field);
        registry.register("time_bucket", build_time_bucket);
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: PartitionerFactory) {
        self.factories.insert(kind.into(), factory);
    }

    /// Resolve and construct one partitioner. Unknown types are a fatal
    /// configuration error.
    pub fn build(&self, spec: &PartitionerSpec) -> Result<Box<dyn Partitioner>> {
        let factory = self.factories.get(&spec.kind).ok_or_else(|| {
            SinkError::config(format!(
                "unknown partitioner type '{}' (registered: {})",
                spec.kind,
                self.factories
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        factory(&spec.config)
    }

    /// Construct the composite function from an ordered spec list.
    ///
    /// Child order is preserved from configuration; it is significant for
    /// both the encoded path and the destination directory layout.
    pub fn build_composite(&self, specs: &[PartitionerSpec]) -> Result<CompositePartitioner> {
        let children = specs
            .iter()
            .map(|spec| self.build(spec))
            .collect::<Result<Vec<_>>>()?;
        debug!(children = children.len(), "built composite partitioner");
        Ok(CompositePartitioner::new(children))
    }
}

fn require<'a>(config: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| SinkError::config(format!("missing partitioner config key '{}'", key)))
}

fn build_field(config: &BTreeMap<String, String>) -> Result<Box<dyn Partitioner>> {
    let name = require(config, "field.name")?;
    Ok(Box::new(FieldPartitioner::new(name)?))
}

fn build_time_bucket(config: &BTreeMap<String, String>) -> Result<Box<dyn Partitioner>> {
    let format = require(config, "bucket.format")?;
    let field = config.get("bucket.field").cloned();
    Ok(Box::new(TimeBucketPartitioner::new(format, field)?))
}
