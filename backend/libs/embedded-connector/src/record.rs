//! Change records produced by source tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Identifies a sub-stream of the source (a table, a shard, a binlog file).
pub type SourcePartition = Map<String, Value>;

/// Opaque position within a [`SourcePartition`].
pub type SourceOffset = Map<String, Value>;

/// A single change event read from the source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Partition this record was read from
    pub source_partition: SourcePartition,

    /// Position of this record within its partition
    pub source_offset: SourceOffset,

    /// Logical destination name (e.g., "inventory.customers")
    pub topic: String,

    /// Optional record key
    pub key: Option<Value>,

    /// Record payload
    pub value: Value,

    /// Time the change happened at the source, if known
    pub timestamp: Option<DateTime<Utc>>,
}

impl SourceRecord {
    /// Create a record with no key and no timestamp.
    pub fn new(
        source_partition: SourcePartition,
        source_offset: SourceOffset,
        topic: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            source_partition,
            source_offset,
            topic: topic.into(),
            key: None,
            value,
            timestamp: None,
        }
    }

    /// Attach a record key.
    pub fn with_key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach the source timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Canonical string form of a partition, used to key per-partition state.
///
/// Top-level keys are sorted so equal partitions always render to the same string.
pub(crate) fn partition_key(partition: &SourcePartition) -> String {
    let sorted: BTreeMap<&String, &Value> = partition.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_partition_key_ignores_insertion_order() {
        let mut a = Map::new();
        a.insert("server".into(), json!("db1"));
        a.insert("table".into(), json!("orders"));

        let mut b = Map::new();
        b.insert("table".into(), json!("orders"));
        b.insert("server".into(), json!("db1"));

        assert_eq!(partition_key(&a), partition_key(&b));
    }

    #[test]
    fn test_record_builder() {
        let record = SourceRecord::new(
            map(json!({"table": "orders"})),
            map(json!({"lsn": 42})),
            "shop.orders",
            json!({"id": 1}),
        )
        .with_key(json!(1));

        assert_eq!(record.topic, "shop.orders");
        assert_eq!(record.key, Some(json!(1)));
        assert!(record.timestamp.is_none());
    }
}
