//! Contract for the opaque remote data store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// A remote row; tables are schemaless from this side.
pub type Row = serde_json::Value;

/// Equality filter on one column, e.g. `id = 't1'`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::eq("id", value)
    }

    /// Whether `row` satisfies the filter; non-string scalars compare by their JSON text.
    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(serde_json::Value::String(v)) => *v == self.value,
            Some(serde_json::Value::Number(v)) => v.to_string() == self.value,
            Some(serde_json::Value::Bool(v)) => v.to_string() == self.value,
            _ => false,
        }
    }
}

/// Minimal verb set the sync engine and repository facade depend on.
///
/// `upsert` must be insert-or-update by `id` so replaying the same record
/// twice converges to the same remote state.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: &str) -> Result<Vec<Row>>;

    async fn insert(&self, table: &str, row: Row) -> Result<Row>;

    async fn upsert(&self, table: &str, row: Row) -> Result<()>;

    async fn update(&self, table: &str, row: Row, filter: RowFilter) -> Result<()>;

    async fn delete(&self, table: &str, filter: RowFilter) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_string_and_numeric_ids() {
        assert!(RowFilter::id("t1").matches(&json!({"id": "t1"})));
        assert!(RowFilter::id("42").matches(&json!({"id": 42})));
        assert!(!RowFilter::id("t1").matches(&json!({"id": "t2"})));
        assert!(!RowFilter::id("t1").matches(&json!({"name": "t1"})));
    }
}
