//! Sink-key and filter-document construction. Both the KV key and the
//! document filter route through [`crate::model::Value::to_key_string`] for
//! the stringification step, so a key built from typed values and one built
//! from coerced text can never name different rows.

use tracing::warn;

use crate::model::{TableSchema, Value};
use crate::sink::TableMapping;

#[derive(Debug, Clone, Copy)]
pub struct KeyPolicy {
    pub primary_as_id: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self { primary_as_id: true }
    }
}

/// Builds the KV sink key: `table:pk1:pk2:...`. The table part honours the
/// mapping's `target_name` override; a table with no primary key falls back
/// to the mapping's configured columns, or every column when the mapping
/// doesn't narrow them.
pub fn key_for(schema: &TableSchema, row: &[Value], mapping: &TableMapping) -> String {
    let columns = sink_columns(schema, mapping);
    let table = mapping.target_name.as_deref().unwrap_or(&schema.key.table);

    let mut parts = vec![table.to_string()];
    for col in &columns {
        if let Some(idx) = schema.column_index(col) {
            if let Some(value) = row.get(idx) {
                parts.push(value.to_key_string());
            }
        }
    }
    parts.join(":")
}

/// Primary-key columns in declared order, or the degraded no-PK fallback.
fn sink_columns(schema: &TableSchema, mapping: &TableMapping) -> Vec<String> {
    if schema.has_primary_key() {
        return schema.primary_key.clone();
    }
    warn!(table = %schema.key, "table has no primary key, using configured columns for sink key/filter");
    if !mapping.columns.is_empty() {
        mapping.columns.clone()
    } else {
        schema.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A document-sink filter: either `{_id: value}` for a single-column PK
/// under `primary-as-_id`, or `{col: value, ...}` otherwise.
#[derive(Debug, Clone)]
pub enum Filter {
    ById(Value),
    ByColumns(Vec<(String, Value)>),
}

pub fn filter_for(schema: &TableSchema, row: &[Value], policy: KeyPolicy, mapping: &TableMapping) -> Filter {
    if policy.primary_as_id && schema.primary_key.len() == 1 {
        let col = &schema.primary_key[0];
        if let Some(idx) = schema.column_index(col) {
            if let Some(value) = row.get(idx) {
                return Filter::ById(value.clone());
            }
        }
    }

    let columns = sink_columns(schema, mapping);

    let mut pairs = Vec::with_capacity(columns.len());
    for col in &columns {
        if let Some(idx) = schema.column_index(col) {
            if let Some(value) = row.get(idx) {
                pairs.push((col.clone(), value.clone()));
            }
        }
    }
    Filter::ByColumns(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDescriptor, TableKey};

    fn schema_with_pk() -> TableSchema {
        TableSchema::new(
            TableKey::new("shop", "orders"),
            vec![ColumnDescriptor::new("id", "int"), ColumnDescriptor::new("total", "decimal")],
            vec!["id".to_string()],
        )
    }

    fn schema_without_pk() -> TableSchema {
        TableSchema::new(
            TableKey::new("shop", "log"),
            vec![ColumnDescriptor::new("ts", "datetime"), ColumnDescriptor::new("msg", "text")],
            vec![],
        )
    }

    #[test]
    fn key_for_uses_primary_key_columns() {
        let schema = schema_with_pk();
        let row = vec![Value::Int(42), Value::Decimal("9.99".into())];
        assert_eq!(key_for(&schema, &row, &TableMapping::default()), "orders:42");
    }

    #[test]
    fn key_for_honours_target_name_override() {
        let schema = schema_with_pk();
        let row = vec![Value::Int(42), Value::Decimal("9.99".into())];
        let mapping = TableMapping { target_name: Some("orders_v2".into()), columns: Vec::new() };
        assert_eq!(key_for(&schema, &row, &mapping), "orders_v2:42");
    }

    #[test]
    fn key_for_falls_back_to_all_columns_without_pk() {
        let schema = schema_without_pk();
        let row = vec![Value::Timestamp("2024-01-01 00:00:00".into()), Value::Text("hi".into())];
        assert_eq!(key_for(&schema, &row, &TableMapping::default()), "log:2024-01-01 00:00:00:hi");
    }

    #[test]
    fn key_for_without_pk_prefers_configured_columns() {
        let schema = schema_without_pk();
        let row = vec![Value::Timestamp("2024-01-01 00:00:00".into()), Value::Text("hi".into())];
        let mapping = TableMapping { target_name: None, columns: vec!["msg".to_string()] };
        assert_eq!(key_for(&schema, &row, &mapping), "log:hi");
    }

    #[test]
    fn filter_for_single_column_pk_uses_id() {
        let schema = schema_with_pk();
        let row = vec![Value::Int(42), Value::Decimal("9.99".into())];
        match filter_for(&schema, &row, KeyPolicy { primary_as_id: true }, &TableMapping::default()) {
            Filter::ById(Value::Int(42)) => {}
            other => panic!("expected ById(42), got {other:?}"),
        }
    }

    #[test]
    fn filter_for_disabled_primary_as_id_enumerates_columns() {
        let schema = schema_with_pk();
        let row = vec![Value::Int(42), Value::Decimal("9.99".into())];
        match filter_for(&schema, &row, KeyPolicy { primary_as_id: false }, &TableMapping::default()) {
            Filter::ByColumns(pairs) => assert_eq!(pairs, vec![("id".to_string(), Value::Int(42))]),
            other => panic!("expected ByColumns, got {other:?}"),
        }
    }
}
