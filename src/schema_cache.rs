//! Resolves and caches table schemas over `information_schema.COLUMNS` /
//! `KEY_COLUMN_USAGE`, with explicit invalidation driven by DDL detection.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::Result;
use crate::model::{ColumnDescriptor, TableKey, TableSchema};
use crate::protocol::connection::MysqlConnection;

pub struct SchemaCache {
    entries: RwLock<HashMap<String, TableSchema>>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Fetches a schema, using the cache when present. On miss, resolves
    /// over `conn` and inserts the result.
    pub fn get_or_resolve(&self, conn: &mut MysqlConnection, key: &TableKey) -> Result<TableSchema> {
        if let Some(schema) = self.entries.read().unwrap().get(&key.ci_key()).cloned() {
            return Ok(schema);
        }
        let schema = resolve(conn, key)?;
        self.entries.write().unwrap().insert(key.ci_key(), schema.clone());
        Ok(schema)
    }

    /// Invalidates one table's cached schema; called when the DDL detector
    /// (`src/ddl.rs`) sees a statement that could have changed its columns.
    pub fn invalidate(&self, key: &TableKey) {
        debug!(table = %key, "invalidating cached schema");
        self.entries.write().unwrap().remove(&key.ci_key());
    }

    /// Drops every cached schema under `database`; used for database-level
    /// DDL (`CREATE|DROP DATABASE`), which names no single table.
    pub fn invalidate_database(&self, database: &str) {
        let prefix = format!("{}.", database.to_lowercase());
        self.entries.write().unwrap().retain(|key, _| !key.starts_with(&prefix));
    }

    /// Resolves and inserts every `(db, table)` in scope up front so the
    /// first real event never blocks on a schema lookup.
    pub fn preload(&self, conn: &mut MysqlConnection, keys: &[TableKey]) -> Result<()> {
        for key in keys {
            let schema = resolve(conn, key)?;
            info!(table = %key, columns = schema.columns.len(), "preloaded schema");
            self.entries.write().unwrap().insert(key.ci_key(), schema);
        }
        Ok(())
    }
}

fn resolve(conn: &mut MysqlConnection, key: &TableKey) -> Result<TableSchema> {
    let columns = resolve_columns(conn, key)?;
    let primary_key = resolve_primary_key(conn, key)?;
    Ok(TableSchema::new(key.clone(), columns, primary_key))
}

fn resolve_columns(conn: &mut MysqlConnection, key: &TableKey) -> Result<Vec<ColumnDescriptor>> {
    let sql = format!(
        "SELECT COLUMN_NAME, DATA_TYPE FROM information_schema.COLUMNS \
         WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' ORDER BY ORDINAL_POSITION",
        escape_identifier(&key.database),
        escape_identifier(&key.table),
    );
    let result = conn.query(&sql)?;
    let name_idx = result.column_index("COLUMN_NAME").unwrap_or(0);
    let type_idx = result.column_index("DATA_TYPE").unwrap_or(1);

    Ok(result
        .rows
        .into_iter()
        .map(|row| {
            let name = row.get(name_idx).cloned().flatten().unwrap_or_default();
            let declared_type = row.get(type_idx).cloned().flatten().unwrap_or_default();
            ColumnDescriptor::new(name, declared_type)
        })
        .collect())
}

fn resolve_primary_key(conn: &mut MysqlConnection, key: &TableKey) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
         WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' AND CONSTRAINT_NAME = 'PRIMARY' \
         ORDER BY ORDINAL_POSITION",
        escape_identifier(&key.database),
        escape_identifier(&key.table),
    );
    let result = conn.query(&sql)?;
    Ok(result.rows.into_iter().filter_map(|mut row| row.remove(0)).collect())
}

/// `information_schema` lookups interpolate identifiers into literals, not
/// SQL identifiers; escape embedded quotes defensively even though database
/// and table names practically never contain them.
fn escape_identifier(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_identifier_doubles_quotes() {
        assert_eq!(escape_identifier("o'brien"), "o''brien");
    }
}
