//! Bootstrap snapshot: open one consistent-snapshot transaction, read
//! `SHOW MASTER STATUS` inside it so the snapshot and the position it
//! resumes from never drift apart, then fan the per-table dump out across
//! worker threads, shipping each table through [`SinkAdapter::dump`] so
//! either sink variant can be the target.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{ColumnDescriptor, Position, TableKey, TableSchema, Value};
use crate::protocol::connection::MysqlConnection;
use crate::schema_cache::SchemaCache;
use crate::sink::pool::Pool;
use crate::sink::SinkAdapter;

/// Opens one consistent-snapshot transaction against `conn`, reads the
/// binlog coordinates it is pinned to, and dumps every table in `tables`
/// through `sink`, using `pool` to run the per-table reads concurrently.
///
/// `conn` must not be shared with the live replication connection: the
/// transaction holds it for the whole snapshot.
pub fn run(
    conn: &mut MysqlConnection,
    schema_cache: &SchemaCache,
    tables: &[TableKey],
    sink: Arc<Mutex<Box<dyn SinkAdapter>>>,
    pool: &Pool,
) -> Result<Position> {
    conn.query("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")?;
    conn.query("START TRANSACTION WITH CONSISTENT SNAPSHOT")?;

    let position = show_master_status(conn)?;
    info!(position = %position, tables = tables.len(), "bootstrap snapshot pinned to position");

    let mut schemas = Vec::with_capacity(tables.len());
    for table in tables {
        schemas.push(schema_cache.get_or_resolve(conn, table)?);
    }

    let mut rows_by_table = Vec::with_capacity(schemas.len());
    for schema in &schemas {
        rows_by_table.push(dump_table(conn, schema)?);
    }

    conn.query("COMMIT")?;

    let jobs: Vec<_> = schemas
        .into_iter()
        .zip(rows_by_table)
        .map(|(schema, rows)| {
            let sink = Arc::clone(&sink);
            move || -> Result<()> {
                let count = rows.len();
                sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).dump(&schema, rows)?;
                info!(table = %schema.key, rows = count, "bootstrap snapshot dumped table");
                Ok(())
            }
        })
        .collect();

    for result in pool.scope(jobs) {
        result?;
    }

    Ok(position)
}

/// Reads the binlog coordinates the server is currently writing at, used
/// both to pin a bootstrap snapshot's transaction and as the live path's
/// starting position when no checkpoint and no full-snapshot mode applies.
pub fn show_master_status(conn: &mut MysqlConnection) -> Result<Position> {
    let result = conn.query("SHOW MASTER STATUS")?;
    let file_idx = result.column_index("File").ok_or_else(|| Error::Schema("SHOW MASTER STATUS returned no File column".into()))?;
    let pos_idx = result.column_index("Position").ok_or_else(|| Error::Schema("SHOW MASTER STATUS returned no Position column".into()))?;
    let row = result.rows.first().ok_or_else(|| Error::Schema("SHOW MASTER STATUS returned no rows; is binary logging enabled?".into()))?;

    let file = row.get(file_idx).cloned().flatten().ok_or_else(|| Error::Schema("SHOW MASTER STATUS File is NULL".into()))?;
    let offset: u32 = row
        .get(pos_idx)
        .cloned()
        .flatten()
        .ok_or_else(|| Error::Schema("SHOW MASTER STATUS Position is NULL".into()))?
        .parse()
        .map_err(|_| Error::Schema("SHOW MASTER STATUS Position is not numeric".into()))?;

    Ok(Position::new(file, offset))
}

/// Reads every row of one table as the text protocol gives it, then coerces
/// each cell using the schema's declared column type, the same numeric
/// classification the SQL renderer uses for quoting.
fn dump_table(conn: &mut MysqlConnection, schema: &TableSchema) -> Result<Vec<Vec<Value>>> {
    let sql = format!("SELECT * FROM `{}`.`{}`", schema.key.database, schema.key.table);
    let result = conn.query(&sql)?;

    Ok(result
        .rows
        .into_iter()
        .map(|row| {
            schema
                .columns
                .iter()
                .enumerate()
                .map(|(i, col)| text_cell_to_value(col, row.get(i).cloned().flatten()))
                .collect()
        })
        .collect())
}

fn text_cell_to_value(col: &ColumnDescriptor, cell: Option<String>) -> Value {
    let Some(text) = cell else { return Value::Null };
    if col.is_numeric_type() {
        if let Ok(i) = text.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Value::Float(f);
        }
        return Value::Decimal(text);
    }
    Value::Text(text)
}

/// Resolves the full `(database, table)` set a snapshot should cover from a
/// loaded config's mapping entries.
pub fn tables_from_config(config: &Config) -> Vec<TableKey> {
    config
        .mapping
        .iter()
        .flat_map(|entry| entry.tables.iter().map(move |table| TableKey::new(entry.database.clone(), table.table.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MappingEntry, MappingTable};

    #[test]
    fn coerces_numeric_and_text_columns() {
        let numeric = ColumnDescriptor::new("id", "int");
        let text = ColumnDescriptor::new("name", "varchar");
        assert_eq!(text_cell_to_value(&numeric, Some("42".into())), Value::Int(42));
        assert_eq!(text_cell_to_value(&text, Some("hi".into())), Value::Text("hi".into()));
        assert_eq!(text_cell_to_value(&numeric, None), Value::Null);
    }

    #[test]
    fn falls_back_to_decimal_for_non_integer_numeric_text() {
        let numeric = ColumnDescriptor::new("total", "decimal");
        assert_eq!(text_cell_to_value(&numeric, Some("9.99".into())), Value::Decimal("9.99".into()));
    }

    #[test]
    fn tables_from_config_flattens_mapping() {
        let mapping = vec![MappingEntry {
            database: "shop".into(),
            tables: vec![
                MappingTable { table: "orders".into(), target_name: None, columns: Vec::new() },
                MappingTable { table: "users".into(), target_name: None, columns: Vec::new() },
            ],
        }];
        let config = Config {
            source: crate::config::SourceConfig {
                server_id: 1,
                ip: "127.0.0.1".into(),
                port: 3306,
                user: "root".into(),
                password: String::new(),
                mode: crate::config::SourceMode::Full,
                charset: "utf8mb4".into(),
                pos: String::new(),
            },
            target: crate::config::TargetConfig {
                kind: crate::config::SinkKind::Redis,
                redis: None,
                mongodb: None,
                elasticsearch: None,
                kafka: None,
            },
            mapping,
        };
        let tables = tables_from_config(&config);
        assert_eq!(tables, vec![TableKey::new("shop", "orders"), TableKey::new("shop", "users")]);
    }
}
