//! Forward and flashback SQL rendering. Only a true SQL NULL is omitted
//! from SET/WHERE clauses and from a row's VALUES tuple; an empty string
//! renders as `''`. An INSERT's column list always names every column,
//! whatever each row's tuple ends up carrying.

pub mod output;

use chrono::Local;

use crate::model::{ColumnDescriptor, Position, RowEvent, TableSchema, Value};
use output::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    General,
    Flashback,
}

pub struct Renderer {
    mode: Mode,
}

impl Renderer {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn render_and_emit(&self, event: &RowEvent, schema: &TableSchema, position: &Position, sink: &Sink) -> crate::error::Result<()> {
        for statement in self.render(event, schema) {
            let prefixed = format!(
                "/*{}:{}, Executed At: {}*/\n{statement}",
                position.file,
                position.offset,
                Local::now().format("%Y-%m-%d %H:%M:%S"),
            );
            sink.write_line(&prefixed)?;
        }
        Ok(())
    }

    pub fn render(&self, event: &RowEvent, schema: &TableSchema) -> Vec<String> {
        let table = schema.key.to_string();
        match (event, self.mode) {
            (RowEvent::Insert { rows, .. }, Mode::General) => {
                vec![render_insert(&table, schema, rows)]
            }
            (RowEvent::Insert { rows, .. }, Mode::Flashback) => {
                rows.iter().map(|row| render_delete(&table, schema, row)).collect()
            }
            (RowEvent::Update { rows, .. }, Mode::General) => rows
                .iter()
                .map(|(before, after)| render_update(&table, schema, after, before))
                .collect(),
            (RowEvent::Update { rows, .. }, Mode::Flashback) => rows
                .iter()
                .map(|(before, after)| render_update(&table, schema, before, after))
                .collect(),
            (RowEvent::Delete { rows, .. }, Mode::General) => {
                rows.iter().map(|row| render_delete(&table, schema, row)).collect()
            }
            (RowEvent::Delete { rows, .. }, Mode::Flashback) => {
                vec![render_insert(&table, schema, rows)]
            }
        }
    }
}

/// The column list always names every column; each row's VALUES tuple
/// omits only that row's own NULL entries, so one row's NULL can never
/// suppress another row's real value.
fn render_insert(table: &str, schema: &TableSchema, rows: &[Vec<Value>]) -> String {
    let columns = schema.column_names();
    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = schema
                .reconcile_width(row.len())
                .iter()
                .zip(row)
                .filter(|(_, value)| !value.is_null())
                .map(|(_, value)| format_value(value))
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {table} ({}) VALUES {};",
        columns.join(", "),
        value_rows.join(", ")
    )
}

fn render_delete(table: &str, schema: &TableSchema, row: &[Value]) -> String {
    format!("DELETE FROM {table} WHERE {};", render_predicate(schema, row))
}

fn render_update(table: &str, schema: &TableSchema, set_row: &[Value], where_row: &[Value]) -> String {
    let set_clause = render_assignments(schema, set_row);
    let where_clause = render_predicate(schema, where_row);
    format!("UPDATE {table} SET {set_clause} WHERE {where_clause};")
}

fn render_assignments(schema: &TableSchema, row: &[Value]) -> String {
    schema
        .reconcile_width(row.len())
        .iter()
        .zip(row)
        .filter(|(_, value)| !value.is_null())
        .map(|(col, value)| format!("{} = {}", col.name, format_value(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_predicate(schema: &TableSchema, row: &[Value]) -> String {
    schema
        .reconcile_width(row.len())
        .iter()
        .zip(row)
        .filter(|(col, value)| !col.is_json() && !value.is_null())
        .map(|(col, value)| format!("{} = {}", col.name, format_value(value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn format_value(value: &Value) -> String {
    if value.is_numeric() {
        value.raw_text()
    } else {
        format!("'{}'", value.sql_escaped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TableKey;

    fn schema() -> TableSchema {
        TableSchema::new(
            TableKey::new("shop", "orders"),
            vec![
                ColumnDescriptor::new("id", "int"),
                ColumnDescriptor::new("name", "varchar"),
                ColumnDescriptor::new("meta", "json"),
            ],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn insert_keeps_full_column_list_and_drops_only_a_rows_own_nulls() {
        let schema = schema();
        let rows = vec![vec![Value::Int(1), Value::Text(String::new()), Value::Null]];
        let sql = render_insert(&schema.key.to_string(), &schema, &rows);
        assert_eq!(sql, "INSERT INTO shop.orders (id, name, meta) VALUES (1, '');");
    }

    #[test]
    fn one_rows_null_does_not_suppress_another_rows_value() {
        let schema = schema();
        let rows = vec![
            vec![Value::Int(1), Value::Text("a".into()), Value::Null],
            vec![Value::Int(2), Value::Text("b".into()), Value::Text("{}".into())],
        ];
        let sql = render_insert(&schema.key.to_string(), &schema, &rows);
        assert_eq!(sql, "INSERT INTO shop.orders (id, name, meta) VALUES (1, 'a'), (2, 'b', '{}');");
    }

    #[test]
    fn delete_predicate_excludes_json_columns() {
        let schema = schema();
        let row = vec![Value::Int(1), Value::Text("a".into()), Value::Text("{}".into())];
        let sql = render_delete(&schema.key.to_string(), &schema, &row);
        assert_eq!(sql, "DELETE FROM shop.orders WHERE id = 1 AND name = 'a';");
    }

    #[test]
    fn flashback_insert_becomes_delete_per_row() {
        let schema = schema();
        let renderer = Renderer::new(Mode::Flashback);
        let event = RowEvent::Insert {
            table: schema.key.clone(),
            rows: vec![vec![Value::Int(1), Value::Text("a".into()), Value::Null]],
        };
        let statements = renderer.render(&event, &schema);
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("DELETE FROM shop.orders WHERE"));
    }

    #[test]
    fn update_sets_new_values_and_matches_on_old_values() {
        let schema = schema();
        let renderer = Renderer::new(Mode::General);
        let before = vec![Value::Int(1), Value::Text("a".into()), Value::Null];
        let after = vec![Value::Int(1), Value::Text("b".into()), Value::Null];
        let event = RowEvent::Update { table: schema.key.clone(), rows: vec![(before, after)] };
        let statements = renderer.render(&event, &schema);
        assert_eq!(statements[0], "UPDATE shop.orders SET id = 1, name = 'b' WHERE id = 1 AND name = 'a';");
    }

    #[test]
    fn insert_batches_all_rows_into_one_statement() {
        let schema = schema();
        let renderer = Renderer::new(Mode::General);
        let event = RowEvent::Insert {
            table: schema.key.clone(),
            rows: vec![
                vec![Value::Int(1), Value::Text("a".into()), Value::Null],
                vec![Value::Int(2), Value::Text("b".into()), Value::Null],
            ],
        };
        let statements = renderer.render(&event, &schema);
        assert_eq!(statements, vec!["INSERT INTO shop.orders (id, name, meta) VALUES (1, 'a'), (2, 'b');"]);
    }

    #[test]
    fn a_row_wider_than_the_cached_schema_ignores_the_extra_positions() {
        let schema = schema();
        let row = vec![Value::Int(1), Value::Text("a".into()), Value::Null, Value::Int(99)];
        let sql = render_delete(&schema.key.to_string(), &schema, &row);
        assert_eq!(sql, "DELETE FROM shop.orders WHERE id = 1 AND name = 'a';");
    }

    #[test]
    fn update_swaps_before_after_in_flashback_mode() {
        let schema = schema();
        let renderer = Renderer::new(Mode::Flashback);
        let before = vec![Value::Int(1), Value::Text("old".into()), Value::Null];
        let after = vec![Value::Int(1), Value::Text("new".into()), Value::Null];
        let event = RowEvent::Update { table: schema.key.clone(), rows: vec![(before, after)] };
        let statements = renderer.render(&event, &schema);
        assert_eq!(statements[0], "UPDATE shop.orders SET id = 1, name = 'old' WHERE id = 1 AND name = 'new';");
    }
}
