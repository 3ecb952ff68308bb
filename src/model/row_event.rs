use crate::model::schema::TableKey;
use crate::model::value::Value;

/// A single logical row change, tagged by DML kind. The stream consumer's
/// event dispatch bottoms out here; everything downstream (renderer, sinks)
/// matches on the variant.
#[derive(Debug, Clone)]
pub enum RowEvent {
    Insert { table: TableKey, rows: Vec<Vec<Value>> },
    Update { table: TableKey, rows: Vec<(Vec<Value>, Vec<Value>)> },
    Delete { table: TableKey, rows: Vec<Vec<Value>> },
}

impl RowEvent {
    pub fn table(&self) -> &TableKey {
        match self {
            RowEvent::Insert { table, .. } => table,
            RowEvent::Update { table, .. } => table,
            RowEvent::Delete { table, .. } => table,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            RowEvent::Insert { rows, .. } => rows.len(),
            RowEvent::Update { rows, .. } => rows.len(),
            RowEvent::Delete { rows, .. } => rows.len(),
        }
    }
}
