use std::fmt;

/// `(database, table)`, case-sensitive as received from MySQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub database: String,
    pub table: String,
}

impl TableKey {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self { database: database.into(), table: table.into() }
    }

    /// Case-insensitive lookup key, used by the schema cache's DDL-driven
    /// invalidation path: DDL text arrives in whatever case the client
    /// typed, while row events carry the names as stored.
    pub fn ci_key(&self) -> String {
        format!("{}.{}", self.database.to_lowercase(), self.table.to_lowercase())
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Drives value formatting (numeric vs. quoted-string vs. opaque) and
/// sink-specific filtering; a JSON-typed column must never end up in a
/// WHERE predicate because MySQL's equality semantics on JSON differ.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub declared_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self { name: name.into(), declared_type: declared_type.into() }
    }

    pub fn is_json(&self) -> bool {
        self.declared_type.eq_ignore_ascii_case("json")
    }

    /// Coarse numeric/string/opaque classification used by the renderer for
    /// unquoted vs. quoted emission, independent of the runtime `Value`
    /// variant (a column can be declared numeric but still carry a string
    /// value off the wire in edge cases, e.g. a DECIMAL represented as text).
    pub fn is_numeric_type(&self) -> bool {
        let t = self.declared_type.to_lowercase();
        [
            "tinyint", "smallint", "mediumint", "int", "integer", "bigint", "float", "double",
            "decimal", "numeric", "bit", "year",
        ]
        .iter()
        .any(|n| t.starts_with(n))
    }
}

/// `(TableKey, ordered columns, ordered primary-key column names)`.
///
/// Invariant: the column list's order matches the positional layout of
/// values in row events; primary-key column names are a subset of column
/// names.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub key: TableKey,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(key: TableKey, columns: Vec<ColumnDescriptor>, primary_key: Vec<String>) -> Self {
        Self { key, columns, primary_key }
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Index of a column by name, used to look up a primary-key column's
    /// position within a row's value list.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Width reconciliation: a row event carrying more values than the
    /// cache knows about has its extra positions ignored; one carrying
    /// fewer gets truncated column metadata to match.
    pub fn reconcile_width<'a>(&'a self, row_width: usize) -> &'a [ColumnDescriptor] {
        let width = row_width.min(self.columns.len());
        &self.columns[..width]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(
            TableKey::new("db", "t"),
            vec![
                ColumnDescriptor::new("id", "int"),
                ColumnDescriptor::new("name", "varchar"),
                ColumnDescriptor::new("meta", "json"),
            ],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn reconciles_narrower_row() {
        let s = schema();
        assert_eq!(s.reconcile_width(2).len(), 2);
    }

    #[test]
    fn reconciles_wider_row_by_ignoring_extra() {
        let s = schema();
        assert_eq!(s.reconcile_width(10).len(), 3);
    }

    #[test]
    fn json_column_is_flagged() {
        let s = schema();
        assert!(s.columns[2].is_json());
        assert!(!s.columns[0].is_json());
    }

    #[test]
    fn ci_key_lowercases_both_parts() {
        let key = TableKey::new("MyDB", "MyTable");
        assert_eq!(key.ci_key(), "mydb.mytable");
    }
}
