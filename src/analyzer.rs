//! Offline write-touch analyzer (`binlogsql --mode stat`): no live
//! connection, no concurrency, no checkpoint, just a directory walk in
//! ascending filename order and a decode pass per file.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::binlog::event::{Event, RowsPayload};
use crate::binlog::file_reader::FileReader;
use crate::ddl;
use crate::error::{Error, Result};
use crate::model::TableKey;

fn binlog_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^mysql-bin\.\d{6}$").unwrap())
}

/// One binlog file's write-touch summary: every distinct `(db, table)` pair
/// touched by a RowsEvent in the file, in first-seen order within the file.
#[derive(Debug)]
pub struct FileStats {
    pub file_name: String,
    pub tables: Vec<TableKey>,
}

/// Enumerates binlog files in `dir` matching `mysql-bin.NNNNNN`, in
/// ascending filename order, and returns each one's write-touch summary.
/// RowsEvents for a table id with no preceding TableMapEvent in the same
/// file are skipped; a file analyzed starting mid-stream loses that
/// context, same as the live Stream Consumer would.
/// Lists the binlog files in `dir` matching `mysql-bin.NNNNNN`, in ascending
/// filename order; shared with the legacy-server replay path.
pub fn binlog_files_in_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| binlog_file_re().is_match(name))
        .collect();
    names.sort();

    if names.is_empty() {
        return Err(Error::Data(format!("no mysql-bin.NNNNNN files found under {}", dir.display())));
    }
    Ok(names)
}

pub fn analyze_dir(dir: &Path) -> Result<Vec<FileStats>> {
    let names = binlog_files_in_dir(dir)?;

    let mut stats = Vec::with_capacity(names.len());
    for name in names {
        let path = dir.join(&name);
        info!(file = %name, "analyzing binlog file");
        stats.push(analyze_file(&path, name)?);
    }
    Ok(stats)
}

fn analyze_file(path: &Path, file_name: String) -> Result<FileStats> {
    let mut reader = FileReader::open(path)?;
    let mut table_ids = std::collections::HashMap::new();
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();

    while let Some((_header, event)) = reader.next_event()? {
        match event {
            Event::TableMap(table_map) => {
                table_ids.insert(table_map.table_id, TableKey::new(table_map.database, table_map.table));
            }
            Event::Rows(rows) => {
                let row_count = match &rows.payload {
                    RowsPayload::Write(rs) | RowsPayload::Delete(rs) => rs.len(),
                    RowsPayload::Update(rs) => rs.len(),
                };
                if row_count == 0 {
                    continue;
                }
                if let Some(table) = table_ids.get(&rows.table_id) {
                    if seen.insert(table.ci_key()) {
                        ordered.push(table.clone());
                    }
                }
            }
            // Statement-format binlogs carry writes as Query events, so the
            // touch summary also counts textual DML.
            Event::Query(query) => {
                if let Some(parsed) = ddl::parse_dml_table(&query.query) {
                    let table = TableKey::new(
                        parsed.database.unwrap_or_else(|| query.database.clone()),
                        parsed.table,
                    );
                    if seen.insert(table.ci_key()) {
                        ordered.push(table);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(FileStats { file_name, tables: ordered })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_canonical_binlog_file_names() {
        assert!(binlog_file_re().is_match("mysql-bin.000001"));
        assert!(binlog_file_re().is_match("mysql-bin.999999"));
        assert!(!binlog_file_re().is_match("mysql-bin.1"));
        assert!(!binlog_file_re().is_match("mysql-bin.000001.idx"));
        assert!(!binlog_file_re().is_match("relay-bin.000001"));
    }

    #[test]
    fn errors_when_directory_has_no_binlog_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyze_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("no mysql-bin"));
    }
}
