//! DDL statement detection: keyword screening plus table-name extraction,
//! each regex compiled once via `std::sync::OnceLock`.

use std::sync::OnceLock;

use regex::Regex;

fn ddl_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(CREATE|ALTER|DROP|RENAME|TRUNCATE|ADD|INDEX)\s+").unwrap()
    })
}

fn table_ddl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:CREATE|ALTER|DROP|RENAME|TRUNCATE)\s+(?:TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?|INDEX\s+\w+\s+ON\s+)?(?:(?P<db>\w+)\.)?(?P<table>\w+)",
        )
        .unwrap()
    })
}

fn database_ddl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:CREATE|DROP)\s+(?:DATABASE|SCHEMA)\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?(?P<db>\w+)").unwrap())
}

fn dml_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:INSERT\s+(?:IGNORE\s+)?INTO|UPDATE|DELETE\s+FROM)\s+(?:(?P<db>\w+)\.)?(?P<table>\w+)",
        )
        .unwrap()
    })
}

/// A table reference parsed out of a statement: the database part is absent
/// when the statement relies on the session's default database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub database: Option<String>,
    pub table: String,
}

pub fn is_ddl(query: &str) -> bool {
    ddl_keyword_re().is_match(query)
}

/// Extracts the table a DDL statement targets. Back-ticks are stripped
/// before matching; matching is case-insensitive.
pub fn parse_ddl_table(query: &str) -> Option<ParsedTable> {
    let stripped = strip_backticks(query);
    let captures = table_ddl_re().captures(&stripped)?;
    Some(ParsedTable {
        database: captures.name("db").map(|m| m.as_str().to_string()),
        table: captures.name("table")?.as_str().to_string(),
    })
}

/// `CREATE|DROP DATABASE <name>` doesn't name a table, so it is reported
/// separately; callers use this to drop every cached schema under `<name>`.
pub fn parse_ddl_database(query: &str) -> Option<String> {
    let stripped = strip_backticks(query);
    database_ddl_re().captures(&stripped).and_then(|c| c.name("db")).map(|m| m.as_str().to_string())
}

/// Extracts the table a textual DML statement targets (`INSERT INTO`,
/// `UPDATE`, `DELETE FROM`). Used by the offline analyzer for
/// statement-format binlogs, where row changes arrive as Query events
/// instead of RowsEvents; the live path never consults it.
pub fn parse_dml_table(query: &str) -> Option<ParsedTable> {
    let stripped = strip_backticks(query);
    let captures = dml_re().captures(&stripped)?;
    Some(ParsedTable {
        database: captures.name("db").map(|m| m.as_str().to_string()),
        table: captures.name("table")?.as_str().to_string(),
    })
}

fn strip_backticks(query: &str) -> String {
    query.replace('`', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_create_alter_drop() {
        assert!(is_ddl("CREATE TABLE foo.bar (id INT)"));
        assert!(is_ddl("  alter table x.y add column z int"));
        assert!(is_ddl("DROP TABLE foo.bar"));
        assert!(is_ddl("TRUNCATE TABLE foo.bar"));
        assert!(!is_ddl("INSERT INTO foo.bar VALUES (1)"));
        assert!(!is_ddl("SELECT * FROM foo.bar"));
        assert!(!is_ddl("BEGIN"));
    }

    #[test]
    fn parses_qualified_table_name() {
        let parsed = parse_ddl_table("ALTER TABLE shop.orders ADD COLUMN note TEXT").unwrap();
        assert_eq!(parsed.database.as_deref(), Some("shop"));
        assert_eq!(parsed.table, "orders");
    }

    #[test]
    fn parses_unqualified_table_name_without_database() {
        let parsed = parse_ddl_table("ALTER TABLE orders ADD COLUMN note TEXT").unwrap();
        assert_eq!(parsed.database, None);
        assert_eq!(parsed.table, "orders");
    }

    #[test]
    fn strips_backticks_before_matching() {
        let parsed = parse_ddl_table("ALTER TABLE `shop`.`orders` ADD COLUMN note TEXT").unwrap();
        assert_eq!(parsed.database.as_deref(), Some("shop"));
        assert_eq!(parsed.table, "orders");
    }

    #[test]
    fn parses_create_index_on_qualified_table() {
        let parsed = parse_ddl_table("CREATE INDEX idx_a ON shop.orders (a)").unwrap();
        assert_eq!(parsed.database.as_deref(), Some("shop"));
        assert_eq!(parsed.table, "orders");
    }

    #[test]
    fn skips_if_exists_qualifiers() {
        let parsed = parse_ddl_table("DROP TABLE IF EXISTS shop.orders").unwrap();
        assert_eq!(parsed.database.as_deref(), Some("shop"));
        assert_eq!(parsed.table, "orders");

        let parsed = parse_ddl_table("CREATE TABLE IF NOT EXISTS orders (id INT)").unwrap();
        assert_eq!(parsed.database, None);
        assert_eq!(parsed.table, "orders");
    }

    #[test]
    fn parses_database_level_ddl() {
        assert_eq!(parse_ddl_database("DROP DATABASE shop").unwrap(), "shop");
        assert_eq!(parse_ddl_database("CREATE DATABASE IF NOT EXISTS shop").unwrap(), "shop");
        assert!(parse_ddl_database("ALTER TABLE shop.orders ADD COLUMN x INT").is_none());
    }

    #[test]
    fn parses_dml_statement_forms() {
        let parsed = parse_dml_table("INSERT INTO shop.orders (id) VALUES (1)").unwrap();
        assert_eq!(parsed.database.as_deref(), Some("shop"));
        assert_eq!(parsed.table, "orders");

        let parsed = parse_dml_table("UPDATE orders SET total = 1 WHERE id = 1").unwrap();
        assert_eq!(parsed.database, None);
        assert_eq!(parsed.table, "orders");

        let parsed = parse_dml_table("DELETE FROM `shop`.`orders` WHERE id = 1").unwrap();
        assert_eq!(parsed.database.as_deref(), Some("shop"));
        assert!(parse_dml_table("SELECT * FROM shop.orders").is_none());
    }
}
