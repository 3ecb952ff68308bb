//! Sink adapter trait and the batch types flowing into it. Both sink
//! variants branch on the same three DML kinds and accumulate work before
//! flushing, which is what the `apply`/`flush` split expresses.

pub mod document;
pub mod kv;
pub mod pool;

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::config::{SinkConfig, SinkKind};
use crate::error::{Error, Result};
use crate::model::{RowEvent, TableSchema};

const RETRY_MAX_ATTEMPTS: u32 = 4;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(100);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Retries `op` on transient failures with exponential backoff capped at
/// [`RETRY_BACKOFF_CAP`]; configuration/authentication failures surface
/// immediately.
pub(crate) fn with_retries<T>(what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < RETRY_MAX_ATTEMPTS => {
                let backoff = (RETRY_BACKOFF_BASE * 2u32.pow(attempt)).min(RETRY_BACKOFF_CAP);
                warn!(op = what, error = %e, attempt, "transient sink error, retrying after backoff");
                thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One flush worth of work for a sink, already resolved against a schema.
pub struct MutationBatch<'a> {
    pub schema: &'a TableSchema,
    pub event: &'a RowEvent,
}

/// Per-table overrides from the config's `mapping` block: an optional
/// rename on the target and an optional column subset to ship.
#[derive(Debug, Clone, Default)]
pub struct TableMapping {
    pub target_name: Option<String>,
    pub columns: Vec<String>,
}

/// Case-insensitive `(db, table)` lookup of [`TableMapping`]s, shared by
/// both sink variants.
#[derive(Debug, Default)]
pub struct MappingIndex {
    entries: std::collections::HashMap<String, TableMapping>,
}

impl MappingIndex {
    pub fn from_entries(mapping: &[crate::config::MappingEntry]) -> Self {
        let mut entries = std::collections::HashMap::new();
        for entry in mapping {
            for table in &entry.tables {
                let key = crate::model::TableKey::new(entry.database.clone(), table.table.clone()).ci_key();
                entries.insert(
                    key,
                    TableMapping { target_name: table.target_name.clone(), columns: table.columns.clone() },
                );
            }
        }
        Self { entries }
    }

    /// This table's overrides, or an empty [`TableMapping`] (no rename, all
    /// columns) when the config doesn't mention it.
    pub fn table(&self, key: &crate::model::TableKey) -> &TableMapping {
        static DEFAULT: TableMapping = TableMapping { target_name: None, columns: Vec::new() };
        self.entries.get(&key.ci_key()).unwrap_or(&DEFAULT)
    }
}

pub trait SinkAdapter: Send {
    fn apply(&mut self, batch: MutationBatch<'_>) -> Result<()>;

    /// Ships every row of a bootstrap snapshot for one table.
    fn dump(&mut self, schema: &TableSchema, rows: Vec<Vec<crate::model::Value>>) -> Result<()>;

    /// Flushes any buffered writes accumulated by `apply` in batch mode.
    fn flush(&mut self) -> Result<()>;
}

/// Builds the configured sink. Target types this build doesn't implement
/// are parseable config but produce a real startup error rather than a
/// silent no-op.
pub fn build(config: &SinkConfig) -> Result<Box<dyn SinkAdapter>> {
    match config.kind {
        SinkKind::Redis => Ok(Box::new(kv::RedisSink::connect(config)?)),
        SinkKind::MongoDb => Ok(Box::new(document::MongoSink::connect(config)?)),
        SinkKind::Elasticsearch | SinkKind::Kafka => Err(Error::Configuration(format!(
            "sink type {:?} is not implemented in this build",
            config.kind
        ))),
    }
}
