//! Stream consumer: the replication main loop. Rotate advances the current
//! position, Query is screened for DDL, row events resolve a schema and
//! dispatch downstream, Xid closes out a transaction, and everything else
//! is discarded after its position is recorded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::binlog::decoder::Decoder;
use crate::binlog::event::{event_type, Event, EventHeader, RotateEvent, RowsPayload};
use crate::binlog::file_reader::FileReader;
use crate::cancel::CancellationToken;
use crate::checkpoint::CheckpointManager;
use crate::ddl;
use crate::error::{Error, Result};
use crate::model::{Position, RowEvent, TableKey};
use crate::protocol::connection::MysqlConnection;
use crate::schema_cache::SchemaCache;
use crate::sink::SinkAdapter;
use crate::sql_render::output::Sink as OutputSink;
use crate::sql_render::Renderer;

const RAW_PACKET_TIMEOUT: Duration = Duration::from_secs(1);

/// Where decoded row events go: rendered SQL text, or a live sink adapter.
/// `binlogsql` wires up the former, `sync` the latter; the event loop is
/// the same either way.
pub enum Output {
    Render { renderer: Renderer, sink: OutputSink },
    Sink(Box<dyn SinkAdapter>),
}

impl Output {
    fn dispatch(&mut self, event: &RowEvent, schema: &crate::model::TableSchema, position: &Position) -> Result<()> {
        match self {
            Output::Render { renderer, sink } => renderer.render_and_emit(event, schema, position, sink),
            Output::Sink(sink) => sink.apply(crate::sink::MutationBatch { schema, event }),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Output::Render { .. } => Ok(()),
            Output::Sink(sink) => sink.flush(),
        }
    }
}

/// What the consumer drains: a live replication session, or a directory of
/// binlog files replayed through the offline parser when a 5.5.x primary
/// cannot serve this client's replication session.
pub enum EventSource {
    Live(MysqlConnection),
    Files(FileSequence),
}

/// Replays `mysql-bin.NNNNNN` files from a directory in ascending filename
/// order, synthesizing a Rotate whenever it moves to the next file so
/// position tracking and rotation markers behave exactly as on the live
/// stream.
pub struct FileSequence {
    dir: PathBuf,
    names: Vec<String>,
    index: usize,
    reader: Option<FileReader>,
}

impl FileSequence {
    pub fn new(dir: PathBuf, names: Vec<String>) -> Self {
        Self { dir, names, index: 0, reader: None }
    }

    /// `Ok(None)` means the directory is exhausted.
    fn next(&mut self) -> Result<Option<(EventHeader, Event)>> {
        loop {
            if let Some(mut reader) = self.reader.take() {
                if let Some(item) = reader.next_event()? {
                    self.reader = Some(reader);
                    return Ok(Some(item));
                }
                continue;
            }
            let Some(name) = self.names.get(self.index) else { return Ok(None) };
            self.index += 1;
            self.reader = Some(FileReader::open(&self.dir.join(name))?);
            let rotate = Event::Rotate(RotateEvent {
                next_position: Position::FIRST_EVENT_OFFSET as u64,
                next_file: name.clone(),
            });
            let header = EventHeader {
                timestamp: 0,
                event_type: event_type::ROTATE_EVENT,
                server_id: 0,
                event_length: 0,
                next_position: Position::FIRST_EVENT_OFFSET,
                flags: 0,
            };
            return Ok(Some((header, rotate)));
        }
    }
}

/// Stop conditions and scope filters.
#[derive(Default)]
pub struct ConsumerOptions {
    pub stop_file: Option<String>,
    pub stop_offset: Option<u32>,
    /// `None` means "run forever" (`stopNever = true`); `Some(d)` wraps the
    /// session in a finite deadline from the moment `run` starts.
    pub run_duration: Option<Duration>,
    /// Tables in scope; empty means every table is in scope.
    pub scope: Vec<TableKey>,
    /// Time window bounds as epoch seconds, compared against each event
    /// header's timestamp; events outside the window are skipped, though
    /// their positions are still recorded.
    pub start_time: Option<i64>,
    pub stop_time: Option<i64>,
    pub ddl_enabled: bool,
    pub rotate_markers: bool,
}

impl ConsumerOptions {
    fn in_scope(&self, table: &TableKey) -> bool {
        self.scope.is_empty() || self.scope.iter().any(|t| t == table)
    }

    fn past_stop(&self, position: &Position) -> bool {
        match (&self.stop_file, self.stop_offset) {
            (Some(file), Some(offset)) => *position >= Position::new(file.clone(), offset),
            _ => false,
        }
    }

    fn in_time_window(&self, timestamp: u32) -> bool {
        let ts = timestamp as i64;
        self.start_time.map_or(true, |start| ts >= start) && self.stop_time.map_or(true, |stop| ts <= stop)
    }
}

pub struct Consumer {
    source: EventSource,
    schema_conn: MysqlConnection,
    schema_cache: SchemaCache,
    checkpoint: Option<CheckpointManager>,
    cancel: CancellationToken,
    options: ConsumerOptions,
    output: Output,
}

impl Consumer {
    pub fn new(
        source: EventSource,
        schema_conn: MysqlConnection,
        schema_cache: SchemaCache,
        checkpoint: Option<CheckpointManager>,
        cancel: CancellationToken,
        options: ConsumerOptions,
        output: Output,
    ) -> Self {
        Self { source, schema_conn, schema_cache, checkpoint, cancel, options, output }
    }

    /// Persists `position` through the checkpoint manager when one is
    /// configured; `binlogsql` runs with none, since it takes its starting
    /// position from CLI flags each invocation rather than a durable file.
    /// A persist failure is logged, not fatal: the next threshold tick
    /// retries, and the worst case is a wider at-least-once replay window.
    fn advance_checkpoint(&mut self, position: Position) {
        if let Some(checkpoint) = &mut self.checkpoint {
            if let Err(e) = checkpoint.advance(position) {
                warn!(error = %e, "checkpoint persist failed, will retry on the next threshold");
            }
        }
    }

    /// Runs until cancellation, an unrecoverable session error, or a
    /// configured stop position/deadline is reached.
    pub fn run(&mut self, start_position: Position) -> Result<()> {
        info!(position = %start_position, "stream consumer starting");
        let deadline = self.options.run_duration.map(|d| Instant::now() + d);

        let mut decoder = Decoder::new();
        let mut table_ids: HashMap<u64, TableKey> = HashMap::new();
        let mut position = start_position;

        loop {
            if self.cancel.is_cancelled() {
                info!("stream consumer cancelled");
                self.output.flush()?;
                self.flush_checkpoint();
                return Err(Error::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("stream consumer reached its run deadline, stopping cleanly");
                    self.output.flush()?;
                    self.flush_checkpoint();
                    return Ok(());
                }
            }
            if self.options.past_stop(&position) {
                info!(position = %position, "stream consumer reached its configured stop position");
                self.output.flush()?;
                self.flush_checkpoint();
                return Ok(());
            }

            let item = match &mut self.source {
                EventSource::Live(conn) => match conn.read_raw_packet(RAW_PACKET_TIMEOUT) {
                    Ok(payload) => {
                        let Some((&marker, body)) = payload.split_first() else { continue };
                        if marker != 0x00 {
                            return Err(Error::Protocol(format!("unexpected replication packet marker {marker:#x}")));
                        }
                        let header = Decoder::parse_header(body)?;
                        match decoder.decode(&header, body) {
                            Ok(event) => Some((header, event)),
                            // Data-level decode failures skip the event; the
                            // packet is already consumed, so the stream stays
                            // framed.
                            Err(e @ Error::Data(_)) => {
                                warn!(error = %e, event_type = header.event_type, "skipping undecodable event");
                                position.offset = header.next_position;
                                None
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    Err(e) if e.is_poll_timeout() => {
                        debug!("no event within poll window, re-checking cancellation");
                        None
                    }
                    Err(e) => return Err(e),
                },
                EventSource::Files(sequence) => match sequence.next() {
                    Ok(Some(item)) => Some(item),
                    Ok(None) => {
                        info!("reached the end of the binlog directory, stopping cleanly");
                        self.output.flush()?;
                        self.flush_checkpoint();
                        return Ok(());
                    }
                    Err(e @ Error::Data(_)) => {
                        warn!(error = %e, "skipping undecodable event in binlog file");
                        None
                    }
                    Err(e) => return Err(e),
                },
            };
            let Some((header, event)) = item else { continue };

            match event {
                Event::Rotate(rotate) => {
                    position = Position::new(rotate.next_file, rotate.next_position as u32);
                    self.advance_checkpoint(position.clone());
                    if self.options.rotate_markers {
                        if let Output::Render { sink, .. } = &self.output {
                            sink.write_line(&format!("-- Rotate to {}, pos {}", position.file, position.offset))?;
                        }
                    }
                }
                Event::Query(query) => {
                    position.offset = header.next_position;
                    if self.options.in_time_window(header.timestamp)
                        && self.options.ddl_enabled
                        && ddl::is_ddl(&query.query)
                    {
                        self.handle_ddl(&query.query, &query.database);
                    }
                    self.advance_checkpoint(position.clone());
                }
                Event::TableMap(table_map) => {
                    table_ids.insert(table_map.table_id, TableKey::new(table_map.database.clone(), table_map.table.clone()));
                    position.offset = header.next_position;
                }
                Event::Rows(rows) => {
                    position.offset = header.next_position;
                    if self.options.in_time_window(header.timestamp) {
                        self.handle_rows(&table_ids, rows, &position)?;
                    }
                    self.advance_checkpoint(position.clone());
                }
                Event::Xid(xid) => {
                    position.offset = header.next_position;
                    if self.options.in_time_window(header.timestamp) {
                        if let Output::Render { sink, .. } = &self.output {
                            sink.write_line(&format!("/* Xid={}, Position={} */", xid.xid, position.offset))?;
                        }
                    }
                    self.advance_checkpoint(position.clone());
                }
                Event::FormatDescription(_) | Event::Heartbeat => {
                    position.offset = header.next_position;
                }
                Event::Unknown(kind) => {
                    position.offset = header.next_position;
                    debug!(event_type = kind, "discarding unhandled event type");
                }
            }
        }
    }

    /// Final persist on shutdown: best-effort, a failure here is logged and
    /// the next run resumes from the previous checkpoint.
    fn flush_checkpoint(&mut self) {
        if let Some(checkpoint) = &mut self.checkpoint {
            if let Err(e) = checkpoint.flush() {
                warn!(error = %e, "final checkpoint persist failed");
            }
        }
    }

    /// Invalidate-and-refill for a DDL statement touching an in-scope
    /// table. A failed refill leaves the entry invalidated so the table's
    /// next row event retries the lookup.
    fn handle_ddl(&mut self, query: &str, current_database: &str) {
        if let Some(database) = ddl::parse_ddl_database(query) {
            debug!(database, "database-level DDL observed, dropping cached schemas under it");
            self.schema_cache.invalidate_database(&database);
            return;
        }
        let Some(parsed) = ddl::parse_ddl_table(query) else {
            warn!(query, "DDL statement without a resolvable table name, skipping invalidation");
            return;
        };
        let table = TableKey::new(
            parsed.database.unwrap_or_else(|| current_database.to_string()),
            parsed.table,
        );
        if !self.options.in_scope(&table) {
            return;
        }
        self.schema_cache.invalidate(&table);
        match self.schema_cache.get_or_resolve(&mut self.schema_conn, &table) {
            Ok(schema) => debug!(table = %table, columns = schema.columns.len(), "schema refreshed after DDL"),
            Err(e) => warn!(table = %table, error = %e, "schema refresh after DDL failed, will retry on the table's next row event"),
        }
    }

    fn handle_rows(&mut self, table_ids: &HashMap<u64, TableKey>, rows: crate::binlog::event::RowsEvent, position: &Position) -> Result<()> {
        let Some(table) = table_ids.get(&rows.table_id) else {
            warn!(table_id = rows.table_id, "rows event for an unknown table id, skipping (no preceding table map?)");
            return Ok(());
        };
        if !self.options.in_scope(table) {
            return Ok(());
        }

        let schema = self.schema_cache.get_or_resolve(&mut self.schema_conn, table)?;
        let row_width = match &rows.payload {
            RowsPayload::Write(rs) | RowsPayload::Delete(rs) => rs.first().map(|r| r.len()).unwrap_or(0),
            RowsPayload::Update(rs) => rs.first().map(|(_, after)| after.len()).unwrap_or(0),
        };
        if row_width != 0 && row_width != schema.columns.len() {
            warn!(table = %table, row_width, cached_width = schema.columns.len(), "row width does not match cached schema width");
        }

        let event = match rows.payload {
            RowsPayload::Write(rows) => RowEvent::Insert { table: table.clone(), rows },
            RowsPayload::Update(rows) => RowEvent::Update { table: table.clone(), rows },
            RowsPayload::Delete(rows) => RowEvent::Delete { table: table.clone(), rows },
        };
        self.output.dispatch(&event, &schema, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scope_admits_every_table() {
        let options = ConsumerOptions::default();
        assert!(options.in_scope(&TableKey::new("shop", "orders")));
    }

    #[test]
    fn nonempty_scope_only_admits_listed_tables() {
        let options = ConsumerOptions { scope: vec![TableKey::new("shop", "orders")], ..Default::default() };
        assert!(options.in_scope(&TableKey::new("shop", "orders")));
        assert!(!options.in_scope(&TableKey::new("shop", "users")));
    }

    #[test]
    fn past_stop_is_false_without_a_configured_stop_position() {
        let options = ConsumerOptions::default();
        assert!(!options.past_stop(&Position::new("mysql-bin.000005", 999)));
    }

    #[test]
    fn past_stop_compares_file_then_offset() {
        let options = ConsumerOptions {
            stop_file: Some("mysql-bin.000002".to_string()),
            stop_offset: Some(100),
            ..Default::default()
        };
        assert!(!options.past_stop(&Position::new("mysql-bin.000001", 999)));
        assert!(!options.past_stop(&Position::new("mysql-bin.000002", 99)));
        assert!(options.past_stop(&Position::new("mysql-bin.000002", 100)));
        assert!(options.past_stop(&Position::new("mysql-bin.000003", 4)));
    }

    #[test]
    fn unbounded_time_window_admits_everything() {
        let options = ConsumerOptions::default();
        assert!(options.in_time_window(0));
        assert!(options.in_time_window(u32::MAX));
    }

    #[test]
    fn time_window_excludes_events_outside_both_bounds() {
        let options = ConsumerOptions {
            start_time: Some(1_000),
            stop_time: Some(2_000),
            ..Default::default()
        };
        assert!(!options.in_time_window(999));
        assert!(options.in_time_window(1_000));
        assert!(options.in_time_window(1_500));
        assert!(options.in_time_window(2_000));
        assert!(!options.in_time_window(2_001));
    }

    #[test]
    fn half_open_time_window_only_checks_its_configured_bound() {
        let from = ConsumerOptions { start_time: Some(1_000), ..Default::default() };
        assert!(!from.in_time_window(999));
        assert!(from.in_time_window(u32::MAX));

        let until = ConsumerOptions { stop_time: Some(1_000), ..Default::default() };
        assert!(until.in_time_window(0));
        assert!(!until.in_time_window(1_001));
    }
}
