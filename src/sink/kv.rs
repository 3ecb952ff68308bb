//! Redis KV sink: three-topology connection setup (standalone,
//! sentinel-mastered, cluster), per-row batching with final-write-wins
//! coalescing, and pipelined hash-set flushes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use redis::cluster::{ClusterClient, ClusterConnection};
use redis::Commands;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::config::{RedisConfig, RedisMode, RedisSentinel, RedisWriteMode, SinkConfig};
use crate::error::{Error, Result};
use crate::key::key_for;
use crate::model::{RowEvent, TableSchema, Value};
use crate::sink::pool::Pool;
use crate::sink::{with_retries, MappingIndex, MutationBatch, SinkAdapter, TableMapping};

const FLUSH_COOLDOWN: Duration = Duration::from_millis(50);
const SINGLE_MODE_WORKERS: usize = 3;

/// One hash-set or delete against a single sink key.
enum Op {
    Write { key: String, fields: Vec<(String, String)> },
    Delete { key: String },
}

/// Pending batch-mode mutations, keyed by sink key. Within one buffer a key
/// has at most one effective final op: staging a write drops any staged
/// delete of the same key, and vice versa, so replaying a flushed buffer is
/// the final-write-wins projection of its events.
#[derive(Default)]
struct BatchBuffer {
    writes: HashMap<String, HashMap<String, String>>,
    deletes: HashSet<String>,
}

impl BatchBuffer {
    fn stage_write(&mut self, key: String, fields: HashMap<String, String>) {
        self.deletes.remove(&key);
        self.writes.insert(key, fields);
    }

    fn stage_delete(&mut self, key: String) {
        self.writes.remove(&key);
        self.deletes.insert(key);
    }

    fn len(&self) -> usize {
        self.writes.len() + self.deletes.len()
    }

    fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }

    fn take(&mut self) -> (HashMap<String, HashMap<String, String>>, Vec<String>) {
        (std::mem::take(&mut self.writes), self.deletes.drain().collect())
    }
}

/// A connection to whichever topology the config names. Sentinel resolves to
/// a standalone connection against the discovered master.
enum RedisConn {
    Standalone(redis::Connection),
    Cluster(ClusterConnection),
}

impl RedisConn {
    fn apply_op(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Write { key, fields } => self.set_fields(key, fields),
            Op::Delete { key } => self.delete(std::slice::from_ref(key)),
        }
    }

    fn set_fields(&mut self, key: &str, fields: &[(String, String)]) -> Result<()> {
        match self {
            RedisConn::Standalone(conn) => conn.hset_multiple(key, fields).map_err(Error::Redis),
            RedisConn::Cluster(conn) => conn.hset_multiple(key, fields).map_err(Error::Redis),
        }
    }

    /// Batch-mode delete: a single multi-key `DEL` at the flush boundary.
    /// Cluster mode issues one `DEL` per key instead, since the keys of one
    /// batch span hash slots.
    fn delete(&mut self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        match self {
            RedisConn::Standalone(conn) => conn.del(keys).map_err(Error::Redis),
            RedisConn::Cluster(conn) => {
                for key in keys {
                    let _: () = conn.del(key).map_err(Error::Redis)?;
                }
                Ok(())
            }
        }
    }

    /// One pipelined hash-set per key. Cluster mode writes key by key for
    /// the same slot-spanning reason as [`RedisConn::delete`].
    fn write_all(&mut self, writes: &HashMap<String, HashMap<String, String>>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        match self {
            RedisConn::Standalone(conn) => {
                let mut pipe = redis::pipe();
                for (key, fields) in writes {
                    let items: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                    pipe.hset_multiple(key, &items).ignore();
                }
                pipe.query::<()>(conn).map_err(Error::Redis)
            }
            RedisConn::Cluster(conn) => {
                for (key, fields) in writes {
                    let items: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                    let _: () = conn.hset_multiple(key, &items).map_err(Error::Redis)?;
                }
                Ok(())
            }
        }
    }
}

/// Single-mode dispatch: a bounded worker pool and one connection per
/// worker, so at most [`SINGLE_MODE_WORKERS`] writes are in flight at once.
struct SingleDispatch {
    pool: Pool,
    connections: Vec<Arc<Mutex<RedisConn>>>,
}

impl SingleDispatch {
    fn dispatch(&self, ops: Vec<Op>) -> Result<()> {
        let jobs: Vec<_> = ops
            .into_iter()
            .enumerate()
            .map(|(i, op)| {
                let conn = Arc::clone(&self.connections[i % self.connections.len()]);
                move || -> Result<()> {
                    let mut conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    with_retries("redis single write", || conn.apply_op(&op))
                }
            })
            .collect();

        for result in self.pool.scope(jobs) {
            result?;
        }
        Ok(())
    }
}

pub struct RedisSink {
    conn: RedisConn,
    batch_size: usize,
    buffer: BatchBuffer,
    mapping: MappingIndex,
    single: Option<SingleDispatch>,
}

impl RedisSink {
    pub fn connect(config: &SinkConfig) -> Result<Self> {
        let redis_config = config
            .redis
            .as_ref()
            .ok_or_else(|| Error::Configuration("target.redis is required for a redis sink".into()))?;

        let single = match config.redis_write_mode {
            RedisWriteMode::Batch => None,
            RedisWriteMode::Single => {
                let connections = (0..SINGLE_MODE_WORKERS)
                    .map(|_| open_connection(redis_config).map(|c| Arc::new(Mutex::new(c))))
                    .collect::<Result<Vec<_>>>()?;
                Some(SingleDispatch { pool: Pool::new(SINGLE_MODE_WORKERS, CancellationToken::new()), connections })
            }
        };

        Ok(Self {
            conn: open_connection(redis_config)?,
            batch_size: config.redis_write_batch_size.unwrap_or(redis_config.write_batch_size),
            buffer: BatchBuffer::default(),
            mapping: MappingIndex::from_entries(&config.mapping),
            single,
        })
    }

    fn stage(&mut self, op: Op) -> Result<()> {
        match op {
            Op::Write { key, fields } => self.buffer.stage_write(key, fields.into_iter().collect()),
            Op::Delete { key } => self.buffer.stage_delete(key),
        }
        if self.buffer.len() >= self.batch_size {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Flushes the whole buffer, then sleeps a bounded cooldown so a long
    /// run of full batches doesn't saturate the target.
    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let (writes, deletes) = self.buffer.take();
        let conn = &mut self.conn;
        with_retries("redis batch flush", || {
            conn.write_all(&writes)?;
            conn.delete(&deletes)
        })?;
        debug!(writes = writes.len(), deletes = deletes.len(), "flushed batch to redis");
        thread::sleep(FLUSH_COOLDOWN);
        Ok(())
    }

    fn ops_for(mapping: &MappingIndex, schema: &TableSchema, event: &RowEvent) -> Vec<Op> {
        let table = mapping.table(&schema.key);
        match event {
            RowEvent::Insert { rows, .. } => rows
                .iter()
                .map(|row| Op::Write { key: key_for(schema, row, table), fields: row_fields(schema, row, table) })
                .collect(),
            RowEvent::Update { rows, .. } => rows
                .iter()
                .map(|(_, after)| Op::Write { key: key_for(schema, after, table), fields: row_fields(schema, after, table) })
                .collect(),
            RowEvent::Delete { rows, .. } => {
                rows.iter().map(|row| Op::Delete { key: key_for(schema, row, table) }).collect()
            }
        }
    }
}

impl SinkAdapter for RedisSink {
    fn apply(&mut self, batch: MutationBatch<'_>) -> Result<()> {
        let ops = Self::ops_for(&self.mapping, batch.schema, batch.event);
        if let Some(dispatch) = &self.single {
            return dispatch.dispatch(ops);
        }
        for op in ops {
            self.stage(op)?;
        }
        Ok(())
    }

    /// Bootstrap rows go through the batch path in both modes; a snapshot is
    /// batch-shaped regardless of how the live stream is dispatched.
    fn dump(&mut self, schema: &TableSchema, rows: Vec<Vec<Value>>) -> Result<()> {
        for row in &rows {
            let table = self.mapping.table(&schema.key);
            let key = key_for(schema, row, table);
            let fields = row_fields(schema, row, table).into_iter().collect();
            self.buffer.stage_write(key, fields);
            if self.buffer.len() >= self.batch_size {
                self.flush_buffer()?;
            }
        }
        self.flush_buffer()
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_buffer()
    }
}

/// Field map for one row, restricted to the mapping's configured column
/// subset when it names one; NULLs are left out, so replaying a hash-set
/// never resurrects a cleared field with an empty placeholder.
fn row_fields(schema: &TableSchema, row: &[Value], mapping: &TableMapping) -> Vec<(String, String)> {
    schema
        .columns
        .iter()
        .enumerate()
        .filter_map(|(i, col)| {
            if !mapping.columns.is_empty() && !mapping.columns.iter().any(|c| c.eq_ignore_ascii_case(&col.name)) {
                return None;
            }
            let value = row.get(i)?;
            if value.is_null() {
                return None;
            }
            Some((col.name.clone(), value.raw_text()))
        })
        .collect()
}

fn open_connection(config: &RedisConfig) -> Result<RedisConn> {
    match config.mode {
        RedisMode::Standalone => {
            let standalone = config
                .standalone
                .as_ref()
                .ok_or_else(|| Error::Configuration("redis.mode is standalone but redis.standalone is missing".into()))?;
            connect_standalone(&standalone.addr)
        }
        RedisMode::Sentinel => {
            let sentinel = config
                .sentinel
                .as_ref()
                .ok_or_else(|| Error::Configuration("redis.mode is sentinel but redis.sentinel is missing".into()))?;
            connect_standalone(&resolve_sentinel_master(sentinel)?)
        }
        RedisMode::Cluster => {
            let cluster = config
                .cluster
                .as_ref()
                .ok_or_else(|| Error::Configuration("redis.mode is cluster but redis.cluster is missing".into()))?;
            let urls: Vec<String> = cluster.addrs.iter().map(|addr| format!("redis://{addr}")).collect();
            let client = ClusterClient::open(urls).map_err(Error::Redis)?;
            Ok(RedisConn::Cluster(client.get_connection().map_err(Error::Redis)?))
        }
    }
}

fn connect_standalone(addr: &str) -> Result<RedisConn> {
    let client = redis::Client::open(format!("redis://{addr}")).map_err(Error::Redis)?;
    Ok(RedisConn::Standalone(client.get_connection().map_err(Error::Redis)?))
}

/// Asks each configured sentinel in turn for the current master address
/// (`SENTINEL get-master-addr-by-name`), the same discovery a
/// failover-aware client performs internally.
fn resolve_sentinel_master(sentinel: &RedisSentinel) -> Result<String> {
    for addr in &sentinel.addrs {
        let client = match redis::Client::open(format!("redis://{addr}")) {
            Ok(client) => client,
            Err(e) => {
                warn!(sentinel = %addr, error = %e, "skipping malformed sentinel address");
                continue;
            }
        };
        let mut conn = match client.get_connection() {
            Ok(conn) => conn,
            Err(e) => {
                warn!(sentinel = %addr, error = %e, "sentinel unreachable, trying next");
                continue;
            }
        };
        let reply: Vec<String> = match redis::cmd("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(&sentinel.master_name)
            .query(&mut conn)
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(sentinel = %addr, error = %e, "sentinel query failed, trying next");
                continue;
            }
        };
        if let [host, port] = reply.as_slice() {
            return Ok(format!("{host}:{port}"));
        }
    }
    Err(Error::Configuration(format!(
        "no configured sentinel could resolve master '{}'",
        sentinel.master_name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDescriptor, TableKey};

    fn schema() -> TableSchema {
        TableSchema::new(
            TableKey::new("shop", "orders"),
            vec![ColumnDescriptor::new("id", "int"), ColumnDescriptor::new("total", "decimal")],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn row_fields_skip_null_values() {
        let row = vec![Value::Int(1), Value::Null];
        let fields = row_fields(&schema(), &row, &TableMapping::default());
        assert_eq!(fields, vec![("id".to_string(), "1".to_string())]);
    }

    #[test]
    fn row_fields_respect_a_configured_column_subset() {
        let row = vec![Value::Int(1), Value::Decimal("9.99".into())];
        let mapping = TableMapping { target_name: None, columns: vec!["id".to_string()] };
        let fields = row_fields(&schema(), &row, &mapping);
        assert_eq!(fields, vec![("id".to_string(), "1".to_string())]);
    }

    #[test]
    fn later_write_supersedes_earlier_write_to_same_key() {
        let mut buffer = BatchBuffer::default();
        buffer.stage_write("orders:1".into(), HashMap::from([("total".to_string(), "1.00".to_string())]));
        buffer.stage_write("orders:1".into(), HashMap::from([("total".to_string(), "2.00".to_string())]));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.writes["orders:1"]["total"], "2.00");
    }

    #[test]
    fn delete_cancels_staged_write_and_write_cancels_staged_delete() {
        let mut buffer = BatchBuffer::default();
        buffer.stage_write("orders:1".into(), HashMap::new());
        buffer.stage_delete("orders:1".into());
        assert!(buffer.writes.is_empty());
        assert!(buffer.deletes.contains("orders:1"));

        buffer.stage_write("orders:1".into(), HashMap::new());
        assert!(buffer.deletes.is_empty());
        assert!(buffer.writes.contains_key("orders:1"));
    }

    #[test]
    fn update_event_stages_a_write_keyed_by_the_after_image() {
        let schema = schema();
        let before = vec![Value::Int(1), Value::Decimal("1.00".into())];
        let after = vec![Value::Int(1), Value::Decimal("2.00".into())];
        let event = RowEvent::Update { table: schema.key.clone(), rows: vec![(before, after)] };
        let ops = RedisSink::ops_for(&MappingIndex::default(), &schema, &event);
        match ops.as_slice() {
            [Op::Write { key, fields }] => {
                assert_eq!(key, "orders:1");
                assert_eq!(fields.iter().find(|(k, _)| k == "total").map(|(_, v)| v.as_str()), Some("2.00"));
            }
            _ => panic!("expected exactly one write op"),
        }
    }

    #[test]
    fn delete_event_stages_a_delete_per_row() {
        let schema = schema();
        let event = RowEvent::Delete {
            table: schema.key.clone(),
            rows: vec![vec![Value::Int(1), Value::Null], vec![Value::Int(2), Value::Null]],
        };
        let ops = RedisSink::ops_for(&MappingIndex::default(), &schema, &event);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], Op::Delete { key } if key == "orders:1"));
    }
}
