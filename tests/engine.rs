//! Cross-module integration tests: a row event rendered as SQL and turned
//! into a sink key should agree with each other and with the config layer
//! that ultimately selects which tables and sinks the engine runs against.

use dbkit_cdc::config::{self, Config, MappingEntry, MappingTable, SinkKind, SourceConfig, SourceMode, TargetConfig};
use dbkit_cdc::key::{filter_for, key_for, Filter, KeyPolicy};
use dbkit_cdc::model::{ColumnDescriptor, RowEvent, TableKey, TableSchema, Value};
use dbkit_cdc::sink::TableMapping;
use dbkit_cdc::sql_render::{Mode, Renderer};

fn orders_schema() -> TableSchema {
    TableSchema::new(
        TableKey::new("shop", "orders"),
        vec![ColumnDescriptor::new("id", "int"), ColumnDescriptor::new("total", "decimal")],
        vec!["id".to_string()],
    )
}

#[test]
fn rendered_delete_and_sink_key_agree_on_the_same_row() {
    let schema = orders_schema();
    let row = vec![Value::Int(7), Value::Decimal("19.99".into())];

    let renderer = Renderer::new(Mode::General);
    let event = RowEvent::Delete { table: schema.key.clone(), rows: vec![row.clone()] };
    let statements = renderer.render(&event, &schema);
    assert_eq!(statements, vec!["DELETE FROM shop.orders WHERE id = 7 AND total = 19.99;"]);

    assert_eq!(key_for(&schema, &row, &TableMapping::default()), "orders:7");
    match filter_for(&schema, &row, KeyPolicy::default(), &TableMapping::default()) {
        Filter::ById(Value::Int(7)) => {}
        other => panic!("expected ById(7), got {other:?}"),
    }
}

#[test]
fn flashback_of_an_insert_deletes_the_same_row_the_forward_insert_wrote() {
    let schema = orders_schema();
    let row = vec![Value::Int(3), Value::Decimal("5.00".into())];

    let general = Renderer::new(Mode::General);
    let flashback = Renderer::new(Mode::Flashback);
    let event = RowEvent::Insert { table: schema.key.clone(), rows: vec![row.clone()] };

    let forward = general.render(&event, &schema);
    let inverse = flashback.render(&event, &schema);

    assert_eq!(forward, vec!["INSERT INTO shop.orders (id, total) VALUES (3, 5.00);"]);
    assert_eq!(inverse, vec!["DELETE FROM shop.orders WHERE id = 3 AND total = 5.00;"]);
}

fn sample_config() -> Config {
    Config {
        source: SourceConfig {
            server_id: 42,
            ip: "10.0.0.5".into(),
            port: 3306,
            user: "repl".into(),
            password: "secret".into(),
            mode: SourceMode::Full,
            charset: "utf8mb4".into(),
            pos: String::new(),
        },
        target: TargetConfig { kind: SinkKind::Redis, redis: None, mongodb: None, elasticsearch: None, kafka: None },
        mapping: vec![MappingEntry {
            database: "shop".into(),
            tables: vec![
                MappingTable { table: "orders".into(), target_name: None, columns: Vec::new() },
                MappingTable { table: "users".into(), target_name: None, columns: Vec::new() },
            ],
        }],
    }
}

#[test]
fn validate_rejects_a_redis_target_with_no_redis_block() {
    let config = sample_config();
    let err = config::validate(&config).unwrap_err();
    assert!(err.to_string().contains("target.redis"));
}

#[test]
fn validate_rejects_a_zero_server_id() {
    let mut config = sample_config();
    config.target.kind = SinkKind::Redis;
    config.target.redis = Some(config::RedisConfig {
        mode: config::RedisMode::Standalone,
        standalone: Some(config::RedisStandalone { addr: "127.0.0.1:6379".into() }),
        sentinel: None,
        cluster: None,
        write_batch_size: 1000,
    });
    config.source.server_id = 0;
    let err = config::validate(&config).unwrap_err();
    assert!(err.to_string().contains("serverId"));
}

#[test]
fn mapping_flattens_into_the_same_table_keys_a_bootstrap_snapshot_would_scope_to() {
    let config = sample_config();
    let tables = dbkit_cdc::bootstrap::tables_from_config(&config);
    assert_eq!(tables, vec![TableKey::new("shop", "orders"), TableKey::new("shop", "users")]);
}

/// A serialized `QUERY_EVENT` as a 5.5-era statement-format binlog carries
/// it: 19-byte common header, then post-header and the statement text.
fn query_event(timestamp: u32, next_position: u32, db: &str, sql: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes()); // thread id
    body.extend_from_slice(&0u32.to_le_bytes()); // execution time
    body.push(db.len() as u8);
    body.extend_from_slice(&0u16.to_le_bytes()); // error code
    body.extend_from_slice(&0u16.to_le_bytes()); // status vars length
    body.extend_from_slice(db.as_bytes());
    body.push(0);
    body.extend_from_slice(sql.as_bytes());

    let event_length = (19 + body.len()) as u32;
    let mut event = Vec::new();
    event.extend_from_slice(&timestamp.to_le_bytes());
    event.push(2); // QUERY_EVENT
    event.extend_from_slice(&1u32.to_le_bytes()); // server id
    event.extend_from_slice(&event_length.to_le_bytes());
    event.extend_from_slice(&next_position.to_le_bytes());
    event.extend_from_slice(&0u16.to_le_bytes()); // flags
    event.extend_from_slice(&body);
    event
}

#[test]
fn analyzer_reports_tables_touched_by_statement_format_binlogs() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mysql-bin.000001");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&[0xfe, b'b', b'i', b'n']).unwrap();
    file.write_all(&query_event(1_700_000_000, 120, "shop", "INSERT INTO orders (id) VALUES (1)")).unwrap();
    file.write_all(&query_event(1_700_000_001, 240, "shop", "UPDATE `shop`.`users` SET name = 'x' WHERE id = 1")).unwrap();
    file.write_all(&query_event(1_700_000_002, 360, "shop", "INSERT INTO orders (id) VALUES (2)")).unwrap();
    drop(file);

    let stats = dbkit_cdc::analyzer::analyze_dir(dir.path()).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].file_name, "mysql-bin.000001");
    assert_eq!(stats[0].tables, vec![TableKey::new("shop", "orders"), TableKey::new("shop", "users")]);
}
