//! Entry point: subcommand dispatch, signal handling, and the wiring that
//! assembles each subcommand's `Consumer`/`SchemaCache`/`SinkAdapter`
//! collaborators.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use dbkit_cdc::cancel::CancellationToken;
use dbkit_cdc::cli::{BinlogSqlArgs, BinlogSqlMode, Cli, Command, RedisWriteMode as CliRedisWriteMode, SyncArgs};
use dbkit_cdc::consumer::{Consumer, ConsumerOptions, EventSource, FileSequence, Output};
use dbkit_cdc::error::{Error, Result};
use dbkit_cdc::model::{Position, TableKey};
use dbkit_cdc::protocol::connection::MysqlConnection;
use dbkit_cdc::protocol::handshake::is_legacy_server;
use dbkit_cdc::schema_cache::SchemaCache;
use dbkit_cdc::sql_render::output::Sink as OutputSink;
use dbkit_cdc::sql_render::{Mode, Renderer};
use dbkit_cdc::util::time::parse_local_datetime;
use dbkit_cdc::{analyzer, bootstrap, checkpoint, config, logging, sink};

/// How long a `--stop-never false` session runs before stopping cleanly.
const BOUNDED_RUN_DURATION: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone());

    if let Some(runid) = &cli.runid {
        info!(runid, run_type = cli.run_type.as_deref().unwrap_or(""), "starting");
    }

    let result = match &cli.command {
        Command::Binlogsql(args) => run_binlogsql(args, cancel),
        Command::Sync(args) => run_sync(args, cli.config.clone(), cancel),
        Command::Filter(_) => Err(Error::Configuration(
            "the `filter` subcommand is an external mysqldump-text-filter collaborator, not implemented in this build".into(),
        )),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Cancelled) => {
            info!("exiting cleanly after cancellation");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn install_signal_handlers(cancel: CancellationToken) {
    let mut signals = match signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers, cancellation will only be reachable by other means");
            return;
        }
    };
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("received shutdown signal, cancelling");
            cancel.cancel();
        }
    });
}

fn parse_time_flag(value: Option<&str>, flag: &str) -> Result<Option<i64>> {
    match value {
        None => Ok(None),
        Some(s) => parse_local_datetime(s)
            .map(Some)
            .ok_or_else(|| Error::Configuration(format!("{flag} must be 'YYYY-MM-DD HH:MM:SS', got '{s}'"))),
    }
}

fn run_binlogsql(args: &BinlogSqlArgs, cancel: CancellationToken) -> Result<()> {
    if args.mode == BinlogSqlMode::Stat {
        let Some(dir) = &args.binlog_dir else {
            return Err(Error::Configuration("--mode stat requires --binlog-dir".into()));
        };
        for file_stats in analyzer::analyze_dir(dir)? {
            println!("{}:", file_stats.file_name);
            for table in &file_stats.tables {
                println!("  {table}");
            }
        }
        return Ok(());
    }

    if args.ip.is_empty() || args.port == 0 || args.user.is_empty() || args.password.is_empty() {
        return Err(Error::Configuration(
            "binlogsql requires ip, port, user, and password (the user needs REPLICATION SLAVE, REPLICATION CLIENT, SUPER)".into(),
        ));
    }

    let mut schema_conn = MysqlConnection::connect(&args.ip, args.port, &args.user, &args.password, &args.db, &args.charset)?;

    // 5.5.x primaries cannot serve this client's replication session;
    // replay their binlog files from disk instead.
    let legacy = is_legacy_server(schema_conn.server_version());
    let (source, start_position) = if legacy {
        let Some(dir) = &args.binlog_dir else {
            return Err(Error::Configuration(format!(
                "server version {} needs the file-based fallback: pass --binlog-dir",
                schema_conn.server_version()
            )));
        };
        info!(version = schema_conn.server_version(), dir = %dir.display(), "legacy server detected, replaying binlog files from disk");
        let names = analyzer::binlog_files_in_dir(dir)?;
        let start_position = Position::new(names[0].clone(), Position::FIRST_EVENT_OFFSET);
        (EventSource::Files(FileSequence::new(dir.clone(), names)), start_position)
    } else {
        let start_position = if args.start_file.is_empty() {
            bootstrap::show_master_status(&mut schema_conn)?
        } else {
            Position::new(args.start_file.clone(), args.start_pose.max(Position::FIRST_EVENT_OFFSET))
        };
        let mut replication = MysqlConnection::connect(&args.ip, args.port, &args.user, &args.password, &args.db, &args.charset)?;
        replication.register_slave(args.serverid, "dbkit-cdc")?;
        replication.start_dump(args.serverid, &start_position.file, start_position.offset)?;
        (EventSource::Live(replication), start_position)
    };

    let sink = match &args.output {
        Some(path) => OutputSink::to_file(path)?,
        None => OutputSink::stdout(),
    };
    let mode = if args.mode == BinlogSqlMode::Flashback { Mode::Flashback } else { Mode::General };
    let output = Output::Render { renderer: Renderer::new(mode), sink };

    let scope = if !args.db.is_empty() && !args.table.is_empty() {
        vec![TableKey::new(args.db.clone(), args.table.clone())]
    } else {
        Vec::new()
    };

    let options = ConsumerOptions {
        stop_file: if args.stop_file.is_empty() { None } else { Some(args.stop_file.clone()) },
        stop_offset: if args.stop_pose == 0 { None } else { Some(args.stop_pose) },
        run_duration: if args.stop_never { None } else { Some(BOUNDED_RUN_DURATION) },
        scope,
        start_time: parse_time_flag(args.start_time.as_deref(), "--start-time")?,
        stop_time: parse_time_flag(args.stop_time.as_deref(), "--stop-time")?,
        ddl_enabled: args.ddl,
        rotate_markers: args.rotate,
    };

    let mut consumer = Consumer::new(source, schema_conn, SchemaCache::new(), None, cancel, options, output);
    match consumer.run(start_position) {
        Ok(()) | Err(Error::Cancelled) => Ok(()),
        Err(e) => Err(e),
    }
}

fn run_sync(args: &SyncArgs, global_config: Option<PathBuf>, cancel: CancellationToken) -> Result<()> {
    let config_path = args
        .conf
        .clone()
        .or(global_config)
        .ok_or_else(|| Error::Configuration("sync requires --conf <path> (or the global --config)".into()))?;

    let config = config::Config::load(&config_path)?;
    config::validate(&config)?;

    let mut sink_config: config::SinkConfig = (&config).into();
    sink_config.redis_write_mode = match args.redis_write_mode {
        CliRedisWriteMode::Batch => config::RedisWriteMode::Batch,
        CliRedisWriteMode::Single => config::RedisWriteMode::Single,
    };
    sink_config.redis_write_batch_size = args.redis_write_batch_size;

    let sink_adapter = sink::build(&sink_config)?;
    let sink_pool = std::sync::Arc::new(std::sync::Mutex::new(sink_adapter));

    let mut schema_conn = MysqlConnection::connect(
        &config.source.ip,
        config.source.port,
        &config.source.user,
        &config.source.password,
        "",
        &config.source.charset,
    )?;

    let tables = bootstrap::tables_from_config(&config);
    let schema_cache = SchemaCache::new();
    schema_cache.preload(&mut schema_conn, &tables)?;

    let start_position = match config.source.position() {
        Some(position) => position,
        None if config.source.mode == config::SourceMode::Full => {
            let worker_pool = sink::pool::Pool::new(3, cancel.clone());
            let position = bootstrap::run(&mut schema_conn, &schema_cache, &tables, std::sync::Arc::clone(&sink_pool), &worker_pool)?;
            config::Config::persist_position(&config_path, &position)?;
            info!(position = %position, "full dump complete, streaming will start from the pinned position");
            position
        }
        None => bootstrap::show_master_status(&mut schema_conn)?,
    };

    let mut replication = MysqlConnection::connect(
        &config.source.ip,
        config.source.port,
        &config.source.user,
        &config.source.password,
        "",
        &config.source.charset,
    )?;
    replication.register_slave(config.source.server_id, "dbkit-cdc")?;
    replication.start_dump(config.source.server_id, &start_position.file, start_position.offset)?;

    let output = Output::Sink(extract_sink(sink_pool)?);
    let options = ConsumerOptions { scope: tables, ddl_enabled: true, rotate_markers: false, ..Default::default() };
    let checkpoint = checkpoint::CheckpointManager::new(config_path)
        .with_thresholds(args.rewrite_event_interval, std::time::Duration::from_secs(args.rewrite_time_interval));

    let mut consumer = Consumer::new(
        EventSource::Live(replication),
        schema_conn,
        schema_cache,
        Some(checkpoint),
        cancel,
        options,
        output,
    );
    match consumer.run(start_position) {
        Ok(()) | Err(Error::Cancelled) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Unwraps the `Arc<Mutex<_>>` the bootstrap snapshot shares with the live
/// consumer back into an owned `Box<dyn SinkAdapter>`, once the snapshot (if
/// any) has finished and no other clone remains.
fn extract_sink(sink: std::sync::Arc<std::sync::Mutex<Box<dyn sink::SinkAdapter>>>) -> Result<Box<dyn sink::SinkAdapter>> {
    std::sync::Arc::try_unwrap(sink)
        .map(|mutex| mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()))
        .map_err(|_| Error::Connectivity("sink adapter is still shared after bootstrap completed".into()))
}
