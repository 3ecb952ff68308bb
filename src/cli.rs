//! Command-line surface: the `binlogsql` / `sync` / `filter` subcommands
//! and their flags, plus the global flags shared by all three.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "dbkit-cdc", about = "MySQL binlog change-data-capture engine")]
pub struct Cli {
    /// Correlates log lines from one invocation across process restarts.
    #[arg(long, global = true)]
    pub runid: Option<String>,

    /// Free-form deployment tag, forwarded into log lines only.
    #[arg(long = "type", global = true)]
    pub run_type: Option<String>,

    #[arg(long, global = true)]
    pub debug: bool,

    /// Path to the `sync` subcommand's YAML config; unused by `binlogsql`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render SQL, flashback SQL, or per-file write-touch statistics from a
    /// binlog stream or directory.
    Binlogsql(BinlogSqlArgs),
    /// Run the live replication pipeline from a YAML config.
    Sync(SyncArgs),
    /// The mysqldump text filter; an external collaborator, not implemented
    /// in this build.
    Filter(FilterArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "lowercase")]
pub enum BinlogSqlMode {
    General,
    Flashback,
    Stat,
}

#[derive(Parser, Debug)]
pub struct BinlogSqlArgs {
    #[arg(long, default_value = "")]
    pub ip: String,
    #[arg(long, default_value_t = 0)]
    pub port: u16,
    #[arg(long, default_value = "")]
    pub user: String,
    #[arg(long, default_value = "")]
    pub password: String,
    #[arg(long, default_value = "")]
    pub db: String,
    #[arg(long, default_value = "")]
    pub table: String,
    #[arg(long, value_enum, default_value = "general")]
    pub mode: BinlogSqlMode,
    #[arg(long, default_value_t = 8818)]
    pub serverid: u32,
    #[arg(long, default_value = "utf8mb4")]
    pub charset: String,
    #[arg(long, default_value = "")]
    pub start_file: String,
    #[arg(long, default_value = "")]
    pub stop_file: String,
    #[arg(long, default_value_t = 0)]
    pub start_pose: u32,
    #[arg(long, default_value_t = 0)]
    pub stop_pose: u32,
    #[arg(long)]
    pub start_time: Option<String>,
    #[arg(long)]
    pub stop_time: Option<String>,
    /// Output file for rendered SQL; stdout when unset.
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long, default_value_t = true)]
    pub stop_never: bool,
    #[arg(long, default_value_t = true)]
    pub ddl: bool,
    #[arg(long, default_value_t = true)]
    pub rotate: bool,
    /// Directory of `mysql-bin.NNNNNN` files, used by `--mode stat` and by
    /// the legacy-server (5.5.x) fallback instead of a live replication
    /// session.
    #[arg(long)]
    pub binlog_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "lowercase")]
pub enum RedisWriteMode {
    Batch,
    Single,
}

#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Path to the YAML config; falls back to the global `--config` flag
    /// when unset.
    #[arg(long)]
    pub conf: Option<PathBuf>,
    #[arg(long, default_value_t = 100)]
    pub rewrite_event_interval: u32,
    #[arg(long, default_value_t = 30)]
    pub rewrite_time_interval: u64,
    #[arg(long, value_enum, default_value = "batch")]
    pub redis_write_mode: RedisWriteMode,
    /// Overrides the YAML `redis.write_batch_size` when set.
    #[arg(long)]
    pub redis_write_batch_size: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct FilterArgs {
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}
