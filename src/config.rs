//! YAML configuration for the `sync` daemon. This file doubles as the
//! durable checkpoint: `source.pos` is the field the checkpoint manager
//! rewrites in place.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Position;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub mapping: Vec<MappingEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Full,
    Increase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(rename = "serverId")]
    pub server_id: u32,
    pub ip: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub mode: SourceMode,
    #[serde(default = "default_charset")]
    pub charset: String,
    /// `"<file>:<offset>"`, empty until the first checkpoint persists.
    #[serde(default)]
    pub pos: String,
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

impl SourceConfig {
    pub fn position(&self) -> Option<Position> {
        if self.pos.is_empty() {
            None
        } else {
            self.pos.parse().ok()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Redis,
    #[serde(rename = "mongodb")]
    MongoDb,
    Elasticsearch,
    Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(rename = "type")]
    pub kind: SinkKind,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub mongodb: Option<MongoDbConfig>,
    #[serde(default)]
    pub elasticsearch: Option<serde_yaml::Value>,
    #[serde(default)]
    pub kafka: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    Standalone,
    Sentinel,
    Cluster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub mode: RedisMode,
    #[serde(default)]
    pub standalone: Option<RedisStandalone>,
    #[serde(default)]
    pub sentinel: Option<RedisSentinel>,
    #[serde(default)]
    pub cluster: Option<RedisCluster>,
    #[serde(default = "default_batch_size")]
    pub write_batch_size: usize,
}

fn default_batch_size() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStandalone {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSentinel {
    pub addrs: Vec<String>,
    pub master_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCluster {
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoDbConfig {
    pub uri: String,
    #[serde(default)]
    pub options: MongoDbOptions,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoDbOptions {
    #[serde(default = "default_pool_size")]
    pub max_pool_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for MongoDbOptions {
    fn default() -> Self {
        Self { max_pool_size: default_pool_size(), connect_timeout_ms: default_connect_timeout_ms() }
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    pub database: String,
    pub tables: Vec<MappingTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingTable {
    pub table: String,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
}

/// `batch` accumulates mutations and flushes a pipeline at the size
/// threshold; `single` dispatches every row as it arrives across a bounded
/// worker pool (the `redis_write_mode` flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedisWriteMode {
    #[default]
    Batch,
    Single,
}

/// The subset of [`Config`] a `SinkAdapter` needs to connect and route rows
/// (target block plus per-table mapping overrides), flattened so
/// `sink::build` doesn't need the whole [`Config`], plus the per-run
/// write-mode overrides the `sync` subcommand's flags supply on top of the
/// YAML.
pub struct SinkConfig {
    pub kind: SinkKind,
    pub redis: Option<RedisConfig>,
    pub mongodb: Option<MongoDbConfig>,
    pub mapping: Vec<MappingEntry>,
    pub redis_write_mode: RedisWriteMode,
    /// Overrides `redis.write_batch_size` from the YAML when set.
    pub redis_write_batch_size: Option<usize>,
}

impl From<&Config> for SinkConfig {
    fn from(config: &Config) -> Self {
        Self {
            kind: config.target.kind,
            redis: config.target.redis.clone(),
            mongodb: config.target.mongodb.clone(),
            mapping: config.mapping.clone(),
            redis_write_mode: RedisWriteMode::default(),
            redis_write_batch_size: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&text)?;
        Ok(config)
    }

    /// Full read-mutate-marshal-write rewrite of `source.pos`, using a
    /// temp-file-then-rename so a crash mid-write can never truncate the
    /// config.
    pub fn persist_position(path: &Path, position: &Position) -> Result<()> {
        let mut config = Self::load(path)?;
        config.source.pos = position.to_string();
        let serialized = serde_yaml::to_string(&config)?;

        let tmp_path = path.with_extension("yaml.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(serialized.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.source.ip.is_empty() {
        return Err(Error::Configuration("source.ip must not be empty".into()));
    }
    if config.source.server_id == 0 {
        return Err(Error::Configuration("source.serverId must be non-zero".into()));
    }
    match config.target.kind {
        SinkKind::Redis if config.target.redis.is_none() => {
            Err(Error::Configuration("target.type is redis but target.redis is missing".into()))
        }
        SinkKind::MongoDb if config.target.mongodb.is_none() => {
            Err(Error::Configuration("target.type is mongodb but target.mongodb is missing".into()))
        }
        _ => Ok(()),
    }
}
