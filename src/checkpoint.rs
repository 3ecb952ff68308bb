//! Checkpoint persistence, batched on an N-events-or-T-seconds trigger
//! rather than every event. Every rewrite goes through
//! [`Config::persist_position`]'s temp-file-then-rename, so a crash
//! mid-write can never truncate the config.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::model::Position;

const DEFAULT_EVENT_INTERVAL: u32 = 100;
const DEFAULT_TIME_INTERVAL: Duration = Duration::from_secs(30);

/// Tracks the latest acknowledged [`Position`] and persists it to the
/// config file's `source.pos` field once either threshold is crossed:
/// `event_interval` events observed since the last persist, or
/// `time_interval` elapsed.
pub struct CheckpointManager {
    config_path: PathBuf,
    current: Option<Position>,
    events_since_persist: u32,
    last_persist: Instant,
    event_interval: u32,
    time_interval: Duration,
}

impl CheckpointManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            current: None,
            events_since_persist: 0,
            last_persist: Instant::now(),
            event_interval: DEFAULT_EVENT_INTERVAL,
            time_interval: DEFAULT_TIME_INTERVAL,
        }
    }

    pub fn with_thresholds(mut self, event_interval: u32, time_interval: Duration) -> Self {
        self.event_interval = event_interval;
        self.time_interval = time_interval;
        self
    }

    pub fn current(&self) -> Option<&Position> {
        self.current.as_ref()
    }

    /// Records a newly-processed position and persists it if due. Called
    /// once per binlog event the stream consumer fully applies.
    pub fn advance(&mut self, position: Position) -> Result<()> {
        self.current = Some(position);
        self.events_since_persist += 1;
        if self.is_due() {
            self.persist()?;
        }
        Ok(())
    }

    fn is_due(&self) -> bool {
        self.events_since_persist >= self.event_interval || self.last_persist.elapsed() >= self.time_interval
    }

    /// Forces an immediate rewrite regardless of the batching thresholds;
    /// used on graceful shutdown so a clean exit never loses progress.
    pub fn flush(&mut self) -> Result<()> {
        if self.current.is_some() {
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let Some(position) = &self.current else { return Ok(()) };
        Config::persist_position(&self.config_path, position)?;
        debug!(position = %position, "persisted checkpoint");
        self.events_since_persist = 0;
        self.last_persist = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SinkKind, SourceConfig, SourceMode, TargetConfig};
    use std::fs;

    fn write_config(path: &std::path::Path) {
        let config = Config {
            source: SourceConfig {
                server_id: 1,
                ip: "127.0.0.1".into(),
                port: 3306,
                user: "root".into(),
                password: String::new(),
                mode: SourceMode::Increase,
                charset: "utf8mb4".into(),
                pos: String::new(),
            },
            target: TargetConfig { kind: SinkKind::Redis, redis: None, mongodb: None, elasticsearch: None, kafka: None },
            mapping: Vec::new(),
        };
        fs::write(path, serde_yaml::to_string(&config).unwrap()).unwrap();
    }

    #[test]
    fn persists_after_event_interval_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path);

        let mut manager = CheckpointManager::new(path.clone()).with_thresholds(3, Duration::from_secs(3600));
        manager.advance(Position::new("mysql-bin.000001", 4)).unwrap();
        manager.advance(Position::new("mysql-bin.000001", 120)).unwrap();
        assert_eq!(Config::load(&path).unwrap().source.pos, "");

        manager.advance(Position::new("mysql-bin.000001", 240)).unwrap();
        assert_eq!(Config::load(&path).unwrap().source.pos, "mysql-bin.000001:240");
    }

    #[test]
    fn flush_forces_persist_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        write_config(&path);

        let mut manager = CheckpointManager::new(path.clone()).with_thresholds(1000, Duration::from_secs(3600));
        manager.advance(Position::new("mysql-bin.000002", 4)).unwrap();
        manager.flush().unwrap();
        assert_eq!(Config::load(&path).unwrap().source.pos, "mysql-bin.000002:4");
    }
}
