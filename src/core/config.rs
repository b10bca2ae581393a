// Runtime configuration consumed by the engine, broadcaster, and renderer.
// Owned externally; the shared handle lets flags change while running.
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::core::record::StatKey;

pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_SCAN_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RESYNC_COOLDOWN: Duration = Duration::from_secs(2);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub show_offline: bool,
    pub dim_offline: bool,
    pub compact: bool,
    pub visible_stats: Vec<StatKey>,
    pub scan_interval: Duration,
    pub resync_cooldown: Duration,
    pub retain_offline: bool,
    pub retention: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            show_offline: true,
            dim_offline: true,
            compact: false,
            visible_stats: vec![
                StatKey::PlayTime,
                StatKey::Deaths,
                StatKey::LastDeath,
                StatKey::MobKills,
                StatKey::Distance,
            ],
            scan_interval: DEFAULT_SCAN_INTERVAL,
            resync_cooldown: DEFAULT_RESYNC_COOLDOWN,
            retain_offline: true,
            retention: DEFAULT_RETENTION,
        }
    }
}

impl SyncConfig {
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = clamp_scan_interval(interval);
        self
    }
}

/// Shared handle read at use time, so policy flips (e.g. show-offline)
/// take effect on the next publish without restarting anything.
pub type SharedConfig = Arc<RwLock<SyncConfig>>;

pub fn shared(config: SyncConfig) -> SharedConfig {
    Arc::new(RwLock::new(config))
}

pub fn clamp_scan_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_SCAN_INTERVAL, MAX_SCAN_INTERVAL)
}

/// Parse an ordered stat-key list. Unknown names are skipped, duplicates
/// keep their first position.
pub fn parse_stat_keys<S: AsRef<str>>(names: &[S]) -> Vec<StatKey> {
    let mut keys = Vec::new();
    for name in names {
        let name = name.as_ref();
        match StatKey::parse(name) {
            Some(key) if !keys.contains(&key) => keys.push(key),
            Some(_) => {}
            None => tracing::debug!(stat = name, "ignoring unknown stat key"),
        }
    }
    keys
}
