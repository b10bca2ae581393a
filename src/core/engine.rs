// Stat Sync Engine: directory scan behind modification watermarks, merge
// of persisted fields with runtime presence, connectivity transitions,
// and offline-record retention.
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::core::config::SharedConfig;
use crate::core::record::StatRecord;
use crate::core::scan::{ParsedStats, read_stat_file};
use crate::core::store::StatStore;

/// Host-provided membership check. `Some(name)` means the entity is
/// currently connected under that display name.
pub trait Roster: Send + Sync {
    fn display_name(&self, id: &Uuid) -> Option<String>;
}

/// Roster with nobody connected; used by one-shot dumps and tests.
pub struct EmptyRoster;

impl Roster for EmptyRoster {
    fn display_name(&self, _id: &Uuid) -> Option<String> {
        None
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoadSummary {
    pub scanned: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub changed: bool,
}

pub struct SyncEngine {
    store: StatStore,
    stats_dir: PathBuf,
    config: SharedConfig,
    watermarks: Mutex<HashMap<Uuid, SystemTime>>,
    last_pass: Mutex<HashSet<Uuid>>,
    parsed_total: AtomicU64,
    skipped_total: AtomicU64,
}

impl SyncEngine {
    pub fn new(store: StatStore, stats_dir: impl Into<PathBuf>, config: SharedConfig) -> Self {
        Self {
            store,
            stats_dir: stats_dir.into(),
            config,
            watermarks: Mutex::new(HashMap::new()),
            last_pass: Mutex::new(HashSet::new()),
            parsed_total: AtomicU64::new(0),
            skipped_total: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &StatStore {
        &self.store
    }

    /// Lifetime totals of stat files actually parsed / skipped via the
    /// watermark cache. Parsing only happens on watermark misses, so an
    /// unchanged directory leaves `files_parsed` untouched.
    pub fn files_parsed(&self) -> u64 {
        self.parsed_total.load(Ordering::Relaxed)
    }

    pub fn files_skipped(&self) -> u64 {
        self.skipped_total.load(Ordering::Relaxed)
    }

    /// Rescan the persisted store. Unchanged resources (watermark not
    /// newer than cached) are skipped without being opened. Each changed
    /// resource is parsed off-lock and merged as one atomic replace; a
    /// failed entity keeps its prior record and the batch continues.
    pub fn load_all(&self, roster: &dyn Roster) -> LoadSummary {
        let mut summary = LoadSummary::default();
        let mut processed = HashSet::new();

        let entries = match std::fs::read_dir(&self.stats_dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    dir = %self.stats_dir.display(),
                    error = %err,
                    "stats directory not readable; keeping prior records"
                );
                return summary;
            }
        };

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| Uuid::parse_str(stem).ok())
            else {
                tracing::trace!(path = %path.display(), "ignoring non-uuid stat file");
                continue;
            };

            summary.scanned += 1;
            processed.insert(id);

            let modified = match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    summary.failed += 1;
                    tracing::warn!(entity = %id, error = %err, "stat file watermark unreadable");
                    continue;
                }
            };

            // Not newer than the cached watermark means unchanged; the
            // file is never opened. The watermark advances before the
            // parse so a bad file logs once per change, not per cycle.
            {
                let mut marks = self.lock_watermarks();
                match marks.get(&id) {
                    Some(cached) if modified <= *cached => {
                        summary.skipped += 1;
                        continue;
                    }
                    _ => {
                        marks.insert(id, modified);
                    }
                }
            }

            let parsed = match read_stat_file(&path) {
                Ok(parsed) => parsed,
                Err(err) => {
                    summary.failed += 1;
                    tracing::warn!(
                        entity = %id,
                        error = %err,
                        "failed to load stat file; keeping prior record"
                    );
                    continue;
                }
            };
            summary.parsed += 1;

            let prior = self.store.get(&id);
            let mut record = merge_record(prior, parsed, system_time_ms(modified));
            if let Some(name) = roster.display_name(&id) {
                record.online = true;
                record.name = name;
                record.last_seen_ms = now_ms();
            }
            self.store.replace(id, record);
        }

        self.refresh_connected(roster);

        // Watermarks for vanished files are dropped so a recreated file
        // is always re-read.
        self.lock_watermarks().retain(|id, _| processed.contains(id));
        summary.changed = summary.parsed > 0;
        self.parsed_total
            .fetch_add(summary.parsed as u64, Ordering::Relaxed);
        self.skipped_total
            .fetch_add(summary.skipped as u64, Ordering::Relaxed);
        *self.lock_last_pass() = processed;

        tracing::debug!(
            scanned = summary.scanned,
            parsed = summary.parsed,
            skipped = summary.skipped,
            failed = summary.failed,
            "stat scan pass complete"
        );
        summary
    }

    // An online record's last_seen tracks "now" even while its file sits
    // behind the watermark; the frozen value is only ever written by the
    // leave transition.
    fn refresh_connected(&self, roster: &dyn Roster) {
        let now = now_ms();
        for id in self.store.ids() {
            if let Some(name) = roster.display_name(&id) {
                self.store.update(&id, |record| {
                    if record.online {
                        record.last_seen_ms = now;
                        record.name = name;
                    }
                });
            }
        }
    }

    /// Upsert for a connect event. Idempotent: a second join without an
    /// intervening leave rewrites the same fields on the same record.
    pub fn on_entity_join(&self, id: Uuid, name: &str) {
        let now = now_ms();
        self.store.upsert(id, StatRecord::default(), |record| {
            record.online = true;
            record.name = name.to_string();
            record.last_seen_ms = now;
        });
        tracing::debug!(entity = %id, name, "entity joined");
    }

    /// Freeze the record at the disconnect instant; no-op when unknown.
    pub fn on_entity_leave(&self, id: &Uuid) {
        let now = now_ms();
        let known = self.store.update(id, |record| {
            record.online = false;
            record.last_seen_ms = now;
        });
        if known {
            tracing::debug!(entity = %id, "entity left");
        }
    }

    /// Drop offline records past the retention threshold, unless offline
    /// retention is enabled. A record observed by the most recent scan
    /// pass still has a live resource and is always kept, as is every
    /// online record.
    pub fn cleanup(&self) -> usize {
        let (retain_offline, retention) = {
            let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
            (config.retain_offline, config.retention)
        };
        if retain_offline {
            return 0;
        }

        let now = now_ms();
        let threshold_ms = retention.as_millis() as u64;
        let observed = self.lock_last_pass().clone();
        let removed = self.store.retain(|id, record| {
            record.online
                || observed.contains(id)
                || now.saturating_sub(record.last_seen_ms) <= threshold_ms
        });
        if removed > 0 {
            tracing::info!(removed, "dropped stale offline records");
        }
        removed
    }

    /// Full teardown: forget records and watermarks. The next `load_all`
    /// rebuilds everything from the persisted store.
    pub fn reset(&self) {
        self.store.clear();
        self.lock_watermarks().clear();
        self.lock_last_pass().clear();
    }

    fn lock_watermarks(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SystemTime>> {
        self.watermarks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_last_pass(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.last_pass.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn set_watermark(&self, id: Uuid, modified: SystemTime) {
        self.lock_watermarks().insert(id, modified);
    }
}

fn merge_record(prior: Option<StatRecord>, parsed: ParsedStats, modified_ms: u64) -> StatRecord {
    let (name, online, last_seen_ms) = match prior {
        Some(prior) => (prior.name, prior.online, prior.last_seen_ms),
        None => (String::new(), false, modified_ms),
    };
    StatRecord {
        name,
        online,
        last_seen_ms,
        play_ticks: parsed.play_ticks,
        deaths: parsed.deaths,
        ticks_since_death: parsed.ticks_since_death,
        mob_kills: parsed.mob_kills,
        jumps: parsed.jumps,
        blocks_mined: parsed.blocks_mined,
        travel_cm: parsed.travel_cm,
        damage_dealt: parsed.damage_dealt,
        damage_taken: parsed.damage_taken,
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
