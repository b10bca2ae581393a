//! Purpose: Turn raw stat values into display strings without paying the
//! formatting cost on every render call.
//! Exports: `RenderCache`, `Formatter`, `formatter`, `formatter_for`.
//! Role: Two-level cache (per-entity map, shared per-raw-value strings)
//! with one coarse generation clear instead of per-entry expiry.
//! Invariants: Formatters are pure in (raw, compact) and clamp negative
//! input to zero; the offline decoration is applied after formatting and
//! never stored in the shared level.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::api::cache::ClientCache;
use crate::core::engine::now_ms;
use crate::core::record::{StatKey, raw_stat};

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(30);

const DIM_PREFIX: &str = "\u{1b}[90m";
const DIM_SUFFIX: &str = "\u{1b}[0m";

pub type Formatter = fn(f64, bool) -> String;

/// Canonical formatter for a stat key.
pub fn formatter(key: StatKey) -> Formatter {
    match key {
        StatKey::PlayTime | StatKey::LastDeath => format_tick_duration,
        StatKey::Deaths
        | StatKey::MobKills
        | StatKey::BlocksMined
        | StatKey::Jumps => format_count,
        StatKey::Distance => format_distance,
        StatKey::DamageDealt | StatKey::DamageTaken => format_damage,
        StatKey::LastSeen => format_last_seen,
    }
}

/// Registry lookup by raw config name; unknown keys resolve to absent.
pub fn formatter_for(name: &str) -> Option<Formatter> {
    StatKey::parse(name).map(formatter)
}

struct CacheState {
    last_clear: Instant,
    generation: u64,
    entities: HashMap<Uuid, HashMap<StatKey, String>>,
    shared: HashMap<(StatKey, u64), String>,
}

pub struct RenderCache {
    refresh: Duration,
    state: Mutex<CacheState>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::with_refresh(DEFAULT_REFRESH)
    }

    pub fn with_refresh(refresh: Duration) -> Self {
        Self {
            refresh,
            state: Mutex::new(CacheState {
                last_clear: Instant::now(),
                generation: 0,
                entities: HashMap::new(),
                shared: HashMap::new(),
            }),
        }
    }

    /// Formatted value of one stat for one entity, or None when the
    /// entity is absent from the client cache. Safe to call from
    /// concurrent render paths.
    pub fn stat_value(
        &self,
        cache: &ClientCache,
        id: &Uuid,
        key: StatKey,
        compact: bool,
        dim_offline: bool,
    ) -> Option<String> {
        let record = cache.get(id)?;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.last_clear.elapsed() > self.refresh {
            // Both levels go together: one O(1)-amortized reset instead
            // of tracking per-entry ages.
            state.entities.clear();
            state.shared.clear();
            state.generation += 1;
            state.last_clear = Instant::now();
        }

        if let Some(text) = state.entities.get(id).and_then(|entry| entry.get(&key)) {
            return Some(text.clone());
        }

        let text = if key == StatKey::LastSeen && record.online {
            "Online".to_string()
        } else {
            let raw = raw_stat(&record, key, now_ms());
            if key == StatKey::LastSeen {
                // Now-relative: every call sees a new raw value, so the
                // shared level would only accumulate dead entries.
                format_last_seen(raw, compact)
            } else {
                let slot = (key, raw.to_bits());
                match state.shared.get(&slot) {
                    Some(text) => text.clone(),
                    None => {
                        let text = formatter(key)(raw, compact);
                        state.shared.insert(slot, text.clone());
                        text
                    }
                }
            }
        };

        let text = if dim_offline && !record.online {
            format!("{DIM_PREFIX}{text}{DIM_SUFFIX}")
        } else {
            text
        };

        state
            .entities
            .entry(*id)
            .or_default()
            .insert(key, text.clone());
        Some(text)
    }

    /// One entity's full formatted line in key order.
    pub fn stat_line(
        &self,
        cache: &ClientCache,
        id: &Uuid,
        keys: &[StatKey],
        compact: bool,
        dim_offline: bool,
    ) -> Option<Vec<(StatKey, String)>> {
        cache.get(id)?;
        let line = keys
            .iter()
            .filter_map(|key| {
                self.stat_value(cache, id, *key, compact, dim_offline)
                    .map(|text| (*key, text))
            })
            .collect();
        Some(line)
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    #[cfg(test)]
    fn shared_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shared
            .len()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_raw(raw: f64) -> f64 {
    if raw.is_finite() && raw > 0.0 { raw } else { 0.0 }
}

// Tick durations at 20 ticks per second. Full mode drops leading zero
// units ("1d 9h 20m"); sub-minute non-zero input collapses to "0m".
fn format_tick_duration(raw: f64, compact: bool) -> String {
    let ticks = clamp_raw(raw) as u64;
    if ticks == 0 {
        return "0h".to_string();
    }
    let total_seconds = ticks / 20;
    if compact {
        return format!("{}h", total_seconds / 3600);
    }

    let days = total_seconds / 86_400;
    let hours = (total_seconds / 3600) % 24;
    let minutes = (total_seconds / 60) % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d "));
    }
    if hours > 0 || days > 0 {
        out.push_str(&format!("{hours}h "));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    let trimmed = out.trim_end().to_string();
    if trimmed.is_empty() {
        "0m".to_string()
    } else {
        trimmed
    }
}

fn format_count(raw: f64, _compact: bool) -> String {
    format!("{}", clamp_raw(raw) as u64)
}

// Raw centimeters, shown as kilometers with one decimal.
fn format_distance(raw: f64, compact: bool) -> String {
    let km = clamp_raw(raw) / 100_000.0;
    if compact {
        format!("{km:.1}")
    } else {
        format!("{km:.1} km")
    }
}

// Raw half-hearts; full mode shows whole hearts.
fn format_damage(raw: f64, compact: bool) -> String {
    let value = clamp_raw(raw);
    if compact {
        format!("{value:.0}")
    } else {
        format!("{:.0} \u{2665}", value / 2.0)
    }
}

// Raw elapsed milliseconds since the entity was last seen.
fn format_last_seen(raw: f64, compact: bool) -> String {
    let elapsed_ms = clamp_raw(raw) as u64;
    let minutes = elapsed_ms / 60_000;
    let hours = elapsed_ms / 3_600_000;
    let days = elapsed_ms / 86_400_000;

    if compact {
        if minutes == 0 {
            "now".to_string()
        } else if hours == 0 {
            format!("{minutes}m")
        } else if days == 0 {
            format!("{hours}h")
        } else {
            format!("{days}d")
        }
    } else if minutes == 0 {
        "Just now".to_string()
    } else if hours == 0 {
        format!("{minutes} mins ago")
    } else if days == 0 {
        format!("{hours} hours ago")
    } else {
        format!("{days} days ago")
    }
}
