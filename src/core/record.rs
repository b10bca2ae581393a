// Per-entity stat record value type and the canonical stat key set.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entity's merged stat state: numeric fields come from the persisted
/// document, `name`/`online`/`last_seen_ms` from runtime presence. Unsigned
/// fields cannot go negative; the damage accessors clamp corrupt inputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    pub name: String,
    pub online: bool,
    pub last_seen_ms: u64,
    pub play_ticks: u64,
    pub deaths: u32,
    pub ticks_since_death: u64,
    pub mob_kills: u32,
    pub jumps: u32,
    pub blocks_mined: u64,
    pub travel_cm: u64,
    pub damage_dealt: f32,
    pub damage_taken: f32,
}

impl StatRecord {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn with_last_seen(mut self, last_seen_ms: u64) -> Self {
        self.last_seen_ms = last_seen_ms;
        self
    }

    pub fn damage_dealt(&self) -> f32 {
        clamp_non_negative(self.damage_dealt)
    }

    pub fn damage_taken(&self) -> f32 {
        clamp_non_negative(self.damage_taken)
    }
}

fn clamp_non_negative(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

/// Canonical display-stat keys. Config lists and render requests use the
/// lowercase names below; anything else is silently ignored.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StatKey {
    PlayTime,
    Deaths,
    LastDeath,
    MobKills,
    Distance,
    BlocksMined,
    Jumps,
    DamageDealt,
    DamageTaken,
    LastSeen,
}

pub const ALL_STAT_KEYS: [StatKey; 10] = [
    StatKey::PlayTime,
    StatKey::Deaths,
    StatKey::LastDeath,
    StatKey::MobKills,
    StatKey::Distance,
    StatKey::BlocksMined,
    StatKey::Jumps,
    StatKey::DamageDealt,
    StatKey::DamageTaken,
    StatKey::LastSeen,
];

impl StatKey {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "playtime" => Some(StatKey::PlayTime),
            "deaths" => Some(StatKey::Deaths),
            "lastdeath" => Some(StatKey::LastDeath),
            "mobkills" => Some(StatKey::MobKills),
            "distance" => Some(StatKey::Distance),
            "blocksmined" => Some(StatKey::BlocksMined),
            "jumps" => Some(StatKey::Jumps),
            "dmgdealt" => Some(StatKey::DamageDealt),
            "dmgtaken" => Some(StatKey::DamageTaken),
            "lastseen" => Some(StatKey::LastSeen),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StatKey::PlayTime => "playtime",
            StatKey::Deaths => "deaths",
            StatKey::LastDeath => "lastdeath",
            StatKey::MobKills => "mobkills",
            StatKey::Distance => "distance",
            StatKey::BlocksMined => "blocksmined",
            StatKey::Jumps => "jumps",
            StatKey::DamageDealt => "dmgdealt",
            StatKey::DamageTaken => "dmgtaken",
            StatKey::LastSeen => "lastseen",
        }
    }

    /// Column header used by table output; compact mode abbreviates.
    pub fn label(self, compact: bool) -> &'static str {
        if compact {
            match self {
                StatKey::PlayTime => "play",
                StatKey::Deaths => "dth",
                StatKey::LastDeath => "ldth",
                StatKey::MobKills => "mob",
                StatKey::Distance => "km",
                StatKey::BlocksMined => "mined",
                StatKey::Jumps => "jmp",
                StatKey::DamageDealt => "dmg+",
                StatKey::DamageTaken => "dmg-",
                StatKey::LastSeen => "seen",
            }
        } else {
            match self {
                StatKey::PlayTime => "Play Time",
                StatKey::Deaths => "Deaths",
                StatKey::LastDeath => "Last Death",
                StatKey::MobKills => "Mob Kills",
                StatKey::Distance => "Distance",
                StatKey::BlocksMined => "Blocks Mined",
                StatKey::Jumps => "Jumps",
                StatKey::DamageDealt => "Damage Dealt",
                StatKey::DamageTaken => "Damage Taken",
                StatKey::LastSeen => "Last Seen",
            }
        }
    }
}

/// Raw numeric value of one stat, as handed to the formatter registry.
/// `LastSeen` is pre-resolved to elapsed milliseconds so formatters stay
/// pure functions of (value, compact).
pub fn raw_stat(record: &StatRecord, key: StatKey, now_ms: u64) -> f64 {
    match key {
        StatKey::PlayTime => record.play_ticks as f64,
        StatKey::Deaths => record.deaths as f64,
        StatKey::LastDeath => record.ticks_since_death as f64,
        StatKey::MobKills => record.mob_kills as f64,
        StatKey::Distance => record.travel_cm as f64,
        StatKey::BlocksMined => record.blocks_mined as f64,
        StatKey::Jumps => record.jumps as f64,
        StatKey::DamageDealt => record.damage_dealt() as f64,
        StatKey::DamageTaken => record.damage_taken() as f64,
        StatKey::LastSeen => now_ms.saturating_sub(record.last_seen_ms) as f64,
    }
}

pub type EntityId = Uuid;
