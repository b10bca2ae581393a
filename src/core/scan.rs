// Persisted stat document parsing. One JSON file per entity, named by
// UUID, with namespaced sections under a top-level "stats" object.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

const STATS_ROOT: &str = "stats";
const CUSTOM_SECTION: &str = "minecraft:custom";
const MINED_SECTION: &str = "minecraft:mined";

const KEY_PLAY_TIME: &str = "minecraft:play_time";
const KEY_DEATHS: &str = "minecraft:deaths";
const KEY_TIME_SINCE_DEATH: &str = "minecraft:time_since_death";
const KEY_MOB_KILLS: &str = "minecraft:mob_kills";
const KEY_JUMP: &str = "minecraft:jump";
const KEY_DAMAGE_DEALT: &str = "minecraft:damage_dealt";
const KEY_DAMAGE_TAKEN: &str = "minecraft:damage_taken";

// Canonical locomotion set for the travel accumulator: self-powered
// ground movement only. Vehicle, swim, and flight counters are excluded.
const TRAVEL_KEYS: [&str; 3] = [
    "minecraft:walk_one_cm",
    "minecraft:sprint_one_cm",
    "minecraft:crouch_one_cm",
];

/// Numeric fields of one parsed stat document. Missing or malformed
/// leaves are zero; only a malformed top level fails the parse.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ParsedStats {
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

pub fn read_stat_file(path: &Path) -> Result<ParsedStats, Error> {
    let file = File::open(path)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    let doc: Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|err| Error::new(ErrorKind::Corrupt).with_path(path).with_source(err))?;
    parse_stat_document(&doc).map_err(|err| err.with_path(path))
}

pub fn parse_stat_document(doc: &Value) -> Result<ParsedStats, Error> {
    let stats = doc
        .get(STATS_ROOT)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            Error::new(ErrorKind::Corrupt).with_message("document has no stats object")
        })?;

    let custom = stats.get(CUSTOM_SECTION).and_then(Value::as_object);
    let mined = stats.get(MINED_SECTION).and_then(Value::as_object);

    let travel_cm = TRAVEL_KEYS
        .iter()
        .map(|key| leaf_u64(custom, key))
        .fold(0u64, u64::saturating_add);

    Ok(ParsedStats {
        play_ticks: leaf_u64(custom, KEY_PLAY_TIME),
        deaths: leaf_u32(custom, KEY_DEATHS),
        ticks_since_death: leaf_u64(custom, KEY_TIME_SINCE_DEATH),
        mob_kills: leaf_u32(custom, KEY_MOB_KILLS),
        jumps: leaf_u32(custom, KEY_JUMP),
        blocks_mined: sum_section(mined),
        travel_cm,
        damage_dealt: leaf_f32(custom, KEY_DAMAGE_DEALT),
        damage_taken: leaf_f32(custom, KEY_DAMAGE_TAKEN),
    })
}

fn leaf_u64(section: Option<&Map<String, Value>>, key: &str) -> u64 {
    section
        .and_then(|map| map.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn leaf_u32(section: Option<&Map<String, Value>>, key: &str) -> u32 {
    leaf_u64(section, key).try_into().unwrap_or(u32::MAX)
}

fn leaf_f32(section: Option<&Map<String, Value>>, key: &str) -> f32 {
    let value = section
        .and_then(|map| map.get(key))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if value.is_finite() && value > 0.0 {
        value as f32
    } else {
        0.0
    }
}

fn sum_section(section: Option<&Map<String, Value>>) -> u64 {
    section
        .map(|map| {
            map.values()
                .filter_map(Value::as_u64)
                .fold(0u64, u64::saturating_add)
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{ParsedStats, parse_stat_document};
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn full_document_parses_every_field() {
        let doc = json!({
            "stats": {
                "minecraft:custom": {
                    "minecraft:play_time": 2_400_000u64,
                    "minecraft:deaths": 7,
                    "minecraft:time_since_death": 88_000,
                    "minecraft:mob_kills": 512,
                    "minecraft:jump": 40_000,
                    "minecraft:walk_one_cm": 100_000,
                    "minecraft:sprint_one_cm": 20_000,
                    "minecraft:crouch_one_cm": 3_000,
                    "minecraft:damage_dealt": 1234.5,
                    "minecraft:damage_taken": 860.0
                },
                "minecraft:mined": {
                    "minecraft:stone": 1000,
                    "minecraft:dirt": 234
                }
            },
            "DataVersion": 3700
        });

        let parsed = parse_stat_document(&doc).expect("parse");
        assert_eq!(
            parsed,
            ParsedStats {
                play_ticks: 2_400_000,
                deaths: 7,
                ticks_since_death: 88_000,
                mob_kills: 512,
                jumps: 40_000,
                blocks_mined: 1234,
                travel_cm: 123_000,
                damage_dealt: 1234.5,
                damage_taken: 860.0,
            }
        );
    }

    #[test]
    fn missing_sections_default_to_zero() {
        let doc = json!({"stats": {}});
        let parsed = parse_stat_document(&doc).expect("parse");
        assert_eq!(parsed, ParsedStats::default());
    }

    #[test]
    fn malformed_leaves_default_to_zero() {
        let doc = json!({
            "stats": {
                "minecraft:custom": {
                    "minecraft:play_time": "not a number",
                    "minecraft:deaths": -4,
                    "minecraft:damage_dealt": -5.0,
                    "minecraft:jump": {"nested": true}
                },
                "minecraft:mined": {
                    "minecraft:stone": "many",
                    "minecraft:dirt": 10
                }
            }
        });

        let parsed = parse_stat_document(&doc).expect("parse");
        assert_eq!(parsed.play_ticks, 0);
        assert_eq!(parsed.deaths, 0);
        assert_eq!(parsed.damage_dealt, 0.0);
        assert_eq!(parsed.jumps, 0);
        assert_eq!(parsed.blocks_mined, 10);
    }

    #[test]
    fn unknown_stat_keys_are_ignored() {
        let doc = json!({
            "stats": {
                "minecraft:custom": {
                    "minecraft:deaths": 2,
                    "minecraft:boat_one_cm": 99_999,
                    "modded:weird_stat": 5
                }
            }
        });
        let parsed = parse_stat_document(&doc).expect("parse");
        assert_eq!(parsed.deaths, 2);
        assert_eq!(parsed.travel_cm, 0);
    }

    #[test]
    fn missing_stats_object_is_corrupt() {
        for doc in [json!({}), json!([1, 2]), json!({"stats": 42})] {
            let err = parse_stat_document(&doc).expect_err("corrupt");
            assert_eq!(err.kind(), ErrorKind::Corrupt);
        }
    }
}
