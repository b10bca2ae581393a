// Snapshot wire codec: magic + version header, varint counters, LE floats,
// length-prefixed names. Entries are iterated in id order so an unchanged
// snapshot always encodes to identical bytes.
use std::collections::BTreeMap;

use uuid::Uuid;

use crate::core::error::{Error, ErrorKind};
use crate::core::record::StatRecord;

pub const WIRE_MAGIC: [u8; 4] = *b"TSB1";
pub const WIRE_VERSION: u16 = 1;

const MAX_VARINT_LEN: usize = 10;
const MAX_NAME_BYTES: usize = 1024;

pub fn encode_snapshot(entries: &BTreeMap<Uuid, StatRecord>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + entries.len() * 64);
    buf.extend_from_slice(&WIRE_MAGIC);
    buf.extend_from_slice(&WIRE_VERSION.to_le_bytes());
    write_varint(&mut buf, entries.len() as u64);
    for (id, record) in entries {
        buf.extend_from_slice(id.as_bytes());
        write_string(&mut buf, &record.name);
        buf.push(u8::from(record.online));
        write_varint(&mut buf, record.last_seen_ms);
        write_varint(&mut buf, record.play_ticks);
        write_varint(&mut buf, record.deaths as u64);
        write_varint(&mut buf, record.ticks_since_death);
        write_varint(&mut buf, record.mob_kills as u64);
        write_varint(&mut buf, record.jumps as u64);
        write_varint(&mut buf, record.blocks_mined);
        write_varint(&mut buf, record.travel_cm);
        buf.extend_from_slice(&record.damage_dealt.to_le_bytes());
        buf.extend_from_slice(&record.damage_taken.to_le_bytes());
    }
    buf
}

pub fn decode_snapshot(buf: &[u8]) -> Result<BTreeMap<Uuid, StatRecord>, Error> {
    let mut decoder = Decoder::new(buf);

    let magic = decoder.take(4)?;
    if magic != WIRE_MAGIC {
        return Err(Error::new(ErrorKind::Corrupt).with_message("bad snapshot magic"));
    }
    let version = u16::from_le_bytes(
        decoder
            .take(2)?
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Corrupt))?,
    );
    if version != WIRE_VERSION {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message(format!("unsupported snapshot version {version}")));
    }

    let count = decoder.read_varint()?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let id_bytes: [u8; 16] = decoder
            .take(16)?
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Corrupt))?;
        let id = Uuid::from_bytes(id_bytes);

        let record = StatRecord {
            name: decoder.read_string()?,
            online: decoder.read_bool()?,
            last_seen_ms: decoder.read_varint()?,
            play_ticks: decoder.read_varint()?,
            deaths: decoder.read_varint_u32()?,
            ticks_since_death: decoder.read_varint()?,
            mob_kills: decoder.read_varint_u32()?,
            jumps: decoder.read_varint_u32()?,
            blocks_mined: decoder.read_varint()?,
            travel_cm: decoder.read_varint()?,
            damage_dealt: decoder.read_f32()?,
            damage_taken: decoder.read_f32()?,
        };
        entries.insert(id, record);
    }

    if !decoder.is_empty() {
        return Err(Error::new(ErrorKind::Corrupt).with_message("trailing snapshot bytes"));
    }
    Ok(entries)
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_string(buf: &mut Vec<u8>, text: &str) {
    write_varint(buf, text.len() as u64);
    buf.extend_from_slice(text.as_bytes());
}

struct Decoder<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn is_empty(&self) -> bool {
        self.off == self.buf.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .off
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::new(ErrorKind::Corrupt).with_message("truncated snapshot"))?;
        let slice = &self.buf[self.off..end];
        self.off = end;
        Ok(slice)
    }

    fn read_varint(&mut self) -> Result<u64, Error> {
        let mut value: u64 = 0;
        for index in 0..MAX_VARINT_LEN {
            let byte = self.take(1)?[0];
            let group = (byte & 0x7F) as u64;
            if index == 9 && byte > 0x01 {
                return Err(Error::new(ErrorKind::Corrupt).with_message("varint overflow"));
            }
            value |= group << (index * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::new(ErrorKind::Corrupt).with_message("varint too long"))
    }

    fn read_varint_u32(&mut self) -> Result<u32, Error> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| Error::new(ErrorKind::Corrupt).with_message("counter exceeds u32"))
    }

    fn read_bool(&mut self) -> Result<bool, Error> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("invalid bool byte {other}"))),
        }
    }

    fn read_f32(&mut self) -> Result<f32, Error> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Corrupt))?;
        Ok(f32::from_le_bytes(bytes))
    }

    fn read_string(&mut self) -> Result<String, Error> {
        let len = self.read_varint()? as usize;
        if len > MAX_NAME_BYTES {
            return Err(Error::new(ErrorKind::Corrupt).with_message("name length exceeds max"));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| Error::new(ErrorKind::Corrupt).with_source(err))
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_snapshot, encode_snapshot, write_varint};
    use crate::core::error::ErrorKind;
    use crate::core::record::StatRecord;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn varint_round_trip(value: u64) -> u64 {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        let mut decoder = super::Decoder::new(&buf);
        let out = decoder.read_varint().expect("decode");
        assert!(decoder.is_empty());
        out
    }

    #[test]
    fn varint_edges_round_trip() {
        for value in [0, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            assert_eq!(varint_round_trip(value), value);
        }
    }

    #[test]
    fn varint_rejects_overflow() {
        let buf = [0xFF; 11];
        let mut decoder = super::Decoder::new(&buf);
        let err = decoder.read_varint().expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    fn sample_record() -> StatRecord {
        StatRecord {
            name: "alice".to_string(),
            online: true,
            last_seen_ms: 1_700_000_000_000,
            play_ticks: 2_400_000,
            deaths: 7,
            ticks_since_death: 88_000,
            mob_kills: 512,
            jumps: 40_000,
            blocks_mined: 123_456,
            travel_cm: 9_876_543,
            damage_dealt: 1234.5,
            damage_taken: 860.25,
        }
    }

    #[test]
    fn snapshot_round_trip_is_exact() {
        let mut entries = BTreeMap::new();
        entries.insert(Uuid::new_v4(), sample_record());
        entries.insert(Uuid::new_v4(), StatRecord::default());
        entries.insert(
            Uuid::new_v4(),
            StatRecord {
                name: String::new(),
                online: false,
                last_seen_ms: u64::MAX,
                play_ticks: u64::MAX,
                deaths: u32::MAX,
                ticks_since_death: u64::MAX,
                mob_kills: u32::MAX,
                jumps: u32::MAX,
                blocks_mined: u64::MAX,
                travel_cm: u64::MAX,
                damage_dealt: f32::MAX,
                damage_taken: 0.0,
            },
        );

        let encoded = encode_snapshot(&entries);
        let decoded = decode_snapshot(&encoded).expect("decode");
        assert_eq!(decoded, entries);
    }

    #[test]
    fn identical_snapshots_encode_identically() {
        let mut entries = BTreeMap::new();
        for _ in 0..8 {
            entries.insert(Uuid::new_v4(), sample_record());
        }
        assert_eq!(encode_snapshot(&entries), encode_snapshot(&entries));
    }

    #[test]
    fn empty_snapshot_round_trips() {
        let entries = BTreeMap::new();
        let decoded = decode_snapshot(&encode_snapshot(&entries)).expect("decode");
        assert!(decoded.is_empty());
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut encoded = encode_snapshot(&BTreeMap::new());
        encoded[0] = b'X';
        let err = decode_snapshot(&encoded).expect_err("bad magic");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let mut encoded = encode_snapshot(&BTreeMap::new());
        encoded[4] = 9;
        let err = decode_snapshot(&encoded).expect_err("bad version");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn truncated_snapshot_is_corrupt() {
        let mut entries = BTreeMap::new();
        entries.insert(Uuid::new_v4(), sample_record());
        let encoded = encode_snapshot(&entries);
        let err = decode_snapshot(&encoded[..encoded.len() - 3]).expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let mut encoded = encode_snapshot(&BTreeMap::new());
        encoded.push(0);
        let err = decode_snapshot(&encoded).expect_err("trailing");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }
}
