//! Versioned, self-describing message serialization (spec.md §6).
//!
//! Name-value pairs are serialized by *name*, not by the process-local
//! handle, so a record written by one process can be read by another and
//! interned into whatever handles that reader's registry happens to
//! assign (spec.md §6: "Unknown handles are interned into the destination
//! registry on deserialisation"). Indirect values are resolved to their
//! concrete bytes before writing — the disk format has no notion of
//! "value N is a byte range of value M", only flat key/type/bytes triples.
//!
//! Historical version bytes 1, 10, 11, 12, 20..=26 have all existed in the
//! wild (spec.md §6). This implementation only has one wire layout — the
//! pre-2.x C layouts are not reconstructable from the excerpts this crate
//! was grounded on — so every recognized version byte round-trips through
//! the same (current) layout; the byte itself is preserved faithfully so a
//! reader can still distinguish "this record claims to be v11" from "v26"
//! if a future change needs to special-case one of them.

use std::sync::Arc;

use super::registry::{global_nv_registry, global_tag_registry};
use super::value::{StoredValue, Value, ValueType};
use super::{Message, Timestamp, TimestampKind};
use crate::error::MessageError;

pub const CURRENT_VERSION: u8 = 26;

const KNOWN_VERSIONS: &[u8] = &[1, 10, 11, 12, 20, 21, 22, 23, 24, 25, 26];

pub fn is_known_version(version: u8) -> bool {
    KNOWN_VERSIONS.contains(&version)
}

fn type_tag(t: ValueType) -> u8 {
    match t {
        ValueType::String => 0,
        ValueType::Integer => 1,
        ValueType::Boolean => 2,
        ValueType::Float => 3,
        ValueType::List => 4,
        ValueType::Json => 5,
        ValueType::Null => 6,
        ValueType::Bytes => 7,
    }
}

fn type_from_tag(tag: u8) -> Option<ValueType> {
    Some(match tag {
        0 => ValueType::String,
        1 => ValueType::Integer,
        2 => ValueType::Boolean,
        3 => ValueType::Float,
        4 => ValueType::List,
        5 => ValueType::Json,
        6 => ValueType::Null,
        7 => ValueType::Bytes,
        _ => return None,
    })
}

fn write_ts(out: &mut Vec<u8>, ts: Timestamp) {
    out.extend_from_slice(&ts.seconds.to_be_bytes());
    out.extend_from_slice(&ts.microseconds.to_be_bytes());
    out.extend_from_slice(&ts.gmt_offset.to_be_bytes());
}

fn read_ts(buf: &[u8], pos: &mut usize) -> Result<Timestamp, MessageError> {
    let seconds = read_i64(buf, pos)?;
    let microseconds = read_u32(buf, pos)?;
    let gmt_offset = read_i32(buf, pos)?;
    Ok(Timestamp {
        seconds,
        microseconds,
        gmt_offset,
    })
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, MessageError> {
    let slice = buf
        .get(*pos..*pos + 4)
        .ok_or(MessageError::TruncatedFrame {
            expected: *pos + 4,
            actual: buf.len(),
        })?;
    *pos += 4;
    Ok(u32::from_be_bytes(slice.try_into().unwrap()))
}

fn read_i32(buf: &[u8], pos: &mut usize) -> Result<i32, MessageError> {
    read_u32(buf, pos).map(|v| v as i32)
}

fn read_u64(buf: &[u8], pos: &mut usize) -> Result<u64, MessageError> {
    let slice = buf
        .get(*pos..*pos + 8)
        .ok_or(MessageError::TruncatedFrame {
            expected: *pos + 8,
            actual: buf.len(),
        })?;
    *pos += 8;
    Ok(u64::from_be_bytes(slice.try_into().unwrap()))
}

fn read_i64(buf: &[u8], pos: &mut usize) -> Result<i64, MessageError> {
    read_u64(buf, pos).map(|v| v as i64)
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16, MessageError> {
    let slice = buf
        .get(*pos..*pos + 2)
        .ok_or(MessageError::TruncatedFrame {
            expected: *pos + 2,
            actual: buf.len(),
        })?;
    *pos += 2;
    Ok(u16::from_be_bytes(slice.try_into().unwrap()))
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8, MessageError> {
    let b = *buf.get(*pos).ok_or(MessageError::TruncatedFrame {
        expected: *pos + 1,
        actual: buf.len(),
    })?;
    *pos += 1;
    Ok(b)
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], MessageError> {
    let slice = buf
        .get(*pos..*pos + len)
        .ok_or(MessageError::TruncatedFrame {
            expected: *pos + len,
            actual: buf.len(),
        })?;
    *pos += len;
    Ok(slice)
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String, MessageError> {
    let len = read_u16(buf, pos)? as usize;
    let bytes = read_bytes(buf, pos, len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

impl Message {
    /// Serializes this message using [`CURRENT_VERSION`].
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_as(CURRENT_VERSION)
    }

    /// Serializes this message claiming `version` (must be one of the
    /// historically recognized version bytes).
    pub fn serialize_as(&self, version: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.push(version);
        out.extend_from_slice(&self.flags().to_be_bytes());
        out.push(self.priority());
        write_ts(&mut out, self.timestamp(TimestampKind::Recvd));
        write_ts(&mut out, self.timestamp(TimestampKind::Stamp));
        write_ts(&mut out, self.timestamp(TimestampKind::Processed));
        out.extend_from_slice(&self.receive_id().to_be_bytes());
        out.extend_from_slice(&0u64.to_be_bytes()); // reserved host id

        let resolved = self.resolved_values();
        out.extend_from_slice(&(resolved.len() as u32).to_be_bytes());
        for (handle, value) in &resolved {
            let name = global_nv_registry()
                .name_of(*handle)
                .unwrap_or_else(|| format!("#{}", handle.raw()));
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(type_tag(value.value_type));
            out.extend_from_slice(&(value.bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&value.bytes);
        }

        let tags = self.tags();
        out.extend_from_slice(&(tags.len() as u32).to_be_bytes());
        for tag in tags {
            let name = global_tag_registry()
                .name_of(tag)
                .unwrap_or_else(|| format!("#{}", tag.0));
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
        }

        out.extend_from_slice(&self.sdata_mask().0.to_be_bytes());
        out
    }

    fn resolved_values(&self) -> Vec<(super::NvHandle, Value)> {
        let values = self.0.values.read();
        values
            .iter()
            .filter_map(|(handle, stored)| match stored {
                StoredValue::Direct(v) => Some((*handle, v.clone())),
                StoredValue::Indirect(_) => {
                    self.get_value(*handle).map(|(bytes, ty)| (*handle, Value { bytes, value_type: ty }))
                }
            })
            .collect()
    }

    /// Reconstructs a `Message` from bytes previously produced by
    /// [`Message::serialize`] (or [`Message::serialize_as`]).
    pub fn deserialize(buf: &[u8], ack_sink: Arc<dyn super::AckSink>) -> Result<Message, MessageError> {
        let mut pos = 0usize;
        let version = read_u8(buf, &mut pos)?;
        if !is_known_version(version) {
            return Err(MessageError::UnsupportedVersion(version));
        }
        let flags = read_u32(buf, &mut pos)?;
        let priority = read_u8(buf, &mut pos)?;
        let recvd = read_ts(buf, &mut pos)?;
        let stamp = read_ts(buf, &mut pos)?;
        let processed = read_ts(buf, &mut pos)?;
        let receive_id = read_u64(buf, &mut pos)?;
        let _host_id = read_u64(buf, &mut pos)?;

        let value_count = read_u32(buf, &mut pos)? as usize;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let name = read_string(buf, &mut pos)?;
            let type_byte = read_u8(buf, &mut pos)?;
            let len = read_u32(buf, &mut pos)? as usize;
            let bytes = read_bytes(buf, &mut pos, len)?.to_vec();
            let handle = global_nv_registry().intern(&name);
            let value_type = type_from_tag(type_byte).ok_or(MessageError::UnsupportedVersion(version))?;
            values.push((handle, StoredValue::Direct(Value::new(bytes, value_type))));
        }
        values.sort_by_key(|(h, _)| *h);

        let tag_count = read_u32(buf, &mut pos)? as usize;
        let mut tags = std::collections::BTreeSet::new();
        for _ in 0..tag_count {
            let name = read_string(buf, &mut pos)?;
            tags.insert(global_tag_registry().intern(&name));
        }

        let sdata = super::SdataMask(read_u32(buf, &mut pos)?);

        Ok(Message::from_parts(
            receive_id,
            priority,
            [recvd, stamp, processed],
            flags,
            values,
            tags,
            sdata,
            ack_sink,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ack::AckOutcome;
    use std::sync::Mutex;

    struct Sink(Mutex<Vec<AckOutcome>>);
    impl super::super::AckSink for Sink {
        fn on_ack(&self, outcome: AckOutcome) {
            self.0.lock().unwrap().push(outcome);
        }
    }

    #[test]
    fn round_trips_for_every_known_version() {
        let sink: Arc<dyn super::super::AckSink> = Arc::new(Sink(Mutex::new(Vec::new())));
        let mut msg = Message::for_tests(sink.clone());
        let handle = global_nv_registry().intern("roundtrip.field");
        msg.set_value(handle, StoredValue::Direct(Value::string("payload"))).unwrap();

        for &version in KNOWN_VERSIONS {
            let bytes = msg.serialize_as(version);
            let restored = Message::deserialize(&bytes, sink.clone()).unwrap();
            assert_eq!(restored.receive_id(), msg.receive_id());
            assert_eq!(restored.priority(), msg.priority());
            let (restored_bytes, restored_type) = restored.get_value(handle).unwrap();
            let (original_bytes, original_type) = msg.get_value(handle).unwrap();
            assert_eq!(restored_bytes, original_bytes);
            assert_eq!(restored_type, original_type, "value type must round-trip for version {version}");
        }
    }

    #[test]
    fn every_type_tag_round_trips_to_the_same_value_type() {
        let sink: Arc<dyn super::super::AckSink> = Arc::new(Sink(Mutex::new(Vec::new())));
        for &ty in &[
            ValueType::String,
            ValueType::Integer,
            ValueType::Boolean,
            ValueType::Float,
            ValueType::List,
            ValueType::Json,
            ValueType::Null,
            ValueType::Bytes,
        ] {
            let mut msg = Message::for_tests(sink.clone());
            let handle = global_nv_registry().intern(&format!("typetag.{ty:?}"));
            msg.set_value(handle, StoredValue::Direct(Value::new(b"x".to_vec(), ty))).unwrap();
            let restored = Message::deserialize(&msg.serialize(), sink.clone()).unwrap();
            assert_eq!(restored.get_value(handle).unwrap().1, ty);
        }
    }

    #[test]
    fn message_new_payload_round_trips_as_bytes_not_null() {
        let sink: Arc<dyn super::super::AckSink> = Arc::new(Sink(Mutex::new(Vec::new())));
        let msg = Message::new(b"hello world", &crate::message::ParseOptions::default(), sink.clone());
        let restored = Message::deserialize(&msg.serialize(), sink).unwrap();
        let (_, ty) = restored.get_value(super::super::registry::MESSAGE).unwrap();
        assert_eq!(ty, ValueType::Bytes);
    }

    #[test]
    fn rejects_unknown_version_byte() {
        let sink: Arc<dyn super::super::AckSink> = Arc::new(Sink(Mutex::new(Vec::new())));
        let mut bytes = Message::for_tests(sink.clone()).serialize();
        bytes[0] = 200;
        assert!(matches!(
            Message::deserialize(&bytes, sink),
            Err(MessageError::UnsupportedVersion(200))
        ));
    }

    #[test]
    fn indirect_values_are_flattened_before_writing() {
        let sink: Arc<dyn super::super::AckSink> = Arc::new(Sink(Mutex::new(Vec::new())));
        let mut msg = Message::for_tests(sink.clone());
        let full = global_nv_registry().intern("sdflat.full");
        let part = global_nv_registry().intern("sdflat.part");
        msg.set_value(full, StoredValue::Direct(Value::string("abcdef"))).unwrap();
        msg.set_value(
            part,
            StoredValue::Indirect(super::super::IndirectValue {
                source_handle: full,
                offset: 1,
                length: 3,
                value_type: ValueType::String,
            }),
        )
        .unwrap();
        let bytes = msg.serialize();
        let restored = Message::deserialize(&bytes, sink).unwrap();
        assert_eq!(restored.get_value(part).unwrap().0.as_ref(), b"bcd");
    }
}
