//! The per-record data model (spec.md §3 "Message", §4.1).
//!
//! `Message` is a cheap, `Arc`-backed handle: cloning it bumps a reference
//! count rather than copying data, mirroring the original's
//! `log_msg_ref`/`log_msg_unref` discipline. The Rust-native twist (Design
//! Notes §9, "Copy-on-write messages") is that mutation goes through
//! [`Message::make_writable`], which promotes to a uniquely-owned message
//! instead of relying on a write-protect bit plus manual cloning at every
//! call site — the bit still exists (`flags`), but only the multiplexer
//! touches it directly, everyone else just calls `make_writable`.

pub mod ack;
pub mod registry;
pub mod serialize;
pub mod value;

mod parse_options;
mod sdata;
mod timestamp;

pub use ack::{AckChain, AckOutcome, AckSink};
pub use parse_options::ParseOptions;
pub use registry::{global_nv_registry, global_tag_registry, NvHandle, TagId};
pub use sdata::SdataMask;
pub use timestamp::{Timestamp, TimestampKind};
pub use value::{IndirectValue, StoredValue, Value, ValueType};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::MessageError;

/// `write-protected`: set by a multiplexer before fan-out; any holder that
/// wants to mutate must go through [`Message::make_writable`] first.
pub const MF_WRITE_PROTECTED: u32 = 0x0001;

static NEXT_RECEIVE_ID: AtomicU64 = AtomicU64::new(1);

struct MessageInner {
    receive_id: u64,
    priority: u8,
    timestamps: [Timestamp; 3],
    flags: AtomicU32,
    values: RwLock<Vec<(NvHandle, StoredValue)>>,
    tags: RwLock<BTreeSet<TagId>>,
    sdata_mask: SdataMask,
    ack_chain: Arc<AckChain>,
}

/// An immutable-by-default, reference-counted log record.
///
/// Invariant (spec.md §3): a `Message` reachable from more than one live
/// reference is either write-protected or has been explicitly cloned for
/// the additional holder. `Message`'s `Clone` impl only ever bumps the
/// `Arc`, so the invariant is the caller's responsibility exactly where the
/// spec places it: the multiplexer write-protects before fan-out (see
/// `crate::pipe::multiplexer`), and any handler that wants to mutate a
/// shared message must call [`Message::make_writable`] first.
#[derive(Clone)]
pub struct Message(Arc<MessageInner>);

impl Message {
    /// Builds a new message from raw bytes, as a source driver would after
    /// reading one record off the wire.
    pub fn new(payload: &[u8], parse_options: &ParseOptions, ack_sink: Arc<dyn AckSink>) -> Self {
        let receive_id = NEXT_RECEIVE_ID.fetch_add(1, Ordering::Relaxed);
        let mut values = vec![(
            registry::MESSAGE,
            StoredValue::Direct(Value::new(payload.to_vec(), ValueType::Bytes)),
        )];
        values.sort_by_key(|(h, _)| *h);
        let inner = MessageInner {
            receive_id,
            priority: parse_options.default_priority,
            timestamps: [Timestamp::now(), Timestamp::default(), Timestamp::default()],
            flags: AtomicU32::new(0),
            values: RwLock::new(values),
            tags: RwLock::new(BTreeSet::new()),
            sdata_mask: SdataMask::default(),
            ack_chain: AckChain::new_root(ack_sink),
        };
        Message(Arc::new(inner))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(ack_sink: Arc<dyn AckSink>) -> Self {
        Self::new(b"test", &ParseOptions::default(), ack_sink)
    }

    /// Rebuilds a message from already-decoded fields; used by
    /// [`serialize::deserialize`] once a frame has been parsed. `ack_sink`
    /// roots a fresh ack chain — a deserialized message (e.g. read back off
    /// the durable queue) starts a new acknowledgement lifecycle, it does
    /// not resume whatever chain produced the bytes.
    pub(crate) fn from_parts(
        receive_id: u64,
        priority: u8,
        timestamps: [Timestamp; 3],
        flags: u32,
        mut values: Vec<(NvHandle, StoredValue)>,
        tags: BTreeSet<TagId>,
        sdata_mask: SdataMask,
        ack_sink: Arc<dyn AckSink>,
    ) -> Self {
        values.sort_by_key(|(h, _)| *h);
        let inner = MessageInner {
            receive_id,
            priority,
            timestamps,
            flags: AtomicU32::new(flags),
            values: RwLock::new(values),
            tags: RwLock::new(tags),
            sdata_mask,
            ack_chain: AckChain::new_root(ack_sink),
        };
        Message(Arc::new(inner))
    }

    pub fn receive_id(&self) -> u64 {
        self.0.receive_id
    }

    pub fn priority(&self) -> u8 {
        self.0.priority
    }

    pub fn timestamp(&self, kind: TimestampKind) -> Timestamp {
        self.0.timestamps[kind as usize]
    }

    pub fn set_timestamp(&mut self, kind: TimestampKind, ts: Timestamp) -> Result<(), MessageError> {
        Self::make_writable(self);
        let inner = Arc::get_mut(&mut self.0).expect("make_writable guarantees unique ownership");
        inner.timestamps[kind as usize] = ts;
        Ok(())
    }

    pub fn flags(&self) -> u32 {
        self.0.flags.load(Ordering::Acquire)
    }

    pub fn is_write_protected(&self) -> bool {
        self.flags() & MF_WRITE_PROTECTED != 0
    }

    /// Sets the write-protect bit. Called by multiplexers before fan-out;
    /// does not require unique ownership because it is a flag flip, not a
    /// table mutation (spec.md §4.2).
    pub fn write_protect(&self) {
        self.0.flags.fetch_or(MF_WRITE_PROTECTED, Ordering::AcqRel);
    }

    pub fn ack_chain(&self) -> &Arc<AckChain> {
        &self.0.ack_chain
    }

    pub fn sdata_mask(&self) -> SdataMask {
        self.0.sdata_mask
    }

    pub fn set_sdata_mask(&mut self, mask: SdataMask) {
        Self::make_writable(self);
        // SAFETY-free: SdataMask is Copy and stored outside the RwLock, but
        // writers must still go through make_writable so that a shared
        // reader never observes a half-updated message.
        let inner = Arc::get_mut(&mut self.0).expect("make_writable guarantees unique ownership");
        inner.sdata_mask = mask;
    }

    /// Promotes `this` to a uniquely-owned, writable message in place,
    /// cloning the dynamic name-value table (but not the underlying value
    /// bytes, which stay `Arc`-shared) if the message is shared or
    /// write-protected. Returns `this` for chaining.
    pub fn make_writable(this: &mut Message) -> &mut Message {
        let needs_clone = this.is_write_protected() || Arc::strong_count(&this.0) > 1;
        if needs_clone {
            let cloned = this.deep_clone();
            *this = cloned;
        }
        this
    }

    fn deep_clone(&self) -> Message {
        let values = self.0.values.read().clone();
        let tags = self.0.tags.read().clone();
        let inner = MessageInner {
            receive_id: self.0.receive_id,
            priority: self.0.priority,
            timestamps: self.0.timestamps,
            flags: AtomicU32::new(0),
            values: RwLock::new(values),
            tags: RwLock::new(tags),
            sdata_mask: self.0.sdata_mask,
            ack_chain: self.0.ack_chain.clone(),
        };
        Message(Arc::new(inner))
    }

    /// Stores `value` under `handle`. Requires the message to already be
    /// writable (see [`Message::make_writable`]); does not clone on its own.
    pub fn set_value(&mut self, handle: NvHandle, value: StoredValue) -> Result<(), MessageError> {
        if self.is_write_protected() {
            return Err(MessageError::NotWritable);
        }
        if let StoredValue::Indirect(ind) = &value {
            self.check_no_indirect_cycle(handle, ind.source_handle)?;
        }
        let mut values = self.0.values.write();
        match values.binary_search_by_key(&handle, |(h, _)| *h) {
            Ok(idx) => values[idx].1 = value,
            Err(idx) => values.insert(idx, (handle, value)),
        }
        Ok(())
    }

    fn check_no_indirect_cycle(&self, target: NvHandle, mut cursor: NvHandle) -> Result<(), MessageError> {
        let values = self.0.values.read();
        let mut hops = 0;
        loop {
            if cursor == target {
                return Err(MessageError::IndirectCycle(target));
            }
            hops += 1;
            if hops > values.len() + 1 {
                // Any longer chain than the table size must already be
                // cyclic even if it hasn't looped back to `target` yet.
                return Err(MessageError::IndirectCycle(target));
            }
            match values.binary_search_by_key(&cursor, |(h, _)| *h) {
                Ok(idx) => match &values[idx].1 {
                    StoredValue::Indirect(next) => cursor = next.source_handle,
                    StoredValue::Direct(_) => return Ok(()),
                },
                Err(_) => return Ok(()),
            }
        }
    }

    /// Reads the resolved bytes and type for `handle`, following one level
    /// of indirection if necessary.
    pub fn get_value(&self, handle: NvHandle) -> Option<(Arc<[u8]>, ValueType)> {
        let values = self.0.values.read();
        let stored = &values.get(values.binary_search_by_key(&handle, |(h, _)| *h).ok()?)?.1;
        match stored {
            StoredValue::Direct(v) => Some((v.bytes.clone(), v.value_type)),
            StoredValue::Indirect(ind) => {
                let (source_idx, _) = values
                    .binary_search_by_key(&ind.source_handle, |(h, _)| *h)
                    .ok()
                    .map(|i| (i, ()))?;
                if let StoredValue::Direct(source) = &values[source_idx].1 {
                    let start = ind.offset as usize;
                    let end = start + ind.length as usize;
                    source
                        .bytes
                        .get(start..end)
                        .map(|slice| (Arc::from(slice), ind.value_type))
                } else {
                    None
                }
            }
        }
    }

    pub fn unset(&mut self, handle: NvHandle) -> Result<(), MessageError> {
        if self.is_write_protected() {
            return Err(MessageError::NotWritable);
        }
        let mut values = self.0.values.write();
        if let Ok(idx) = values.binary_search_by_key(&handle, |(h, _)| *h) {
            values.remove(idx);
        }
        Ok(())
    }

    pub fn add_tag(&mut self, tag: TagId) {
        Self::make_writable(self);
        self.0.tags.write().insert(tag);
    }

    pub fn has_tag(&self, tag: TagId) -> bool {
        self.0.tags.read().contains(&tag)
    }

    pub fn tags(&self) -> BTreeSet<TagId> {
        self.0.tags.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<AckOutcome>>);
    impl AckSink for Recorder {
        fn on_ack(&self, outcome: AckOutcome) {
            self.0.lock().unwrap().push(outcome);
        }
    }

    fn sink() -> Arc<Recorder> {
        Arc::new(Recorder(Mutex::new(Vec::new())))
    }

    #[test]
    fn clone_is_cheap_and_shares_storage() {
        let msg = Message::for_tests(sink());
        let clone = msg.clone();
        assert_eq!(msg.receive_id(), clone.receive_id());
        assert_eq!(Arc::strong_count(&msg.0), 2);
    }

    #[test]
    fn mutating_a_shared_message_clones_first() {
        let msg = Message::for_tests(sink());
        let mut clone = msg.clone();
        let handle = global_nv_registry().intern("custom");
        clone
            .set_value(handle, StoredValue::Direct(Value::string("x")))
            .unwrap_err();
        Message::make_writable(&mut clone);
        clone
            .set_value(handle, StoredValue::Direct(Value::string("x")))
            .unwrap();
        assert!(msg.get_value(handle).is_none(), "original must be untouched");
        assert_eq!(Arc::strong_count(&msg.0), 1, "clone detached into its own Arc");
    }

    #[test]
    fn write_protect_forces_clone_on_mutation() {
        let msg = Message::for_tests(sink());
        msg.write_protect();
        let mut msg = msg;
        Message::make_writable(&mut msg);
        assert!(!msg.is_write_protected());
    }

    #[test]
    fn indirect_cycle_is_rejected() {
        let mut msg = Message::for_tests(sink());
        let a = global_nv_registry().intern("a.field");
        let b = global_nv_registry().intern("b.field");
        msg.set_value(
            a,
            StoredValue::Indirect(IndirectValue {
                source_handle: b,
                offset: 0,
                length: 1,
                value_type: ValueType::String,
            }),
        )
        .unwrap();
        let err = msg.set_value(
            b,
            StoredValue::Indirect(IndirectValue {
                source_handle: a,
                offset: 0,
                length: 1,
                value_type: ValueType::String,
            }),
        );
        assert!(matches!(err, Err(MessageError::IndirectCycle(_))));
    }

    #[test]
    fn indirect_value_resolves_against_source_bytes() {
        let mut msg = Message::for_tests(sink());
        let full = global_nv_registry().intern("full");
        let part = global_nv_registry().intern("part");
        msg.set_value(full, StoredValue::Direct(Value::string("hello world")))
            .unwrap();
        msg.set_value(
            part,
            StoredValue::Indirect(IndirectValue {
                source_handle: full,
                offset: 6,
                length: 5,
                value_type: ValueType::String,
            }),
        )
        .unwrap();
        let (bytes, ty) = msg.get_value(part).unwrap();
        assert_eq!(&*bytes, b"world");
        assert_eq!(ty, ValueType::String);
    }
}
