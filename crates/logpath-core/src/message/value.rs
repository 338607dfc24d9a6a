//! Typed name-value storage, including the indirect (zero-copy) value form
//! (spec.md §3 "Message").

use std::sync::Arc;

use super::registry::NvHandle;

/// The type tag carried alongside every stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    String,
    Integer,
    Boolean,
    Float,
    List,
    Json,
    Null,
    Bytes,
}

/// A resolved (non-indirect) name-value pair: owned bytes plus a type tag.
#[derive(Clone, Debug)]
pub struct Value {
    pub bytes: Arc<[u8]>,
    pub value_type: ValueType,
}

impl Value {
    pub fn new(bytes: impl Into<Arc<[u8]>>, value_type: ValueType) -> Self {
        Self {
            bytes: bytes.into(),
            value_type,
        }
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Self::new(s.as_ref().as_bytes().to_vec(), ValueType::String)
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// A value that references a byte range inside another value already
/// present in the same message, avoiding a copy when e.g. a parser splits
/// structured data out of `MESSAGE` (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndirectValue {
    pub source_handle: NvHandle,
    pub offset: u32,
    pub length: u32,
    pub value_type: ValueType,
}

/// A stored name-value entry: either a resolved value or an indirect
/// reference into another entry.
#[derive(Clone, Debug)]
pub enum StoredValue {
    Direct(Value),
    Indirect(IndirectValue),
}

impl StoredValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            StoredValue::Direct(v) => v.value_type,
            StoredValue::Indirect(i) => i.value_type,
        }
    }
}
