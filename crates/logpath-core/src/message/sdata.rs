//! Opaque RFC5424 structured-data bitmap (spec.md §6, SPEC_FULL.md §3).
//!
//! The core never interprets this bitmap — only the (out-of-scope) parser
//! and serializer do — but it must round-trip through serialize/deserialize
//! bit-for-bit (Testable Property 10).

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SdataMask(pub u32);
