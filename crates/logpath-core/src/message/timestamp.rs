//! The three timestamps a [`super::Message`] carries (spec.md §3).

/// Seconds + microseconds + a GMT offset, matching the original's
/// `LogStamp` layout (`original_source/lib/timeutils`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub seconds: i64,
    pub microseconds: u32,
    pub gmt_offset: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: now.as_secs() as i64,
            microseconds: now.subsec_micros(),
            gmt_offset: 0,
        }
    }
}

/// Which of the three timestamp slots is being addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimestampKind {
    /// When the core received the message.
    Recvd,
    /// The timestamp carried in the message itself (e.g. syslog header).
    Stamp,
    /// When the message finished processing.
    Processed,
}
