//! Per-call trace identifiers.
//!
//! A `TraceId` is 48 bits of unix milliseconds followed by 80 random bits, rendered as 32 hex
//! characters. Ids created later compare greater (at millisecond granularity), so log lines
//! sort by creation time. The id only correlates log events across the retries of one call.
use rand::Rng;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    pub fn new() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        Self::from_parts(millis, rand::rng().random())
    }

    fn from_parts(millis: u128, random: u128) -> Self {
        let timestamp = (millis & 0xFFFF_FFFF_FFFF) << 80;
        let entropy = random & ((1u128 << 80) - 1);
        Self(timestamp | entropy)
    }

    /// Milliseconds since the unix epoch at creation.
    pub fn timestamp_millis(&self) -> u64 {
        (self.0 >> 80) as u64
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
