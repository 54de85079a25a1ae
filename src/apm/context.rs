//! Trace identifiers and the propagated span context.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix shared by every trace-level tag that travels with the context.
pub const PROPAGATING_TAG_PREFIX: &str = "_dd.p.";

/// Propagating tag holding the upper 64 bits of a 128-bit trace id, in hex.
pub const TRACE_ID_HIGH_TAG: &str = "_dd.p.tid";

/// Sampling priorities understood by the propagation formats.
pub mod priority {
    pub const USER_REJECT: i32 = -1;
    pub const AUTO_REJECT: i32 = 0;
    pub const AUTO_KEEP: i32 = 1;
    pub const USER_KEEP: i32 = 2;
}

/// A 128-bit trace identifier.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct TraceId(u128);

impl TraceId {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn from_parts(high: u64, low: u64) -> Self {
        Self((u128::from(high) << 64) | u128::from(low))
    }

    /// New random id. The upper half starts with the current unix time in
    /// seconds, the lower half is random and never zero.
    pub fn generate() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::from_parts(secs << 32, new_span_id())
    }

    pub fn high(self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub fn low(self) -> u64 {
        self.0 as u64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Random non-zero 63-bit span id.
pub fn new_span_id() -> u64 {
    fastrand::u64(1..(1 << 63))
}

/// Everything that crosses a process boundary about a span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: u64,
    pub sampling_priority: Option<i32>,
    pub origin: Option<String>,
    /// `_dd.p.*` tags, keyed by their full name.
    pub propagating_tags: BTreeMap<String, String>,
}

impl SpanContext {
    pub fn is_valid(&self) -> bool {
        !self.trace_id.is_zero() && self.span_id != 0
    }

    pub fn is_sampled(&self) -> bool {
        self.sampling_priority.is_some_and(|p| p > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_splits_into_halves() {
        let id = TraceId::from_parts(0x640c_b8f4_0000_0000, 42);
        assert_eq!(id.high(), 0x640c_b8f4_0000_0000);
        assert_eq!(id.low(), 42);
        assert_eq!(id.to_string(), "640cb8f400000000000000000000002a");
    }

    #[test]
    fn generated_ids_are_never_zero() {
        for _ in 0..1000 {
            let id = TraceId::generate();
            assert_ne!(id.low(), 0);
            assert!(id.low() < (1 << 63));
            assert_ne!(new_span_id(), 0);
        }
    }

    #[test]
    fn zero_ids_are_invalid() {
        let ctx = SpanContext { span_id: 1, ..Default::default() };
        assert!(!ctx.is_valid());
        let ctx = SpanContext { trace_id: TraceId::from_u128(7), span_id: 1, ..Default::default() };
        assert!(ctx.is_valid());
        assert!(!ctx.is_sampled());
    }
}
