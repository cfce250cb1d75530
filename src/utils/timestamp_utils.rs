//! Timestamp utilities for lock-free access tracking
//!
//! Converts between `Instant` and nanoseconds so cache entries can record
//! their last access in an `AtomicU64` instead of behind a lock.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// Global epoch all stored timestamps are relative to
fn timestamp_epoch() -> &'static Instant {
    static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);
    &EPOCH
}

/// Convert an `Instant` to nanoseconds since the epoch for atomic storage
///
/// Uses seconds + subsec nanos to avoid truncating u128 to u64.
#[inline]
pub fn instant_to_nanos(instant: Instant) -> u64 {
    let duration = instant.saturating_duration_since(*timestamp_epoch());
    let secs = duration.as_secs();
    let nanos = u64::from(duration.subsec_nanos());

    secs.saturating_mul(1_000_000_000).saturating_add(nanos)
}

/// Convert nanoseconds since the epoch back to an `Instant`
#[inline]
pub fn nanos_to_instant(nanos: u64) -> Instant {
    *timestamp_epoch() + Duration::from_nanos(nanos)
}
