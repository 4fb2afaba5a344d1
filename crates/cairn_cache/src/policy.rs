//! Eviction limits applied when caches are written back.

use cairn_common::SECS_PER_DAY;

/// Bounds on how much history the scan and digest caches keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Digest records not accessed for this many seconds are dropped.
    pub digest_max_age_secs: u64,
    /// At most this many digest records are kept, most recently used first.
    pub digest_max_records: usize,
    /// Scan entries not accessed for this many seconds are dropped.
    pub scan_max_age_secs: u64,
}

impl EvictionPolicy {
    /// Keeps everything.
    pub const fn unbounded() -> Self {
        Self {
            digest_max_age_secs: u64::MAX,
            digest_max_records: usize::MAX,
            scan_max_age_secs: u64::MAX,
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            digest_max_age_secs: 30 * SECS_PER_DAY,
            digest_max_records: 100_000,
            scan_max_age_secs: 30 * SECS_PER_DAY,
        }
    }
}

/// Returns `true` if an entry last accessed at `access_time` is still within
/// `max_age` of `now`.
pub(crate) fn is_recent(access_time: u64, now: u64, max_age: u64) -> bool {
    now.saturating_sub(access_time) <= max_age
}
