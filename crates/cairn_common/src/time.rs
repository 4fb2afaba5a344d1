//! File timestamps and wall-clock helpers.
//!
//! File timestamps are nanoseconds since the Unix epoch so that two writes
//! within the same second still compare unequal. Access times used for cache
//! eviction are coarser, in whole seconds.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds in one day.
pub const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Returns the modification time of `path` in nanoseconds since the Unix
/// epoch, or `None` if the file does not exist or cannot be stat'ed.
pub fn file_timestamp(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(since.as_nanos()).ok()
}

/// Returns the current wall-clock time in seconds since the Unix epoch.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_of_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        assert!(file_timestamp(&path).unwrap() > 0);
    }

    #[test]
    fn timestamp_of_missing_file() {
        assert!(file_timestamp(Path::new("/nonexistent/a.txt")).is_none());
    }

    #[test]
    fn now_is_after_2020() {
        assert!(unix_now_secs() > 1_577_836_800);
    }
}
