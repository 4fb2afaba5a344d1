//! Content-digest cache: remembers the SHA-256 of input files keyed by
//! filename, valid while the file's timestamp is unchanged.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cairn_common::{path_hash, Digest};
use cairn_frozen::{
    Cursor, FrozenBuilder, FrozenError, FrozenFormat, FrozenRecord, FrozenView, DIGEST_CACHE_MAGIC,
};

use crate::policy::{is_recent, EvictionPolicy};

mod layout {
    pub const MAGIC: usize = 0;
    pub const RECORDS: usize = 8;
    pub const ROOT_SIZE: usize = 16;

    pub const FILENAME: usize = 0;
    pub const FILENAME_HASH: usize = 8;
    pub const DIGEST: usize = 16;
    pub const ACCESS_TIME: usize = 48;
    pub const TIMESTAMP: usize = 56;
    pub const RECORD_SIZE: usize = 64;
}

/// The `.digestcache` file format.
pub struct DigestCacheFormat;

impl FrozenFormat for DigestCacheFormat {
    const NAME: &'static str = "digest cache";
    const MAGIC: u32 = DIGEST_CACHE_MAGIC;
    const HEADER_SIZE: usize = layout::ROOT_SIZE;
    const HAS_TRAILER: bool = false;
}

/// A cached content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRecord {
    /// The file.
    pub filename: String,
    /// `path_hash(filename)`.
    pub filename_hash: u32,
    /// SHA-256 of the contents.
    pub digest: Digest,
    /// Last time the record was used, in seconds.
    pub access_time: u64,
    /// File timestamp when the digest was computed, in nanoseconds.
    pub timestamp: u64,
}

impl<'a> FrozenRecord<'a> for DigestRecord {
    const SIZE: usize = layout::RECORD_SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            filename: at.str_at(layout::FILENAME)?.to_string(),
            filename_hash: at.u32_at(layout::FILENAME_HASH)?,
            digest: at.digest_at(layout::DIGEST)?,
            access_time: at.u64_at(layout::ACCESS_TIME)?,
            timestamp: at.u64_at(layout::TIMESTAMP)?,
        })
    }
}

/// Decodes every record of a loaded digest cache, in stored order.
pub fn read_records(view: &FrozenView) -> Result<Vec<DigestRecord>, FrozenError> {
    view.root().array_at::<DigestRecord>(layout::RECORDS)?.to_vec()
}

/// Thread-safe content-digest cache for one build.
pub struct DigestCache {
    now: u64,
    records: Mutex<HashMap<String, DigestRecord>>,
}

impl DigestCache {
    /// Starts with no records. `now` is the access time, in seconds, stamped
    /// on every record used during this build.
    pub fn empty(now: u64) -> Self {
        Self {
            now,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Loads the cache at `path`, or starts empty if it is missing or invalid.
    pub fn open(path: &Path, now: u64) -> Self {
        let loaded = FrozenView::load::<DigestCacheFormat>(path).and_then(|v| read_records(&v));
        match loaded {
            Ok(records) => {
                tracing::debug!(path = %path.display(), records = records.len(), "loaded digest cache");
                Self {
                    now,
                    records: Mutex::new(
                        records
                            .into_iter()
                            .map(|r| (r.filename.clone(), r))
                            .collect(),
                    ),
                }
            }
            Err(FrozenError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no digest cache, starting empty");
                Self::empty(now)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding digest cache");
                Self::empty(now)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DigestRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the record for `filename`, whether or not it is still valid.
    pub fn lookup(&self, filename: &str) -> Option<DigestRecord> {
        self.lock().get(filename).cloned()
    }

    /// Returns the digest of `filename`, reusing the cached one when the
    /// stored timestamp equals `timestamp`. Otherwise `hasher` is called once
    /// and its result is cached under `timestamp`.
    pub fn get_or_compute<H>(&self, filename: &str, timestamp: u64, hasher: H) -> io::Result<Digest>
    where
        H: FnOnce() -> io::Result<Digest>,
    {
        if let Some(record) = self.lock().get_mut(filename) {
            if record.timestamp == timestamp {
                record.access_time = self.now;
                tracing::trace!(file = filename, "digest cache hit");
                return Ok(record.digest);
            }
        }
        // the lock is not held while hashing
        let digest = hasher()?;
        tracing::trace!(file = filename, "digest cache miss");
        self.lock().insert(
            filename.to_string(),
            DigestRecord {
                filename: filename.to_string(),
                filename_hash: path_hash(filename),
                digest,
                access_time: self.now,
                timestamp,
            },
        );
        Ok(digest)
    }

    /// Lays out the surviving records: those accessed within
    /// `policy.digest_max_age_secs`, capped at `policy.digest_max_records`
    /// most recently used.
    pub fn write(&self, policy: &EvictionPolicy) -> FrozenBuilder {
        let mut kept: Vec<DigestRecord> = self
            .lock()
            .values()
            .filter(|r| is_recent(r.access_time, self.now, policy.digest_max_age_secs))
            .cloned()
            .collect();
        let before = kept.len();
        kept.sort_by(|a, b| {
            b.access_time
                .cmp(&a.access_time)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        kept.truncate(policy.digest_max_records);
        kept.sort_by(|a, b| a.filename.cmp(&b.filename));
        tracing::debug!(kept = kept.len(), evicted_lru = before - kept.len(), "writing digest cache");

        let mut b = FrozenBuilder::new();
        let root = b.alloc(layout::ROOT_SIZE);
        b.put_u32(root + layout::MAGIC, DIGEST_CACHE_MAGIC);
        b.put_records(root + layout::RECORDS, layout::RECORD_SIZE, &kept, |b, at, r| {
            b.put_str(at + layout::FILENAME, &r.filename);
            b.put_u32(at + layout::FILENAME_HASH, r.filename_hash);
            b.put_digest(at + layout::DIGEST, &r.digest);
            b.put_u64(at + layout::ACCESS_TIME, r.access_time);
            b.put_u64(at + layout::TIMESTAMP, r.timestamp);
        });
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting<'c>(
        calls: &'c Cell<usize>,
        contents: &'static [u8],
    ) -> impl FnOnce() -> io::Result<Digest> + 'c {
        move || {
            calls.set(calls.get() + 1);
            Ok(Digest::from_bytes(contents))
        }
    }

    fn reload(cache: &DigestCache, policy: &EvictionPolicy, now: u64) -> DigestCache {
        let bytes = cache.write(policy).into_bytes(None);
        let view = FrozenView::from_bytes::<DigestCacheFormat>(bytes).unwrap();
        let cache = DigestCache::empty(now);
        for r in read_records(&view).unwrap() {
            cache.lock().insert(r.filename.clone(), r);
        }
        cache
    }

    #[test]
    fn unchanged_timestamp_skips_hasher() {
        let cache = DigestCache::empty(1_000);
        let calls = Cell::new(0);
        let first = cache.get_or_compute("a.c", 7, counting(&calls, b"v1")).unwrap();
        let again = cache.get_or_compute("a.c", 7, counting(&calls, b"v2")).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(first, again);
    }

    #[test]
    fn changed_timestamp_rehashes_once_and_persists() {
        let cache = DigestCache::empty(1_000);
        let calls = Cell::new(0);
        cache.get_or_compute("a.c", 7, counting(&calls, b"v1")).unwrap();
        let fresh = cache.get_or_compute("a.c", 8, counting(&calls, b"v2")).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(fresh, Digest::from_bytes(b"v2"));

        let reloaded = reload(&cache, &EvictionPolicy::unbounded(), 2_000);
        let record = reloaded.lookup("a.c").unwrap();
        assert_eq!(record.timestamp, 8);
        assert_eq!(record.digest, fresh);
        assert_eq!(record.filename_hash, path_hash("a.c"));

        let hit = reloaded.get_or_compute("a.c", 8, counting(&calls, b"v3")).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(hit, fresh);
        assert_eq!(reloaded.lookup("a.c").unwrap().access_time, 2_000);
    }

    #[test]
    fn hasher_error_is_not_cached() {
        let cache = DigestCache::empty(0);
        let err = cache
            .get_or_compute("gone.c", 0, || Err(io::Error::from(io::ErrorKind::NotFound)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(cache.lookup("gone.c").is_none());
    }

    #[test]
    fn eviction_by_age_and_count() {
        let cache = DigestCache::empty(0);
        for (name, access) in [("old.c", 10), ("mid.c", 500), ("new.c", 900), ("newest.c", 1_000)] {
            cache.lock().insert(
                name.to_string(),
                DigestRecord {
                    filename: name.to_string(),
                    filename_hash: path_hash(name),
                    digest: Digest::from_bytes(name.as_bytes()),
                    access_time: access,
                    timestamp: 1,
                },
            );
        }
        let at_now = DigestCache {
            now: 1_000,
            records: Mutex::new(cache.lock().clone()),
        };
        let policy = EvictionPolicy {
            digest_max_age_secs: 600,
            digest_max_records: 2,
            ..EvictionPolicy::unbounded()
        };
        let kept = reload(&at_now, &policy, 1_000);
        assert_eq!(kept.len(), 2);
        assert!(kept.lookup("newest.c").is_some());
        assert!(kept.lookup("new.c").is_some());
        assert!(kept.lookup("mid.c").is_none());
        assert!(kept.lookup("old.c").is_none());
    }

    #[test]
    fn open_missing_and_corrupt_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.digestcache");
        assert!(DigestCache::open(&path, 0).is_empty());
        std::fs::write(&path, b"not a digest cache at all").unwrap();
        assert!(DigestCache::open(&path, 0).is_empty());
    }

    #[test]
    fn open_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.digestcache");
        let cache = DigestCache::empty(50);
        cache
            .get_or_compute("x.c", 3, || Ok(Digest::from_bytes(b"x")))
            .unwrap();
        cache
            .write(&EvictionPolicy::default())
            .finish(&dir.path().join("build.digestcache.tmp"), None)
            .unwrap()
            .publish(&path)
            .unwrap();
        let loaded = DigestCache::open(&path, 60);
        assert_eq!(loaded.lookup("x.c").unwrap().digest, Digest::from_bytes(b"x"));
    }
}
