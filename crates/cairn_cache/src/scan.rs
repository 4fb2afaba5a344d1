//! Include-scan cache: memoizes the includes found in a file by a given
//! scanner configuration.
//!
//! Entries are keyed by a digest over the filename and the scanner's identity
//! digest, so any change to a scanner's keywords, flags or include paths
//! misses every entry it produced.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cairn_common::{path_hash, Digest, DigestBuilder};
use cairn_frozen::{
    Cursor, FrozenArray, FrozenBuilder, FrozenError, FrozenFormat, FrozenRecord, FrozenView,
    SCAN_MAGIC,
};

use crate::policy::{is_recent, EvictionPolicy};

mod layout {
    pub const MAGIC: usize = 0;
    pub const ENTRY_COUNT: usize = 4;
    pub const KEYS: usize = 8;
    pub const ENTRIES: usize = 16;
    pub const ACCESS_TIMES: usize = 24;
    pub const MAGIC_END: usize = 32;
    pub const ROOT_SIZE: usize = 40;

    pub const FILE_TIMESTAMP: usize = 0;
    pub const INCLUDES: usize = 8;
    pub const ENTRY_SIZE: usize = 16;

    pub const FILENAME: usize = 0;
    pub const FILENAME_HASH: usize = 8;
    pub const FOLLOW: usize = 12;
    pub const INCLUDE_SIZE: usize = 16;
}

/// The `.scancache` file format.
pub struct ScanCacheFormat;

impl FrozenFormat for ScanCacheFormat {
    const NAME: &'static str = "scan cache";
    const MAGIC: u32 = SCAN_MAGIC;
    const HEADER_SIZE: usize = layout::ROOT_SIZE;
    const HAS_TRAILER: bool = false;
}

/// A file found by a scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncludedFile {
    /// Resolved path of the included file.
    pub filename: String,
    /// `path_hash(filename)`.
    pub filename_hash: u32,
    /// Whether the included file is itself scanned.
    pub follow: bool,
}

impl IncludedFile {
    /// Creates an entry, computing the path hash.
    pub fn new(filename: impl Into<String>, follow: bool) -> Self {
        let filename = filename.into();
        Self {
            filename_hash: path_hash(&filename),
            filename,
            follow,
        }
    }
}

impl<'a> FrozenRecord<'a> for IncludedFile {
    const SIZE: usize = layout::INCLUDE_SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            filename: at.str_at(layout::FILENAME)?.to_string(),
            filename_hash: at.u32_at(layout::FILENAME_HASH)?,
            follow: at.u32_at(layout::FOLLOW)? != 0,
        })
    }
}

/// The memoized result of scanning one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// File timestamp when it was scanned.
    pub file_timestamp: u64,
    /// Included files in discovery order.
    pub includes: Vec<IncludedFile>,
}

impl<'a> FrozenRecord<'a> for ScanResult {
    const SIZE: usize = layout::ENTRY_SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            file_timestamp: at.u64_at(layout::FILE_TIMESTAMP)?,
            includes: at.array_at::<IncludedFile>(layout::INCLUDES)?.to_vec()?,
        })
    }
}

/// One decoded entry of a scan cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Digest of filename and scanner identity.
    pub key: Digest,
    /// Last time the entry was used, in seconds.
    pub access_time: u64,
    /// The memoized scan.
    pub result: ScanResult,
}

/// Typed access to a loaded `.scancache` file.
pub struct ScanFile {
    view: FrozenView,
}

impl ScanFile {
    /// Maps and validates `path`, including the end-of-root magic and every
    /// entry.
    pub fn open(path: &Path) -> Result<Self, FrozenError> {
        Self::validate(FrozenView::load::<ScanCacheFormat>(path)?)
    }

    /// Validates an in-memory scan cache.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FrozenError> {
        Self::validate(FrozenView::from_bytes::<ScanCacheFormat>(bytes)?)
    }

    fn validate(view: FrozenView) -> Result<Self, FrozenError> {
        let found = view.root().u32_at(layout::MAGIC_END)?;
        if found != SCAN_MAGIC {
            return Err(FrozenError::BadMagic {
                path: view.path().to_path_buf(),
                expected: SCAN_MAGIC,
                found,
            });
        }
        let file = Self { view };
        file.all_entries()?;
        Ok(file)
    }

    /// Header magic number.
    pub fn magic(&self) -> Result<u32, FrozenError> {
        self.view.root().u32_at(layout::MAGIC)
    }

    /// Magic number stored at the end of the root record.
    pub fn magic_end(&self) -> Result<u32, FrozenError> {
        self.view.root().u32_at(layout::MAGIC_END)
    }

    /// Number of entries.
    pub fn entry_count(&self) -> Result<u32, FrozenError> {
        self.view.root().u32_at(layout::ENTRY_COUNT)
    }

    fn keys(&self) -> Result<FrozenArray<'_, Digest>, FrozenError> {
        self.view.root().array_at(layout::KEYS)
    }

    fn entries(&self) -> Result<FrozenArray<'_, ScanResult>, FrozenError> {
        self.view.root().array_at(layout::ENTRIES)
    }

    fn access_times(&self) -> Result<FrozenArray<'_, u64>, FrozenError> {
        self.view.root().array_at(layout::ACCESS_TIMES)
    }

    /// Index of `key` in the sorted key array.
    pub fn find(&self, key: &Digest) -> Result<Option<usize>, FrozenError> {
        Ok(self.keys()?.binary_search_by(|k| k.cmp(key))?.ok())
    }

    /// Decodes entry `index`.
    pub fn entry(&self, index: usize) -> Result<ScanEntry, FrozenError> {
        Ok(ScanEntry {
            key: self.keys()?.get(index)?,
            access_time: self.access_times()?.get(index)?,
            result: self.entries()?.get(index)?,
        })
    }

    /// Decodes every entry in key order.
    pub fn all_entries(&self) -> Result<Vec<ScanEntry>, FrozenError> {
        (0..self.keys()?.len()).map(|i| self.entry(i)).collect()
    }
}

struct ScanState {
    added: HashMap<Digest, ScanResult>,
    touched: HashMap<usize, u64>,
}

/// Thread-safe include-scan cache for one build.
pub struct ScanCache {
    now: u64,
    frozen: Option<ScanFile>,
    state: Mutex<ScanState>,
}

impl ScanCache {
    /// Starts with no entries. `now` is the access time, in seconds, stamped
    /// on entries used during this build.
    pub fn empty(now: u64) -> Self {
        Self {
            now,
            frozen: None,
            state: Mutex::new(ScanState {
                added: HashMap::new(),
                touched: HashMap::new(),
            }),
        }
    }

    /// Loads the cache at `path`, or starts empty if it is missing or invalid.
    pub fn open(path: &Path, now: u64) -> Self {
        let mut cache = Self::empty(now);
        match ScanFile::open(path) {
            Ok(file) => {
                tracing::debug!(
                    path = %path.display(),
                    entries = file.entry_count().unwrap_or(0),
                    "loaded scan cache"
                );
                cache.frozen = Some(file);
            }
            Err(FrozenError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no scan cache, starting empty");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding scan cache");
            }
        }
        cache
    }

    /// Builds a cache over an already validated file.
    pub fn with_file(file: ScanFile, now: u64) -> Self {
        let mut cache = Self::empty(now);
        cache.frozen = Some(file);
        cache
    }

    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The key of a (file, scanner configuration) pair.
    pub fn key(filename: &str, scanner_guid: &Digest) -> Digest {
        let mut b = DigestBuilder::new();
        b.update_str(filename).update_digest(scanner_guid);
        b.finish()
    }

    /// Returns the memoized scan of `filename` by the scanner `scanner_guid`,
    /// whatever its timestamp.
    pub fn lookup(&self, filename: &str, scanner_guid: &Digest) -> Option<ScanResult> {
        let key = Self::key(filename, scanner_guid);
        let mut state = self.lock();
        if let Some(hit) = state.added.get(&key) {
            return Some(hit.clone());
        }
        let frozen = self.frozen.as_ref()?;
        let found = match frozen.find(&key) {
            Ok(Some(i)) => frozen.entries().and_then(|e| e.get(i)).map(|r| Some((i, r))),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match found {
            Ok(Some((index, result))) => {
                state.touched.insert(index, self.now);
                Some(result)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, file = filename, "corrupt scan cache entry ignored");
                None
            }
        }
    }

    /// Like [`ScanCache::lookup`], but only returns a result scanned at
    /// `timestamp`.
    pub fn lookup_fresh(
        &self,
        filename: &str,
        scanner_guid: &Digest,
        timestamp: u64,
    ) -> Option<ScanResult> {
        let hit = self.lookup(filename, scanner_guid)?;
        if hit.file_timestamp == timestamp {
            Some(hit)
        } else {
            tracing::trace!(file = filename, "stale scan cache entry");
            None
        }
    }

    /// Records the includes found in `filename` when it had timestamp `timestamp`.
    pub fn insert(
        &self,
        filename: &str,
        scanner_guid: &Digest,
        timestamp: u64,
        includes: Vec<IncludedFile>,
    ) {
        let key = Self::key(filename, scanner_guid);
        self.lock().added.insert(
            key,
            ScanResult {
                file_timestamp: timestamp,
                includes,
            },
        );
    }

    /// Lays out the frozen entries merged with the ones added this build.
    /// Added entries replace frozen ones with the same key; entries not used
    /// within `policy.scan_max_age_secs` are dropped.
    pub fn write(&self, policy: &EvictionPolicy) -> Result<FrozenBuilder, FrozenError> {
        let state = self.lock();
        let mut merged: Vec<ScanEntry> = Vec::new();
        if let Some(frozen) = &self.frozen {
            for (index, mut entry) in frozen.all_entries()?.into_iter().enumerate() {
                if state.added.contains_key(&entry.key) {
                    continue;
                }
                if let Some(&t) = state.touched.get(&index) {
                    entry.access_time = t;
                }
                merged.push(entry);
            }
        }
        merged.extend(state.added.iter().map(|(key, result)| ScanEntry {
            key: *key,
            access_time: self.now,
            result: result.clone(),
        }));
        drop(state);

        let before = merged.len();
        merged.retain(|e| is_recent(e.access_time, self.now, policy.scan_max_age_secs));
        merged.sort_by(|a, b| a.key.cmp(&b.key));
        tracing::debug!(kept = merged.len(), evicted = before - merged.len(), "writing scan cache");

        let mut b = FrozenBuilder::new();
        let root = b.alloc(layout::ROOT_SIZE);
        b.put_u32(root + layout::MAGIC, SCAN_MAGIC);
        b.put_u32(root + layout::ENTRY_COUNT, merged.len() as u32);
        let keys: Vec<Digest> = merged.iter().map(|e| e.key).collect();
        b.put_digest_slice(root + layout::KEYS, &keys);
        b.put_records(root + layout::ENTRIES, layout::ENTRY_SIZE, &merged, |b, at, e| {
            b.put_u64(at + layout::FILE_TIMESTAMP, e.result.file_timestamp);
            b.put_records(
                at + layout::INCLUDES,
                layout::INCLUDE_SIZE,
                &e.result.includes,
                |b, at, inc| {
                    b.put_str(at + layout::FILENAME, &inc.filename);
                    b.put_u32(at + layout::FILENAME_HASH, inc.filename_hash);
                    b.put_u32(at + layout::FOLLOW, u32::from(inc.follow));
                },
            );
        });
        let times: Vec<u64> = merged.iter().map(|e| e.access_time).collect();
        b.put_u64_slice(root + layout::ACCESS_TIMES, &times);
        b.put_u32(root + layout::MAGIC_END, SCAN_MAGIC);
        Ok(b)
    }
}
