//! Filesystem access used by the up-to-date checks.
//!
//! Every timestamp, content digest and directory listing the caches consult
//! goes through [`FileSystem`], so rebuild decisions can be tested against an
//! in-memory tree.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use cairn_common::{file_timestamp, Digest};
use cairn_dag::signatures::{glob_digest, list_dir, SignatureProbe};

/// Read access to the files a build graph names.
pub trait FileSystem: Send + Sync {
    /// Modification time in nanoseconds since the epoch, `0` when missing.
    fn timestamp(&self, path: &str) -> u64;

    /// SHA-256 of the file contents.
    fn content_digest(&self, path: &str) -> io::Result<Digest>;

    /// Whole file contents.
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Entry names of a directory, empty when it cannot be read.
    fn list_dir(&self, path: &str) -> Vec<String>;

    /// Returns `true` if `path` exists.
    fn exists(&self, path: &str) -> bool {
        self.timestamp(path) != 0
    }
}

/// The real filesystem, with relative paths resolved against a root.
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    /// Resolves relative graph paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `path` against the root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FileSystem for DiskFs {
    fn timestamp(&self, path: &str) -> u64 {
        file_timestamp(&self.resolve(path)).unwrap_or(0)
    }

    fn content_digest(&self, path: &str) -> io::Result<Digest> {
        Digest::of_file(&self.resolve(path))
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path))
    }

    fn list_dir(&self, path: &str) -> Vec<String> {
        list_dir(&self.resolve(path))
    }
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn timestamp(&self, path: &str) -> u64 {
        (**self).timestamp(path)
    }

    fn content_digest(&self, path: &str) -> io::Result<Digest> {
        (**self).content_digest(path)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        (**self).read(path)
    }

    fn list_dir(&self, path: &str) -> Vec<String> {
        (**self).list_dir(path)
    }

    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }
}

/// In-memory filesystem with explicit timestamps.
///
/// Counts content-digest computations so tests can assert that cached digests
/// are reused.
#[derive(Debug, Default)]
pub struct MemFs {
    files: Mutex<HashMap<String, (u64, Vec<u8>)>>,
    digest_calls: AtomicUsize,
}

impl MemFs {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces `path` with `contents` and timestamp `timestamp`.
    pub fn write(&self, path: &str, timestamp: u64, contents: impl Into<Vec<u8>>) {
        self.lock().insert(path.to_string(), (timestamp, contents.into()));
    }

    /// Changes the timestamp of an existing file without touching its contents.
    pub fn touch(&self, path: &str, timestamp: u64) {
        if let Some(entry) = self.lock().get_mut(path) {
            entry.0 = timestamp;
        }
    }

    /// Deletes `path`.
    pub fn remove(&self, path: &str) {
        self.lock().remove(path);
    }

    /// Number of [`FileSystem::content_digest`] calls so far.
    pub fn digest_calls(&self) -> usize {
        self.digest_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, Vec<u8>)>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn not_found(path: &str) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such file"))
    }
}

impl FileSystem for MemFs {
    fn timestamp(&self, path: &str) -> u64 {
        self.lock().get(path).map_or(0, |(ts, _)| *ts)
    }

    fn content_digest(&self, path: &str) -> io::Result<Digest> {
        self.digest_calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .get(path)
            .map(|(_, bytes)| Digest::from_bytes(bytes))
            .ok_or_else(|| Self::not_found(path))
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.lock()
            .get(path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| Self::not_found(path))
    }

    fn list_dir(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Adapts a [`FileSystem`] to the graph's signature checks.
pub struct FsProbe<'a, F: ?Sized>(pub &'a F);

impl<F: FileSystem + ?Sized> SignatureProbe for FsProbe<'_, F> {
    fn timestamp(&self, path: &str) -> u64 {
        self.0.timestamp(path)
    }

    fn listing_digest(&self, path: &str) -> Digest {
        glob_digest(&self.0.list_dir(path))
    }
}

/// Directory part of `path`, `""` for a bare file name.
pub(crate) fn parent_dir(path: &str) -> &str {
    Path::new(path)
        .parent()
        .and_then(Path::to_str)
        .unwrap_or("")
}

/// Joins a directory and a relative path with `/`.
pub(crate) fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{rel}", dir.trim_end_matches('/'))
    }
}
