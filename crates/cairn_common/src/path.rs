//! Cheap path hashing for pre-filtering file lists.

use serde::{Deserialize, Serialize};

/// Computes the 32-bit hash of a path string.
///
/// This is not a content digest: it only lets callers reject unequal
/// filenames before comparing the full strings.
pub fn path_hash(path: &str) -> u32 {
    xxhash_rust::xxh3::xxh3_64(path.as_bytes()) as u32
}

/// Hashes the extension of `path` (including the leading dot).
///
/// Returns `None` for paths without an extension.
pub fn extension_hash(path: &str) -> Option<u32> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some(path_hash(&name[dot..]))
}

/// A filename paired with its [`path_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileAndHash {
    /// The path as written by the graph producer.
    pub filename: String,
    /// `path_hash(filename)`.
    pub filename_hash: u32,
}

impl FileAndHash {
    /// Creates an entry, computing the hash of `filename`.
    pub fn new(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let filename_hash = path_hash(&filename);
        Self {
            filename,
            filename_hash,
        }
    }
}
