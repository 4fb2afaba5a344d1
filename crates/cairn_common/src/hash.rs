//! Digests used as node identities, input signatures and cache keys.

use std::fmt;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// A 256-bit SHA-256 digest.
///
/// Used as the stable identity of graph nodes, as the input signature of a
/// built node, as the key of scan-cache entries and as the content digest of
/// files. Two digests are only ever compared for exact equality; ordering
/// exists so digests can be stored in sorted arrays and binary searched.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Size of a digest in bytes.
    pub const SIZE: usize = 32;

    /// The all-zero digest.
    pub const ZERO: Digest = Digest([0; 32]);

    /// Computes the digest of a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Wraps raw digest bytes, e.g. when reading them back from a frozen file.
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Streams a file from disk through SHA-256.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Self(hasher.finalize().into()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Incremental digest computation over a sequence of fields.
///
/// Strings are length-prefixed so that `("ab", "c")` and `("a", "bc")` never
/// produce the same digest.
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Feeds raw bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(data);
        self
    }

    /// Feeds a length-prefixed string.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.update_u64(s.len() as u64);
        self.hasher.update(s.as_bytes());
        self
    }

    /// Feeds a little-endian `u64`.
    pub fn update_u64(&mut self, v: u64) -> &mut Self {
        self.hasher.update(v.to_le_bytes());
        self
    }

    /// Feeds another digest.
    pub fn update_digest(&mut self, d: &Digest) -> &mut Self {
        self.hasher.update(d.as_bytes());
        self
    }

    /// Consumes the builder and returns the final digest.
    pub fn finish(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

impl Default for DigestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = Digest::from_bytes(b"hello world");
        let b = Digest::from_bytes(b"hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_differ() {
        let a = Digest::from_bytes(b"hello");
        let b = Digest::from_bytes(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn display_format() {
        let h = Digest::from_bytes(b"test");
        let s = format!("{h}");
        assert_eq!(s.len(), 64, "Display should be 64 hex chars");
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_value() {
        let h = Digest::from_bytes(b"abc");
        assert_eq!(
            h.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn debug_abbreviated() {
        let h = Digest::from_bytes(b"test");
        let s = format!("{h:?}");
        assert!(s.starts_with("Digest("));
        assert!(s.ends_with("..)"));
    }

    #[test]
    fn builder_is_length_prefixed() {
        let mut a = DigestBuilder::new();
        a.update_str("ab").update_str("c");
        let mut b = DigestBuilder::new();
        b.update_str("a").update_str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn of_file_matches_from_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"file contents").unwrap();
        assert_eq!(
            Digest::of_file(&path).unwrap(),
            Digest::from_bytes(b"file contents")
        );
    }

    #[test]
    fn of_missing_file_errors() {
        assert!(Digest::of_file(Path::new("/nonexistent/file.c")).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let h = Digest::from_bytes(b"serde test");
        let json = serde_json::to_string(&h).unwrap();
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
