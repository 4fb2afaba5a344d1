//! Error types for frozen file access.

use std::path::PathBuf;

/// Errors raised while mapping, validating, reading or writing a frozen file.
///
/// `Io`, `BadMagic` and `Truncated` are format-level failures: the whole file
/// must be treated as absent. The remaining variants report a structurally
/// corrupt body discovered while following pointers.
#[derive(Debug, thiserror::Error)]
pub enum FrozenError {
    /// The file could not be opened, mapped, written or renamed.
    #[error("could not map file {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The header or trailer magic number does not match the expected format.
    #[error("bad magic number in {path}: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        /// The file that was rejected.
        path: PathBuf,
        /// The magic number of the requested format.
        expected: u32,
        /// The value actually stored in the file.
        found: u32,
    },

    /// The file is shorter than its fixed header (and trailer).
    #[error("{path} is truncated: {len} bytes, need at least {needed}")]
    Truncated {
        /// The file that was rejected.
        path: PathBuf,
        /// Actual length in bytes.
        len: usize,
        /// Minimum length for this format.
        needed: usize,
    },

    /// A read or a followed pointer fell outside the blob.
    #[error("offset {offset} out of bounds for {len}-byte blob")]
    OutOfBounds {
        /// The offending absolute offset.
        offset: usize,
        /// Length of the blob.
        len: usize,
    },

    /// A stored string is not valid UTF-8.
    #[error("string at offset {offset} is not valid UTF-8")]
    InvalidUtf8 {
        /// Absolute offset of the string bytes.
        offset: usize,
    },

    /// An array index past the array's element count.
    #[error("index {index} out of range for array of {len} elements")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Element count of the array.
        len: usize,
    },

    /// The arena grew beyond what a 32-bit relative pointer can address.
    #[error("frozen blob of {len} bytes exceeds the relative pointer range")]
    TooLarge {
        /// Arena length in bytes.
        len: usize,
    },
}

impl FrozenError {
    /// Returns `true` for errors that mean "this file is not a usable file of
    /// the requested kind": wrong magic, truncation, or I/O failure.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            FrozenError::Io { .. } | FrozenError::BadMagic { .. } | FrozenError::Truncated { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_magic_display() {
        let err = FrozenError::BadMagic {
            path: PathBuf::from("build.dag"),
            expected: 0x1234_5678,
            found: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("bad magic number"));
        assert!(msg.contains("0x12345678"));
        assert!(msg.contains("0x00000000"));
    }

    #[test]
    fn io_error_display() {
        let err = FrozenError::Io {
            path: PathBuf::from("/tmp/cache/build.state"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("could not map file"));
        assert!(msg.contains("build.state"));
    }

    #[test]
    fn truncated_display() {
        let err = FrozenError::Truncated {
            path: PathBuf::from("a.scancache"),
            len: 3,
            needed: 40,
        };
        assert_eq!(
            err.to_string(),
            "a.scancache is truncated: 3 bytes, need at least 40"
        );
    }

    #[test]
    fn format_error_classification() {
        let truncated = FrozenError::Truncated {
            path: PathBuf::new(),
            len: 0,
            needed: 4,
        };
        assert!(truncated.is_format_error());
        let oob = FrozenError::OutOfBounds { offset: 10, len: 4 };
        assert!(!oob.is_format_error());
    }
}
