//! Global signatures: files and directory listings whose change makes the
//! whole graph stale, so that it must be regenerated before building.

use std::path::Path;

use cairn_common::{file_timestamp, Digest, DigestBuilder};

use crate::error::DagError;
use crate::reader::Dag;

/// Why a graph must be regenerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphStaleness {
    /// A signature file's timestamp differs from the recorded one.
    FileChanged {
        /// The file.
        path: String,
        /// Timestamp recorded at generation.
        recorded: u64,
        /// Current timestamp (0 if missing).
        current: u64,
    },
    /// A signature directory's listing differs from the recorded one.
    GlobChanged {
        /// The directory.
        path: String,
    },
}

impl std::fmt::Display for GraphStaleness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphStaleness::FileChanged { path, current: 0, .. } => {
                write!(f, "signature file {path} was removed")
            }
            GraphStaleness::FileChanged { path, .. } => write!(f, "signature file {path} changed"),
            GraphStaleness::GlobChanged { path } => write!(f, "contents of {path} changed"),
        }
    }
}

/// Source of current signature values.
pub trait SignatureProbe {
    /// Current timestamp of `path` in nanoseconds; 0 when missing.
    fn timestamp(&self, path: &str) -> u64;
    /// Current [`glob_digest`] of the directory at `path`.
    fn listing_digest(&self, path: &str) -> Digest;
}

/// Probes the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskProbe;

impl SignatureProbe for DiskProbe {
    fn timestamp(&self, path: &str) -> u64 {
        file_timestamp(Path::new(path)).unwrap_or(0)
    }

    fn listing_digest(&self, path: &str) -> Digest {
        glob_digest(&list_dir(Path::new(path)))
    }
}

/// Names of the entries of `dir`, empty when it cannot be read.
pub fn list_dir(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Digest of a directory listing, independent of entry order.
pub fn glob_digest<S: AsRef<str>>(entries: &[S]) -> Digest {
    let mut names: Vec<&str> = entries.iter().map(AsRef::as_ref).collect();
    names.sort_unstable();
    let mut builder = DigestBuilder::new();
    builder.update_u64(names.len() as u64);
    for name in names {
        builder.update_str(name);
    }
    builder.finish()
}

/// Returns the first stale signature of `dag`, file signatures first.
pub fn check_signatures(
    dag: &Dag,
    probe: &impl SignatureProbe,
) -> Result<Option<GraphStaleness>, DagError> {
    for sig in dag.file_signatures()?.iter() {
        let sig = sig?;
        let current = probe.timestamp(sig.path);
        if current != sig.timestamp {
            tracing::debug!(path = sig.path, recorded = sig.timestamp, current, "file signature changed");
            return Ok(Some(GraphStaleness::FileChanged {
                path: sig.path.to_string(),
                recorded: sig.timestamp,
                current,
            }));
        }
    }
    for sig in dag.glob_signatures()?.iter() {
        let sig = sig?;
        if probe.listing_digest(sig.path) != sig.digest {
            tracing::debug!(path = sig.path, "glob signature changed");
            return Ok(Some(GraphStaleness::GlobChanged {
                path: sig.path.to_string(),
            }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_digest_ignores_order() {
        assert_eq!(glob_digest(&["b.c", "a.c"]), glob_digest(&["a.c", "b.c"]));
        assert_ne!(glob_digest(&["a.c"]), glob_digest(&["a.c", "b.c"]));
        assert_ne!(glob_digest::<&str>(&[]), glob_digest(&[""]));
    }

    #[test]
    fn staleness_messages() {
        let removed = GraphStaleness::FileChanged {
            path: "units.lua".into(),
            recorded: 5,
            current: 0,
        };
        assert_eq!(removed.to_string(), "signature file units.lua was removed");
        let glob = GraphStaleness::GlobChanged { path: "src".into() };
        assert_eq!(glob.to_string(), "contents of src changed");
    }

    #[test]
    fn disk_probe_lists_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.c"), b"").unwrap();
        std::fs::write(dir.path().join("y.c"), b"").unwrap();
        let path = dir.path().to_str().unwrap();
        assert_eq!(DiskProbe.listing_digest(path), glob_digest(&["y.c", "x.c"]));
        assert_eq!(DiskProbe.timestamp("/nonexistent/file"), 0);
    }
}
