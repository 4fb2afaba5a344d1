//! Error types for cache operations.

use std::path::PathBuf;

use cairn_dag::DagError;
use cairn_frozen::FrozenError;

/// Errors that can occur during cache operations.
///
/// Most cache operations are fail-safe: a cache file that cannot be loaded
/// is logged and replaced by an empty cache rather than reported here. This
/// enum covers the failures that must reach the caller: a missing or corrupt
/// build graph, and failures while writing caches back.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A frozen cache file failed to load, decode or write.
    #[error(transparent)]
    Frozen(#[from] FrozenError),

    /// The build graph failed to load or decode.
    #[error(transparent)]
    Dag(#[from] DagError),

    /// An I/O error occurred while reading an input or writing a cache.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A node index outside the loaded graph.
    #[error("node index {index} out of range for graph of {count} nodes")]
    UnknownNode {
        /// The requested index.
        index: u32,
        /// Number of nodes in the graph.
        count: u32,
    },
}
