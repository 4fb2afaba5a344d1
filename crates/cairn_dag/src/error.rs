//! Error types for graph construction and access.

use std::path::PathBuf;

use cairn_frozen::FrozenError;

/// Errors raised while building, writing or reading a build graph.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// The `.dag` file could not be mapped, failed validation or is corrupt.
    #[error(transparent)]
    Frozen(#[from] FrozenError),

    /// A pass name was registered twice with different build orders.
    #[error("pass `{name}` has build order {existing}, but a node asked for {requested}")]
    InconsistentPassOrder {
        /// The pass name.
        name: String,
        /// The build order recorded first.
        existing: i32,
        /// The conflicting build order.
        requested: i32,
    },

    /// A node depends on a label that no node declares.
    #[error("node `{node}` depends on unknown node `{dependency}`")]
    UnknownDependency {
        /// Label of the depending node.
        node: String,
        /// The unresolved label.
        dependency: String,
    },

    /// Two descriptors use the same label.
    #[error("duplicate node label `{label}`")]
    DuplicateLabel {
        /// The repeated label.
        label: String,
    },

    /// Two descriptors describe structurally identical work.
    #[error("nodes `{first}` and `{second}` have the same identity {digest}")]
    DuplicateNode {
        /// Label of the node declared first.
        first: String,
        /// Label of the node declared second.
        second: String,
        /// The shared identity digest.
        digest: cairn_common::Digest,
    },

    /// The dependency relation is not acyclic.
    #[error("dependency cycle through node `{label}`")]
    DependencyCycle {
        /// A node on the cycle.
        label: String,
    },

    /// A generic scanner keyword is longer than its stored 16-bit length allows.
    #[error("scanner keyword of {len} bytes exceeds the {max}-byte limit")]
    KeywordTooLong {
        /// Length of the keyword in bytes.
        len: usize,
        /// Longest keyword that can be stored.
        max: usize,
    },

    /// The identity of a node or scanner could not be encoded.
    #[error("failed to encode identity of `{label}`: {reason}")]
    Identity {
        /// Label of the node (or scanner owner).
        label: String,
        /// Description of the encoding failure.
        reason: String,
    },

    /// A descriptor file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A descriptor file is not valid JSON for the descriptor schema.
    #[error("invalid graph descriptor: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistent_pass_display() {
        let err = DagError::InconsistentPassOrder {
            name: "compile".into(),
            existing: 10,
            requested: 20,
        };
        let msg = err.to_string();
        assert!(msg.contains("compile"));
        assert!(msg.contains("10"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn frozen_errors_pass_through() {
        let err: DagError = FrozenError::TooLarge { len: 1 << 40 }.into();
        assert!(matches!(err, DagError::Frozen(FrozenError::TooLarge { .. })));
    }

    #[test]
    fn unknown_dependency_names_both_labels() {
        let err = DagError::UnknownDependency {
            node: "link".into(),
            dependency: "compile-a".into(),
        };
        assert_eq!(
            err.to_string(),
            "node `link` depends on unknown node `compile-a`"
        );
    }
}
