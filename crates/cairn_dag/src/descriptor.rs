//! JSON node descriptors emitted by a graph producer.
//!
//! ```json
//! {
//!   "title": "demo",
//!   "nodes": [
//!     { "label": "cc-a", "action": "cc -c a.c -o a.o",
//!       "pass": { "name": "compile", "build_order": 10 },
//!       "inputs": ["a.c"], "outputs": ["a.o"],
//!       "scanner": { "kind": "cpp", "include_paths": ["include"] } },
//!     { "label": "link", "action": "cc a.o -o app", "deps": ["cc-a"],
//!       "pass": { "name": "link", "build_order": 20 },
//!       "inputs": ["a.o"], "outputs": ["app"] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DagError;

/// A whole graph as produced by the scripting layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    /// Optional build title; overrides the project title.
    #[serde(default)]
    pub title: Option<String>,
    /// Nodes in the order they are stored.
    pub nodes: Vec<NodeDescriptor>,
    /// Files that invalidate the graph when their timestamp changes.
    #[serde(default)]
    pub file_signatures: Vec<FileSignatureDescriptor>,
    /// Directories that invalidate the graph when their listing changes.
    #[serde(default)]
    pub glob_signatures: Vec<GlobSignatureDescriptor>,
}

impl GraphDescriptor {
    /// Parses a descriptor from JSON text.
    pub fn from_json(text: &str) -> Result<Self, DagError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a descriptor file.
    pub fn load(path: &Path) -> Result<Self, DagError> {
        let text = std::fs::read_to_string(path).map_err(|source| DagError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}

/// One node as produced by the scripting layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDescriptor {
    /// Producer-side name, used to express dependencies.
    pub label: String,
    /// Action text.
    pub action: String,
    /// Description shown while building.
    pub annotation: String,
    /// Pass the node belongs to.
    pub pass: PassDescriptor,
    /// Labels of nodes that must be built first.
    pub deps: Vec<String>,
    /// Input files.
    pub inputs: Vec<String>,
    /// Output files.
    pub outputs: Vec<String>,
    /// Auxiliary output files.
    pub aux_outputs: Vec<String>,
    /// Output directories.
    pub output_dirs: Vec<String>,
    /// Environment overrides.
    pub env: BTreeMap<String, String>,
    /// Include scanner applied to the inputs.
    pub scanner: Option<ScannerDescriptor>,
    /// Keep outputs when the action fails.
    pub precious: bool,
    /// Overwrite outputs in place.
    pub overwrite_outputs: bool,
}

/// Pass reference of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassDescriptor {
    /// Pass name.
    pub name: String,
    /// Ordering key.
    pub build_order: i32,
}

impl Default for PassDescriptor {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            build_order: 0,
        }
    }
}

/// Scanner configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScannerDescriptor {
    /// C preprocessor includes.
    Cpp {
        /// Directories searched for included files.
        #[serde(default)]
        include_paths: Vec<String>,
    },
    /// Keyword directives.
    Generic {
        /// Directories searched for included files.
        #[serde(default)]
        include_paths: Vec<String>,
        /// Keywords must be followed by whitespace.
        #[serde(default)]
        require_whitespace: bool,
        /// Targets are delimited by quotes or angle brackets.
        #[serde(default)]
        use_separators: bool,
        /// Undelimited targets are system includes.
        #[serde(default)]
        bare_means_system: bool,
        /// Directive keywords.
        keywords: Vec<KeywordDescriptor>,
    },
}

/// A keyword of a generic scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordDescriptor {
    /// Keyword text.
    pub text: String,
    /// Scan matched files recursively.
    #[serde(default)]
    pub follow: bool,
}

/// A file signature request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignatureDescriptor {
    /// Path of the file.
    pub path: String,
    /// Timestamp in nanoseconds; read from disk when absent.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// A glob signature request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobSignatureDescriptor {
    /// Path of the directory.
    pub path: String,
    /// Entries the producer saw; read from disk when absent.
    #[serde(default)]
    pub files: Option<Vec<String>>,
}
