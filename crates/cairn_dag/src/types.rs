//! Owned graph model.
//!
//! These are the values the writer freezes and the reader can reconstruct
//! with [`crate::Dag::to_data`]. Identity digests are computed here.

use std::collections::BTreeMap;

use cairn_common::{Digest, FileAndHash};
use serde::{Deserialize, Serialize};

use crate::error::DagError;

/// Per-node flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeFlags(u32);

impl NodeFlags {
    /// Outputs are kept when the action fails.
    pub const PRECIOUS_OUTPUTS: NodeFlags = NodeFlags(1 << 0);
    /// Outputs are overwritten in place rather than deleted before the action runs.
    pub const OVERWRITE_OUTPUTS: NodeFlags = NodeFlags(1 << 1);

    /// No flags set.
    pub const fn empty() -> Self {
        NodeFlags(0)
    }

    /// Reconstructs flags from their stored representation.
    pub const fn from_bits(bits: u32) -> Self {
        NodeFlags(bits)
    }

    /// The stored representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every flag in `other` is set.
    pub const fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`.
    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }
}

/// Flags of a generic keyword scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GenericFlags(u32);

impl GenericFlags {
    /// A keyword must be followed by whitespace.
    pub const REQUIRE_WHITESPACE: GenericFlags = GenericFlags(1 << 0);
    /// The include target is delimited by `"..."` or `<...>`.
    pub const USE_SEPARATORS: GenericFlags = GenericFlags(1 << 1);
    /// An undelimited target is treated as a system include.
    pub const BARE_MEANS_SYSTEM: GenericFlags = GenericFlags(1 << 2);

    /// No flags set.
    pub const fn empty() -> Self {
        GenericFlags(0)
    }

    /// Reconstructs flags from their stored representation.
    pub const fn from_bits(bits: u32) -> Self {
        GenericFlags(bits)
    }

    /// The stored representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every flag in `other` is set.
    pub const fn contains(self, other: GenericFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`.
    pub fn insert(&mut self, other: GenericFlags) {
        self.0 |= other.0;
    }
}

/// An environment override applied when running a node's action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Value to set.
    pub value: String,
}

/// A directive keyword recognised by a generic scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keyword {
    /// The keyword text, e.g. `include`.
    pub text: String,
    /// Whether files found through this keyword are scanned in turn.
    pub follow: bool,
}

/// Configuration of a keyword-driven scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GenericScanner {
    /// Matching flags.
    pub flags: GenericFlags,
    /// Keywords in match priority order.
    pub keywords: Vec<Keyword>,
}

/// The dialect of an include scanner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScannerKind {
    /// C preprocessor `#include` directives.
    Cpp,
    /// Configurable keyword directives.
    Generic(GenericScanner),
}

impl ScannerKind {
    /// Stored discriminant.
    pub fn tag(&self) -> u32 {
        match self {
            ScannerKind::Cpp => 0,
            ScannerKind::Generic(_) => 1,
        }
    }
}

/// An include scanner attached to one or more nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scanner {
    /// Scanner dialect and its configuration.
    pub kind: ScannerKind,
    /// Directories searched for included files.
    pub include_paths: Vec<String>,
    /// Identity digest of `kind` and `include_paths`.
    pub guid: Digest,
}

impl Scanner {
    /// Creates a scanner, computing its identity digest from its configuration.
    ///
    /// Fails with [`DagError::KeywordTooLong`] if a keyword does not fit the
    /// stored 16-bit length.
    pub fn new(kind: ScannerKind, include_paths: Vec<String>) -> Result<Self, DagError> {
        if let ScannerKind::Generic(generic) = &kind {
            let max = usize::from(u16::MAX);
            if let Some(k) = generic.keywords.iter().find(|k| k.text.len() > max) {
                return Err(DagError::KeywordTooLong {
                    len: k.text.len(),
                    max,
                });
            }
        }
        let guid = encode_digest("scanner", &(&kind, &include_paths))?;
        Ok(Self {
            kind,
            include_paths,
            guid,
        })
    }
}

/// A named pass; nodes of lower build order are built first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pass {
    /// Pass name.
    pub name: String,
    /// Ordering key.
    pub build_order: i32,
}

/// A file whose timestamp invalidates the whole graph when it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    /// Path of the file.
    pub path: String,
    /// Timestamp in nanoseconds when the graph was generated; 0 if missing.
    pub timestamp: u64,
}

/// A directory whose listing invalidates the whole graph when it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobSignature {
    /// Path of the directory.
    pub path: String,
    /// [`crate::glob_digest`] of the listing when the graph was generated.
    pub digest: Digest,
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Structural identity digest.
    pub guid: Digest,
    /// Node flags.
    pub flags: NodeFlags,
    /// Command line or other action text.
    pub action: String,
    /// Human-readable description shown while building.
    pub annotation: String,
    /// Index into [`DagData::passes`].
    pub pass_index: u32,
    /// Indices of nodes that must be built first.
    pub dependencies: Vec<u32>,
    /// Indices of nodes that depend on this one.
    pub back_links: Vec<u32>,
    /// Declared input files.
    pub inputs: Vec<FileAndHash>,
    /// Output files.
    pub outputs: Vec<FileAndHash>,
    /// Directories created by the action.
    pub output_dirs: Vec<FileAndHash>,
    /// Side outputs that are not consumed by other nodes.
    pub aux_outputs: Vec<FileAndHash>,
    /// Environment overrides, sorted by name.
    pub env_vars: Vec<EnvVar>,
    /// Include scanner applied to the inputs.
    pub scanner: Option<Scanner>,
}

/// A complete graph ready to be frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagData {
    /// Nodes in index order.
    pub nodes: Vec<NodeData>,
    /// Passes in index order.
    pub passes: Vec<Pass>,
    /// Files that invalidate the graph.
    pub file_signatures: Vec<FileSignature>,
    /// Directory listings that invalidate the graph.
    pub glob_signatures: Vec<GlobSignature>,
    /// Extension hashes of inputs whose contents are digested; empty means all.
    pub content_digest_extensions: Vec<u32>,
    /// Name of the built-node state file.
    pub state_file_name: String,
    /// Temporary name the state file is written under.
    pub state_file_name_tmp: String,
    /// Name of the include-scan cache.
    pub scan_cache_file_name: String,
    /// Temporary name of the include-scan cache.
    pub scan_cache_file_name_tmp: String,
    /// Name of the content-digest cache.
    pub digest_cache_file_name: String,
    /// Temporary name of the content-digest cache.
    pub digest_cache_file_name_tmp: String,
    /// Title shown by the build front end.
    pub build_title: Option<String>,
}

/// Fields that define what a node does. Labels, annotations and flags are
/// not part of it.
#[derive(Serialize)]
struct NodeIdentity<'a> {
    action: &'a str,
    pass: &'a str,
    inputs: Vec<&'a str>,
    outputs: Vec<&'a str>,
    output_dirs: Vec<&'a str>,
    aux_outputs: Vec<&'a str>,
    env: BTreeMap<&'a str, &'a str>,
    scanner: Option<Digest>,
}

/// Computes the identity digest of a node from its structural fields.
#[allow(clippy::too_many_arguments)]
pub fn node_identity(
    label: &str,
    action: &str,
    pass: &str,
    inputs: &[FileAndHash],
    outputs: &[FileAndHash],
    output_dirs: &[FileAndHash],
    aux_outputs: &[FileAndHash],
    env_vars: &[EnvVar],
    scanner: Option<&Scanner>,
) -> Result<Digest, DagError> {
    let identity = NodeIdentity {
        action,
        pass,
        inputs: names(inputs),
        outputs: names(outputs),
        output_dirs: names(output_dirs),
        aux_outputs: names(aux_outputs),
        env: env_vars
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect(),
        scanner: scanner.map(|s| s.guid),
    };
    encode_digest(label, &identity)
}

fn names(files: &[FileAndHash]) -> Vec<&str> {
    files.iter().map(|f| f.filename.as_str()).collect()
}

fn encode_digest<T: Serialize>(label: &str, value: &T) -> Result<Digest, DagError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        DagError::Identity {
            label: label.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(Digest::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<FileAndHash> {
        names.iter().map(|n| FileAndHash::new(*n)).collect()
    }

    fn identity(action: &str, env: &[EnvVar]) -> Digest {
        node_identity(
            "n",
            action,
            "compile",
            &files(&["a.c"]),
            &files(&["a.o"]),
            &[],
            &[],
            env,
            None,
        )
        .unwrap()
    }

    #[test]
    fn identity_depends_on_action() {
        assert_eq!(identity("cc a.c", &[]), identity("cc a.c", &[]));
        assert_ne!(identity("cc a.c", &[]), identity("cc -O2 a.c", &[]));
    }

    #[test]
    fn identity_ignores_env_order() {
        let a = EnvVar {
            name: "A".into(),
            value: "1".into(),
        };
        let b = EnvVar {
            name: "B".into(),
            value: "2".into(),
        };
        assert_eq!(
            identity("cc", &[a.clone(), b.clone()]),
            identity("cc", &[b, a])
        );
    }

    #[test]
    fn identity_ignores_label() {
        let one = node_identity("one", "cc", "p", &[], &[], &[], &[], &[], None).unwrap();
        let two = node_identity("two", "cc", "p", &[], &[], &[], &[], &[], None).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn output_dirs_are_not_outputs() {
        let as_output = node_identity("n", "mk", "p", &[], &files(&["d"]), &[], &[], &[], None);
        let as_dir = node_identity("n", "mk", "p", &[], &[], &files(&["d"]), &[], &[], None);
        assert_ne!(as_output.unwrap(), as_dir.unwrap());
    }

    #[test]
    fn oversized_keyword_is_rejected() {
        let generic = |len: usize| {
            Scanner::new(
                ScannerKind::Generic(GenericScanner {
                    flags: GenericFlags::empty(),
                    keywords: vec![Keyword {
                        text: "k".repeat(len),
                        follow: false,
                    }],
                }),
                vec![],
            )
        };
        assert!(generic(usize::from(u16::MAX)).is_ok());
        assert!(matches!(
            generic(usize::from(u16::MAX) + 1),
            Err(DagError::KeywordTooLong { len: 65536, max: 65535 })
        ));
    }

    #[test]
    fn scanner_guid_tracks_configuration() {
        let cpp = Scanner::new(ScannerKind::Cpp, vec!["include".into()]).unwrap();
        let same = Scanner::new(ScannerKind::Cpp, vec!["include".into()]).unwrap();
        let other_paths = Scanner::new(ScannerKind::Cpp, vec!["inc".into()]).unwrap();
        let generic = Scanner::new(
            ScannerKind::Generic(GenericScanner {
                flags: GenericFlags::USE_SEPARATORS,
                keywords: vec![Keyword {
                    text: "include".into(),
                    follow: true,
                }],
            }),
            vec!["include".into()],
        )
        .unwrap();
        assert_eq!(cpp.guid, same.guid);
        assert_ne!(cpp.guid, other_paths.guid);
        assert_ne!(cpp.guid, generic.guid);
    }

    #[test]
    fn flags_contain_and_insert() {
        let mut f = NodeFlags::empty();
        assert!(!f.contains(NodeFlags::PRECIOUS_OUTPUTS));
        f.insert(NodeFlags::PRECIOUS_OUTPUTS);
        assert!(f.contains(NodeFlags::PRECIOUS_OUTPUTS));
        assert!(!f.contains(NodeFlags::OVERWRITE_OUTPUTS));
        assert_eq!(NodeFlags::from_bits(f.bits()), f);
    }
}
