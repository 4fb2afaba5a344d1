//! The build graph store.
//!
//! A build graph is produced once from node descriptors ([`descriptor`],
//! [`builder`]), frozen to a `.dag` file ([`writer`]) and mapped back by every
//! later build ([`reader`]) without a parsing pass. Besides the nodes the file
//! carries the pass table, the global file and glob signatures that invalidate
//! the whole graph, and the names of the cache files that belong to it.

#![warn(missing_docs)]

pub mod builder;
pub mod descriptor;
pub mod error;
mod layout;
pub mod reader;
pub mod signatures;
pub mod types;
pub mod writer;

pub use builder::{tmp_name, wants_content_digest, DagBuilder, GraphSettings, PassRegistry};
pub use descriptor::{GraphDescriptor, NodeDescriptor};
pub use error::DagError;
pub use reader::{
    Dag, DagFormat, DagNode, EnvVarRef, FileRef, FileSignatureRef, GlobSignatureRef, KeywordRef,
    PassRef, ScannerView,
};
pub use signatures::{check_signatures, glob_digest, DiskProbe, GraphStaleness, SignatureProbe};
pub use types::{
    node_identity, DagData, EnvVar, FileSignature, GenericFlags, GenericScanner, GlobSignature,
    Keyword, NodeData, NodeFlags, Pass, Scanner, ScannerKind,
};
pub use writer::{save_dag, write_dag};
