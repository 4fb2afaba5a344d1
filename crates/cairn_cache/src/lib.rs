//! Incremental build caches.
//!
//! Three files live next to a build graph and carry knowledge from one build
//! to the next:
//!
//! - the built-node state ([`state`]): per node identity, whether it
//!   succeeded, its input signature and the files it touched;
//! - the include-scan cache ([`scan`]): the resolved includes of each file
//!   under each scanner configuration;
//! - the content-digest cache ([`digest`]): SHA-256 of input files, reused
//!   while their timestamps are unchanged.
//!
//! [`BuildSession`] ties them to a loaded graph: it decides which nodes are
//! out of date, collects outcomes from concurrent workers and publishes the
//! caches atomically at the end.

#![warn(missing_docs)]

pub mod digest;
pub mod error;
pub mod fs;
pub mod policy;
pub mod scan;
pub mod scanner;
pub mod session;
pub mod signature;
pub mod state;
pub mod uptodate;

pub use digest::{DigestCache, DigestCacheFormat, DigestRecord};
pub use error::CacheError;
pub use fs::{DiskFs, FileSystem, FsProbe, MemFs};
pub use policy::EvictionPolicy;
pub use scan::{IncludedFile, ScanCache, ScanCacheFormat, ScanEntry, ScanFile, ScanResult};
pub use scanner::{resolve_include, DirectiveScanner, FoundInclude, IncludeScanner};
pub use session::{BuildSession, NodeCheck};
pub use signature::{InputHasher, NodeInputs};
pub use state::{
    BuiltNode, BuiltNodeView, RecordedFile, RecordedFileRef, StateFile, StateFormat,
    StateRecorder,
};
pub use uptodate::{check_up_to_date, Freshness, RebuildReason};
