//! Input signatures and implicit input discovery.

use std::collections::{HashSet, VecDeque};

use cairn_common::{Digest, DigestBuilder};
use cairn_dag::{wants_content_digest, Scanner};

use crate::digest::DigestCache;
use crate::fs::FileSystem;
use crate::scan::{IncludedFile, ScanCache};
use crate::scanner::{resolve_include, IncludeScanner};
use crate::state::RecordedFile;

const MISSING: u8 = 0;
const CONTENTS: u8 = 1;
const TIMESTAMP: u8 = 2;

/// Everything a node's inputs contributed to its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInputs {
    /// Digest over every declared and implicit input.
    pub signature: Digest,
    /// Declared inputs with the timestamps seen.
    pub input_files: Vec<RecordedFile>,
    /// Discovered includes with the timestamps seen, in discovery order.
    pub implicit_input_files: Vec<RecordedFile>,
}

/// Computes input signatures against the build's caches.
#[derive(Clone, Copy)]
pub struct InputHasher<'a> {
    fs: &'a dyn FileSystem,
    digests: &'a DigestCache,
    scans: &'a ScanCache,
    scanner: &'a dyn IncludeScanner,
    extension_hashes: &'a [u32],
}

impl<'a> InputHasher<'a> {
    /// `extension_hashes` selects the inputs whose contents are digested;
    /// empty selects all of them.
    pub fn new(
        fs: &'a dyn FileSystem,
        digests: &'a DigestCache,
        scans: &'a ScanCache,
        scanner: &'a dyn IncludeScanner,
        extension_hashes: &'a [u32],
    ) -> Self {
        Self {
            fs,
            digests,
            scans,
            scanner,
            extension_hashes,
        }
    }

    /// Resolved includes of one file, from the scan cache when the file's
    /// timestamp is unchanged.
    pub fn includes_of(&self, file: &str, scanner: &Scanner) -> Vec<IncludedFile> {
        let timestamp = self.fs.timestamp(file);
        if timestamp == 0 {
            return Vec::new();
        }
        if let Some(hit) = self.scans.lookup_fresh(file, &scanner.guid, timestamp) {
            return hit.includes;
        }
        let contents = match self.fs.read(file) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(file, error = %e, "could not read file for scanning");
                return Vec::new();
            }
        };
        let text = String::from_utf8_lossy(&contents);
        let includes: Vec<IncludedFile> = self
            .scanner
            .scan(&scanner.kind, &text)
            .iter()
            .filter_map(|found| {
                let resolved = resolve_include(self.fs, scanner, file, found);
                if resolved.is_none() {
                    tracing::trace!(file, target = %found.target, "unresolved include skipped");
                }
                resolved.map(|path| IncludedFile::new(path, found.follow))
            })
            .collect();
        self.scans.insert(file, &scanner.guid, timestamp, includes.clone());
        includes
    }

    /// Scans `inputs` and, transitively, every include marked to be followed.
    /// Each include is listed once, in the order it was first found; declared
    /// inputs are never listed.
    pub fn discover_implicit(&self, inputs: &[&str], scanner: &Scanner) -> Vec<String> {
        let mut seen: HashSet<String> = inputs.iter().map(|s| s.to_string()).collect();
        let mut queue: VecDeque<String> = inputs.iter().map(|s| s.to_string()).collect();
        let mut found = Vec::new();
        while let Some(file) = queue.pop_front() {
            for include in self.includes_of(&file, scanner) {
                if !seen.insert(include.filename.clone()) {
                    continue;
                }
                if include.follow {
                    queue.push_back(include.filename.clone());
                }
                found.push(include.filename);
            }
        }
        found
    }

    /// Computes the signature of a node with the given declared inputs.
    pub fn compute(&self, inputs: &[&str], scanner: Option<&Scanner>) -> NodeInputs {
        let implicit = scanner
            .map(|s| self.discover_implicit(inputs, s))
            .unwrap_or_default();
        let mut b = DigestBuilder::new();
        b.update_u64(inputs.len() as u64);
        let input_files = inputs.iter().map(|f| self.add_file(&mut b, f)).collect();
        b.update_u64(implicit.len() as u64);
        let implicit_input_files = implicit.iter().map(|f| self.add_file(&mut b, f)).collect();
        NodeInputs {
            signature: b.finish(),
            input_files,
            implicit_input_files,
        }
    }

    fn add_file(&self, b: &mut DigestBuilder, path: &str) -> RecordedFile {
        let timestamp = self.fs.timestamp(path);
        b.update_str(path);
        if timestamp == 0 {
            b.update(&[MISSING]);
        } else if wants_content_digest(self.extension_hashes, path) {
            let digest = self
                .digests
                .get_or_compute(path, timestamp, || self.fs.content_digest(path));
            match digest {
                Ok(d) => {
                    b.update(&[CONTENTS]).update_digest(&d);
                }
                Err(e) => {
                    tracing::warn!(file = path, error = %e, "could not digest input");
                    b.update(&[MISSING]);
                }
            }
        } else {
            b.update(&[TIMESTAMP]).update_u64(timestamp);
        }
        RecordedFile::new(path, timestamp)
    }
}
