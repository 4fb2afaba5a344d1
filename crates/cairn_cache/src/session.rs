//! One build's view of the graph and its caches.

use std::io;
use std::path::{Path, PathBuf};

use cairn_common::{unix_now_secs, Digest};
use cairn_dag::{check_signatures, Dag, GraphStaleness};
use cairn_frozen::FrozenError;
use rayon::prelude::*;

use crate::digest::DigestCache;
use crate::error::CacheError;
use crate::fs::{FileSystem, FsProbe};
use crate::policy::EvictionPolicy;
use crate::scan::ScanCache;
use crate::scanner::IncludeScanner;
use crate::signature::{InputHasher, NodeInputs};
use crate::state::{BuiltNode, RecordedFile, StateFile, StateRecorder};
use crate::uptodate::{check_up_to_date, Freshness, RebuildReason};

/// The up-to-date verdict for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCheck {
    /// Index of the node in the graph.
    pub index: u32,
    /// Identity digest of the node.
    pub guid: Digest,
    /// Whether the node must run.
    pub freshness: Freshness,
    /// The inputs seen while deciding.
    pub inputs: NodeInputs,
}

impl NodeCheck {
    /// The freshly computed input signature.
    pub fn signature(&self) -> &Digest {
        &self.inputs.signature
    }
}

/// Loads a build graph with its caches, answers up-to-date questions during
/// the build and writes the caches back at the end.
///
/// The graph must load. The state, scan and digest caches are fail-safe: a
/// missing or corrupt file starts that cache empty. Dropping a session
/// without calling [`BuildSession::finish`] leaves every file on disk
/// untouched.
pub struct BuildSession<F: FileSystem> {
    dag: Dag,
    dir: PathBuf,
    fs: F,
    policy: EvictionPolicy,
    state: Option<StateFile>,
    recorder: StateRecorder,
    scans: ScanCache,
    digests: DigestCache,
    extension_hashes: Vec<u32>,
}

impl<F: FileSystem> BuildSession<F> {
    /// Opens the graph at `dag_path` and the caches it names, which live in
    /// the same directory.
    pub fn open(dag_path: &Path, fs: F, policy: EvictionPolicy) -> Result<Self, CacheError> {
        Self::open_at(dag_path, fs, policy, unix_now_secs())
    }

    /// Like [`BuildSession::open`] with an explicit access time in seconds.
    pub fn open_at(
        dag_path: &Path,
        fs: F,
        policy: EvictionPolicy,
        now: u64,
    ) -> Result<Self, CacheError> {
        let dag = Dag::open(dag_path)?;
        let dir = dag_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let state = open_state(&dir.join(dag.state_file_name()?));
        let scans = ScanCache::open(&dir.join(dag.scan_cache_file_name()?), now);
        let digests = DigestCache::open(&dir.join(dag.digest_cache_file_name()?), now);
        let extension_hashes = dag.content_digest_extensions()?.to_vec()?;
        tracing::debug!(
            dag = %dag_path.display(),
            nodes = dag.node_count()?,
            has_state = state.is_some(),
            "opened build session"
        );
        Ok(Self {
            dag,
            dir,
            fs,
            policy,
            state,
            recorder: StateRecorder::new(),
            scans,
            digests,
            extension_hashes,
        })
    }

    /// The loaded graph.
    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// The filesystem the session reads through.
    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Compares the graph's recorded file and glob signatures with the
    /// filesystem. `Some` means the graph itself must be regenerated.
    pub fn check_signatures(&self) -> Result<Option<GraphStaleness>, CacheError> {
        Ok(check_signatures(&self.dag, &FsProbe(&self.fs))?)
    }

    fn node_guid(&self, index: u32) -> Result<Digest, CacheError> {
        let count = self.dag.node_count()?;
        if index >= count {
            return Err(CacheError::UnknownNode { index, count });
        }
        Ok(self.dag.node_guid(index)?)
    }

    /// Computes the input signature of node `index` and decides whether it
    /// must run.
    pub fn check_node(
        &self,
        index: u32,
        scanner: &dyn IncludeScanner,
    ) -> Result<NodeCheck, CacheError> {
        let guid = self.node_guid(index)?;
        let node = self.dag.node(index)?;
        let inputs = node
            .input_files()?
            .iter()
            .map(|f| f.map(|f| f.filename))
            .collect::<Result<Vec<&str>, FrozenError>>()?;
        let node_scanner = node.scanner()?.map(|s| s.to_owned()).transpose()?;
        let hasher = InputHasher::new(
            &self.fs,
            &self.digests,
            &self.scans,
            scanner,
            &self.extension_hashes,
        );
        let inputs = hasher.compute(&inputs, node_scanner.as_ref());
        let record = match &self.state {
            Some(state) => state.lookup(&guid)?,
            None => None,
        };
        let freshness = check_up_to_date(record.as_ref(), &self.fs, &inputs.signature)?;
        if let Freshness::Rebuild(reason) = &freshness {
            tracing::debug!(node = index, annotation = node.annotation()?, %reason, "out of date");
        }
        Ok(NodeCheck {
            index,
            guid,
            freshness,
            inputs,
        })
    }

    /// Checks every node in parallel and returns the ones that must run, in
    /// node order.
    pub fn out_of_date(
        &self,
        scanner: &dyn IncludeScanner,
    ) -> Result<Vec<(u32, RebuildReason)>, CacheError> {
        let count = self.dag.node_count()?;
        let checks = (0..count)
            .into_par_iter()
            .map(|i| self.check_node(i, scanner).map(|c| (i, c.freshness)))
            .collect::<Result<Vec<_>, CacheError>>()?;
        Ok(checks
            .into_iter()
            .filter_map(|(i, f)| match f {
                Freshness::UpToDate => None,
                Freshness::Rebuild(reason) => Some((i, reason)),
            })
            .collect())
    }

    /// Records that node `index` ran. Output timestamps are taken now, so
    /// call this after the node's action has finished.
    pub fn record_outcome(
        &self,
        index: u32,
        success: bool,
        inputs: &NodeInputs,
    ) -> Result<(), CacheError> {
        let guid = self.node_guid(index)?;
        let node = self.dag.node(index)?;
        let stat = |files: cairn_frozen::FrozenArray<'_, cairn_dag::FileRef<'_>>| {
            files
                .iter()
                .map(|f| f.map(|f| RecordedFile::new(f.filename, self.fs.timestamp(f.filename))))
                .collect::<Result<Vec<_>, FrozenError>>()
        };
        let built = BuiltNode {
            success,
            input_signature: inputs.signature,
            output_files: stat(node.output_files()?)?,
            aux_output_files: stat(node.aux_output_files()?)?,
            input_files: inputs.input_files.clone(),
            implicit_input_files: inputs.implicit_input_files.clone(),
        };
        tracing::debug!(node = index, success, "recorded outcome");
        self.recorder.record(guid, built);
        Ok(())
    }

    /// Writes the state, scan and digest caches under their temporary names,
    /// then renames each into place.
    pub fn finish(self) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let targets = [
            (
                self.dag.state_file_name_tmp()?,
                self.dag.state_file_name()?,
            ),
            (
                self.dag.scan_cache_file_name_tmp()?,
                self.dag.scan_cache_file_name()?,
            ),
            (
                self.dag.digest_cache_file_name_tmp()?,
                self.dag.digest_cache_file_name()?,
            ),
        ];
        let builders = [
            self.recorder.write(self.state.as_ref(), &self.dag)?,
            self.scans.write(&self.policy)?,
            self.digests.write(&self.policy),
        ];
        let mut written = Vec::with_capacity(targets.len());
        for ((tmp, dest), builder) in targets.into_iter().zip(builders) {
            written.push((builder.finish(&self.dir.join(tmp), None)?, self.dir.join(dest)));
        }
        // the old files stay mapped until here
        let Self { state, scans, .. } = self;
        drop((state, scans));
        for (file, dest) in written {
            file.publish(&dest)?;
        }
        Ok(())
    }
}

fn open_state(path: &Path) -> Option<StateFile> {
    match StateFile::open(path) {
        Ok(state) => Some(state),
        Err(FrozenError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no build state, every node is out of date");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding build state");
            None
        }
    }
}
