//! Built-node state: what each node looked like the last time it was built.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cairn_common::{path_hash, Digest};
use cairn_dag::Dag;
use cairn_frozen::{
    Cursor, FrozenArray, FrozenBuilder, FrozenError, FrozenFormat, FrozenRecord, FrozenView,
    STATE_MAGIC,
};

use crate::error::CacheError;

mod layout {
    pub const MAGIC: usize = 0;
    pub const NODE_COUNT: usize = 4;
    pub const GUIDS: usize = 8;
    pub const BUILT_NODES: usize = 16;
    pub const ROOT_SIZE: usize = 24;

    pub const SUCCESS: usize = 0;
    pub const INPUT_SIGNATURE: usize = 8;
    pub const OUTPUT_FILES: usize = 40;
    pub const AUX_OUTPUT_FILES: usize = 48;
    pub const INPUT_FILES: usize = 56;
    pub const IMPLICIT_INPUT_FILES: usize = 64;
    pub const NODE_SIZE: usize = 72;

    pub const FILENAME: usize = 0;
    pub const FILENAME_HASH: usize = 8;
    pub const TIMESTAMP: usize = 16;
    pub const FILE_SIZE: usize = 24;
}

/// The `.state` file format.
pub struct StateFormat;

impl FrozenFormat for StateFormat {
    const NAME: &'static str = "build state";
    const MAGIC: u32 = STATE_MAGIC;
    const HEADER_SIZE: usize = layout::ROOT_SIZE;
    const HAS_TRAILER: bool = false;
}

/// A file together with its timestamp when a node finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFile {
    /// The path.
    pub filename: String,
    /// `path_hash(filename)`.
    pub filename_hash: u32,
    /// Timestamp in nanoseconds; 0 if the file was missing.
    pub timestamp: u64,
}

impl RecordedFile {
    /// Creates an entry, computing the path hash.
    pub fn new(filename: impl Into<String>, timestamp: u64) -> Self {
        let filename = filename.into();
        Self {
            filename_hash: path_hash(&filename),
            filename,
            timestamp,
        }
    }
}

/// A recorded file inside a mapped state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedFileRef<'a> {
    /// The path.
    pub filename: &'a str,
    /// Its path hash.
    pub filename_hash: u32,
    /// Timestamp in nanoseconds.
    pub timestamp: u64,
}

impl<'a> FrozenRecord<'a> for RecordedFileRef<'a> {
    const SIZE: usize = layout::FILE_SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            filename: at.str_at(layout::FILENAME)?,
            filename_hash: at.u32_at(layout::FILENAME_HASH)?,
            timestamp: at.u64_at(layout::TIMESTAMP)?,
        })
    }
}

impl RecordedFileRef<'_> {
    fn to_owned_file(self) -> RecordedFile {
        RecordedFile {
            filename: self.filename.to_string(),
            filename_hash: self.filename_hash,
            timestamp: self.timestamp,
        }
    }
}

/// The outcome of building one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltNode {
    /// Whether the action succeeded.
    pub success: bool,
    /// Input signature the node was built with.
    pub input_signature: Digest,
    /// Outputs after the build.
    pub output_files: Vec<RecordedFile>,
    /// Auxiliary outputs after the build.
    pub aux_output_files: Vec<RecordedFile>,
    /// Declared inputs at build time.
    pub input_files: Vec<RecordedFile>,
    /// Inputs discovered by scanning.
    pub implicit_input_files: Vec<RecordedFile>,
}

/// A built-node record inside a mapped state file.
#[derive(Clone, Copy)]
pub struct BuiltNodeView<'a> {
    at: Cursor<'a>,
}

impl<'a> FrozenRecord<'a> for BuiltNodeView<'a> {
    const SIZE: usize = layout::NODE_SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self { at })
    }
}

impl<'a> BuiltNodeView<'a> {
    /// Whether the action succeeded.
    pub fn success(&self) -> Result<bool, FrozenError> {
        Ok(self.at.u32_at(layout::SUCCESS)? != 0)
    }

    /// Input signature the node was built with.
    pub fn input_signature(&self) -> Result<Digest, FrozenError> {
        self.at.digest_at(layout::INPUT_SIGNATURE)
    }

    /// Outputs after the build.
    pub fn output_files(&self) -> Result<FrozenArray<'a, RecordedFileRef<'a>>, FrozenError> {
        self.at.array_at(layout::OUTPUT_FILES)
    }

    /// Auxiliary outputs after the build.
    pub fn aux_output_files(&self) -> Result<FrozenArray<'a, RecordedFileRef<'a>>, FrozenError> {
        self.at.array_at(layout::AUX_OUTPUT_FILES)
    }

    /// Declared inputs at build time.
    pub fn input_files(&self) -> Result<FrozenArray<'a, RecordedFileRef<'a>>, FrozenError> {
        self.at.array_at(layout::INPUT_FILES)
    }

    /// Inputs discovered by scanning.
    pub fn implicit_input_files(
        &self,
    ) -> Result<FrozenArray<'a, RecordedFileRef<'a>>, FrozenError> {
        self.at.array_at(layout::IMPLICIT_INPUT_FILES)
    }

    /// Decodes the owned record.
    pub fn to_owned(&self) -> Result<BuiltNode, FrozenError> {
        let files = |a: FrozenArray<'a, RecordedFileRef<'a>>| -> Result<Vec<RecordedFile>, FrozenError> {
            a.iter().map(|f| f.map(RecordedFileRef::to_owned_file)).collect()
        };
        Ok(BuiltNode {
            success: self.success()?,
            input_signature: self.input_signature()?,
            output_files: files(self.output_files()?)?,
            aux_output_files: files(self.aux_output_files()?)?,
            input_files: files(self.input_files()?)?,
            implicit_input_files: files(self.implicit_input_files()?)?,
        })
    }
}

/// A mapped `.state` file.
pub struct StateFile {
    view: FrozenView,
}

impl StateFile {
    /// Maps and validates the state file at `path`.
    ///
    /// Every record is decoded once here, so a file that opens can be
    /// looked up and carried forward without further format errors.
    pub fn open(path: &Path) -> Result<Self, FrozenError> {
        Self::validate(FrozenView::load::<StateFormat>(path)?)
    }

    /// Validates an in-memory state file.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FrozenError> {
        Self::validate(FrozenView::from_bytes::<StateFormat>(bytes)?)
    }

    fn validate(view: FrozenView) -> Result<Self, FrozenError> {
        let file = Self { view };
        let guids = file.guids()?;
        let nodes = file.built_nodes()?;
        for i in 0..guids.len() {
            guids.get(i)?;
            nodes.get(i)?.to_owned()?;
        }
        Ok(file)
    }

    /// Header magic number.
    pub fn magic(&self) -> Result<u32, FrozenError> {
        self.view.root().u32_at(layout::MAGIC)
    }

    /// Number of records.
    pub fn node_count(&self) -> Result<u32, FrozenError> {
        self.view.root().u32_at(layout::NODE_COUNT)
    }

    /// Node identity digests, sorted.
    pub fn guids(&self) -> Result<FrozenArray<'_, Digest>, FrozenError> {
        self.view.root().array_at(layout::GUIDS)
    }

    /// Records parallel to [`StateFile::guids`].
    pub fn built_nodes(&self) -> Result<FrozenArray<'_, BuiltNodeView<'_>>, FrozenError> {
        self.view.root().array_at(layout::BUILT_NODES)
    }

    /// Returns the record of the node whose identity is `guid`.
    pub fn lookup(&self, guid: &Digest) -> Result<Option<BuiltNodeView<'_>>, FrozenError> {
        match self.guids()?.binary_search_by(|g| g.cmp(guid))? {
            Ok(index) => Ok(Some(self.built_nodes()?.get(index)?)),
            Err(_) => Ok(None),
        }
    }
}

/// Collects node outcomes from concurrent workers.
#[derive(Debug, Default)]
pub struct StateRecorder {
    records: Mutex<HashMap<Digest, BuiltNode>>,
}

impl StateRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Digest, BuiltNode>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records the outcome of the node whose identity is `guid`, replacing
    /// any earlier outcome recorded this build.
    pub fn record(&self, guid: Digest, node: BuiltNode) {
        self.lock().insert(guid, node);
    }

    /// Number of outcomes recorded this build.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lays out the next state file: one record per node of `dag`, taken from
    /// this build when the node was built and from `previous` otherwise.
    /// Records of nodes that are no longer in the graph are dropped.
    pub fn write(
        &self,
        previous: Option<&StateFile>,
        dag: &Dag,
    ) -> Result<FrozenBuilder, CacheError> {
        let recorded = self.lock();
        let mut rows: Vec<(Digest, BuiltNode)> = Vec::new();
        let (mut fresh, mut carried) = (0usize, 0usize);
        for guid in dag.node_guids()?.iter() {
            let guid = guid?;
            if let Some(node) = recorded.get(&guid) {
                rows.push((guid, node.clone()));
                fresh += 1;
            } else if let Some(old) = previous.map(|p| p.lookup(&guid)).transpose()?.flatten() {
                rows.push((guid, old.to_owned()?));
                carried += 1;
            }
        }
        drop(recorded);
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.dedup_by(|a, b| a.0 == b.0);
        tracing::debug!(fresh, carried, "writing build state");
        Ok(lay_out(&rows))
    }
}

/// Lays out a state file holding `rows`, which must be sorted by digest.
pub(crate) fn lay_out(rows: &[(Digest, BuiltNode)]) -> FrozenBuilder {
    let mut b = FrozenBuilder::new();
    let root = b.alloc(layout::ROOT_SIZE);
    b.put_u32(root + layout::MAGIC, STATE_MAGIC);
    b.put_u32(root + layout::NODE_COUNT, rows.len() as u32);
    let guids: Vec<Digest> = rows.iter().map(|(g, _)| *g).collect();
    b.put_digest_slice(root + layout::GUIDS, &guids);
    b.put_records(root + layout::BUILT_NODES, layout::NODE_SIZE, rows, |b, at, (_, n)| {
        b.put_u32(at + layout::SUCCESS, u32::from(n.success));
        b.put_digest(at + layout::INPUT_SIGNATURE, &n.input_signature);
        put_files(b, at + layout::OUTPUT_FILES, &n.output_files);
        put_files(b, at + layout::AUX_OUTPUT_FILES, &n.aux_output_files);
        put_files(b, at + layout::INPUT_FILES, &n.input_files);
        put_files(b, at + layout::IMPLICIT_INPUT_FILES, &n.implicit_input_files);
    });
    b
}

fn put_files(b: &mut FrozenBuilder, at: usize, files: &[RecordedFile]) {
    b.put_records(at, layout::FILE_SIZE, files, |b, at, f| {
        b.put_str(at + layout::FILENAME, &f.filename);
        b.put_u32(at + layout::FILENAME_HASH, f.filename_hash);
        b.put_u64(at + layout::TIMESTAMP, f.timestamp);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_common::FileAndHash;
    use cairn_dag::{write_dag, DagData, NodeData, NodeFlags, Pass};
    use cairn_frozen::DAG_MAGIC;

    fn dag_of(guids: &[Digest]) -> Dag {
        let nodes = guids
            .iter()
            .enumerate()
            .map(|(i, g)| NodeData {
                guid: *g,
                flags: NodeFlags::empty(),
                action: format!("step {i}"),
                annotation: String::new(),
                pass_index: 0,
                dependencies: vec![],
                back_links: vec![],
                inputs: vec![],
                outputs: vec![FileAndHash::new(format!("out{i}"))],
                output_dirs: vec![],
                aux_outputs: vec![],
                env_vars: vec![],
                scanner: None,
            })
            .collect();
        let data = DagData {
            nodes,
            passes: vec![Pass {
                name: "default".into(),
                build_order: 0,
            }],
            file_signatures: vec![],
            glob_signatures: vec![],
            content_digest_extensions: vec![],
            state_file_name: "build.state".into(),
            state_file_name_tmp: "build.state.tmp".into(),
            scan_cache_file_name: "build.scancache".into(),
            scan_cache_file_name_tmp: "build.scancache.tmp".into(),
            digest_cache_file_name: "build.digestcache".into(),
            digest_cache_file_name_tmp: "build.digestcache.tmp".into(),
            build_title: None,
        };
        Dag::from_bytes(write_dag(&data).into_bytes(Some(DAG_MAGIC))).unwrap()
    }

    fn built(signature: &[u8], success: bool) -> BuiltNode {
        BuiltNode {
            success,
            input_signature: Digest::from_bytes(signature),
            output_files: vec![RecordedFile::new("out.bin", 42)],
            aux_output_files: vec![],
            input_files: vec![RecordedFile::new("in.c", 7)],
            implicit_input_files: vec![RecordedFile::new("in.h", 8)],
        }
    }

    fn freeze(recorder: &StateRecorder, previous: Option<&StateFile>, dag: &Dag) -> StateFile {
        let bytes = recorder.write(previous, dag).unwrap().into_bytes(None);
        StateFile::from_bytes(bytes).unwrap()
    }

    #[test]
    fn record_and_lookup() {
        let a = Digest::from_bytes(b"a");
        let dag = dag_of(&[a]);
        let rec = StateRecorder::new();
        rec.record(a, built(b"sig", true));
        let state = freeze(&rec, None, &dag);
        assert_eq!(state.magic().unwrap(), STATE_MAGIC);
        let view = state.lookup(&a).unwrap().unwrap();
        assert_eq!(view.to_owned().unwrap(), built(b"sig", true));
        assert!(state.lookup(&Digest::from_bytes(b"b")).unwrap().is_none());
    }

    #[test]
    fn unbuilt_nodes_carry_forward_and_orphans_drop() {
        let (a, b, gone) = (
            Digest::from_bytes(b"a"),
            Digest::from_bytes(b"b"),
            Digest::from_bytes(b"gone"),
        );
        let first = StateRecorder::new();
        first.record(a, built(b"a1", true));
        first.record(b, built(b"b1", true));
        first.record(gone, built(b"g1", true));
        let previous = freeze(&first, None, &dag_of(&[a, b, gone]));
        assert_eq!(previous.node_count().unwrap(), 3);

        // `gone` was removed from the graph and only `a` was rebuilt
        let second = StateRecorder::new();
        second.record(a, built(b"a2", false));
        let next = freeze(&second, Some(&previous), &dag_of(&[a, b]));
        assert_eq!(next.node_count().unwrap(), 2);
        let a_rec = next.lookup(&a).unwrap().unwrap();
        assert!(!a_rec.success().unwrap());
        assert_eq!(a_rec.input_signature().unwrap(), Digest::from_bytes(b"a2"));
        let b_rec = next.lookup(&b).unwrap().unwrap();
        assert_eq!(b_rec.input_signature().unwrap(), Digest::from_bytes(b"b1"));
        assert!(next.lookup(&gone).unwrap().is_none());
    }

    #[test]
    fn outcomes_from_many_threads() {
        let guids: Vec<Digest> = (0..64u32).map(|i| Digest::from_bytes(&i.to_le_bytes())).collect();
        let dag = dag_of(&guids);
        let rec = StateRecorder::new();
        std::thread::scope(|s| {
            for chunk in guids.chunks(8) {
                let rec = &rec;
                s.spawn(move || {
                    for g in chunk {
                        rec.record(*g, built(g.as_bytes(), true));
                    }
                });
            }
        });
        assert_eq!(rec.len(), 64);
        let state = freeze(&rec, None, &dag);
        for g in &guids {
            let n = state.lookup(g).unwrap().unwrap();
            assert_eq!(n.input_signature().unwrap(), Digest::from_bytes(g.as_bytes()));
        }
    }

    #[test]
    fn recorded_file_timestamps_roundtrip() {
        let a = Digest::from_bytes(b"a");
        let rec = StateRecorder::new();
        rec.record(a, built(b"s", true));
        let state = freeze(&rec, None, &dag_of(&[a]));
        let view = state.lookup(&a).unwrap().unwrap();
        let out = view.output_files().unwrap().get(0).unwrap();
        assert_eq!(out.filename, "out.bin");
        assert_eq!(out.timestamp, 42);
        assert_eq!(out.filename_hash, path_hash("out.bin"));
        let implicit = view.implicit_input_files().unwrap().to_vec().unwrap();
        assert_eq!(implicit[0].filename, "in.h");
    }

    #[test]
    fn records_past_end_rejected_at_open() {
        let mut bytes = vec![0u8; layout::ROOT_SIZE];
        bytes[..4].copy_from_slice(&STATE_MAGIC.to_le_bytes());
        bytes[layout::GUIDS..layout::GUIDS + 4].copy_from_slice(&1000u32.to_le_bytes());
        bytes[layout::GUIDS + 4..layout::GUIDS + 8].copy_from_slice(&4i32.to_le_bytes());
        assert!(matches!(
            StateFile::from_bytes(bytes),
            Err(FrozenError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn wrong_magic_rejected() {
        let bytes = vec![0u8; layout::ROOT_SIZE];
        assert!(matches!(
            StateFile::from_bytes(bytes),
            Err(FrozenError::BadMagic { .. })
        ));
    }
}
