//! Read side of the `.dag` format.

use std::path::Path;

use cairn_common::{Digest, FileAndHash};
use cairn_frozen::{Cursor, FrozenArray, FrozenError, FrozenFormat, FrozenRecord, FrozenView, DAG_MAGIC};

use crate::error::DagError;
use crate::layout::{env, file, file_sig, glob_sig, keyword, node, pass, root, scanner};
use crate::types::{
    DagData, EnvVar, FileSignature, GenericFlags, GenericScanner, GlobSignature, Keyword,
    NodeData, NodeFlags, Pass, Scanner, ScannerKind,
};

/// The `.dag` file format.
pub struct DagFormat;

impl FrozenFormat for DagFormat {
    const NAME: &'static str = "build graph";
    const MAGIC: u32 = DAG_MAGIC;
    const HEADER_SIZE: usize = root::SIZE;
    const HAS_TRAILER: bool = true;
}

/// A mapped, validated build graph.
///
/// Accessors decode lazily from the mapping; every one of them is bounds
/// checked and may fail on a corrupt body even though the header and
/// trailer validated.
pub struct Dag {
    view: FrozenView,
}

impl Dag {
    /// Maps and validates the graph at `path`.
    pub fn open(path: &Path) -> Result<Self, DagError> {
        let view = FrozenView::load::<DagFormat>(path)?;
        Ok(Self { view })
    }

    /// Validates an in-memory graph.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DagError> {
        let view = FrozenView::from_bytes::<DagFormat>(bytes)?;
        Ok(Self { view })
    }

    /// Path the graph was loaded from (empty for in-memory graphs).
    pub fn path(&self) -> &Path {
        self.view.path()
    }

    fn root(&self) -> Cursor<'_> {
        self.view.root()
    }

    /// Header magic number.
    pub fn magic(&self) -> Result<u32, DagError> {
        Ok(self.root().u32_at(root::MAGIC)?)
    }

    /// Number of nodes.
    pub fn node_count(&self) -> Result<u32, DagError> {
        Ok(self.root().u32_at(root::NODE_COUNT)?)
    }

    /// Identity digests in node order.
    pub fn node_guids(&self) -> Result<FrozenArray<'_, Digest>, DagError> {
        Ok(self.root().array_at(root::NODE_GUIDS)?)
    }

    /// Identity digest of node `index`.
    pub fn node_guid(&self, index: u32) -> Result<Digest, DagError> {
        Ok(self.node_guids()?.get(index as usize)?)
    }

    /// All nodes in index order.
    pub fn nodes(&self) -> Result<FrozenArray<'_, DagNode<'_>>, DagError> {
        Ok(self.root().array_at(root::NODES)?)
    }

    /// Node `index`.
    pub fn node(&self, index: u32) -> Result<DagNode<'_>, DagError> {
        Ok(self.nodes()?.get(index as usize)?)
    }

    /// Finds the index of the node whose identity is `guid`.
    pub fn find_node_by_digest(&self, guid: &Digest) -> Result<Option<u32>, DagError> {
        let guids = self.node_guids()?;
        let order: FrozenArray<'_, u32> = self.root().array_at(root::GUID_ORDER)?;
        let (mut lo, mut hi) = (0, order.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let index = order.get(mid)?;
            match guids.get(index as usize)?.cmp(guid) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(index)),
            }
        }
        Ok(None)
    }

    /// Passes in index order.
    pub fn passes(&self) -> Result<FrozenArray<'_, PassRef<'_>>, DagError> {
        Ok(self.root().array_at(root::PASSES)?)
    }

    /// Files whose timestamps invalidate the graph.
    pub fn file_signatures(&self) -> Result<FrozenArray<'_, FileSignatureRef<'_>>, DagError> {
        Ok(self.root().array_at(root::FILE_SIGNATURES)?)
    }

    /// Directories whose listings invalidate the graph.
    pub fn glob_signatures(&self) -> Result<FrozenArray<'_, GlobSignatureRef<'_>>, DagError> {
        Ok(self.root().array_at(root::GLOB_SIGNATURES)?)
    }

    /// Extension hashes of inputs whose contents are digested; empty means all.
    pub fn content_digest_extensions(&self) -> Result<FrozenArray<'_, u32>, DagError> {
        Ok(self.root().array_at(root::CONTENT_DIGEST_EXTENSIONS)?)
    }

    /// Name of the built-node state file.
    pub fn state_file_name(&self) -> Result<&str, DagError> {
        Ok(self.root().str_at(root::STATE_FILE_NAME)?)
    }

    /// Temporary name of the built-node state file.
    pub fn state_file_name_tmp(&self) -> Result<&str, DagError> {
        Ok(self.root().str_at(root::STATE_FILE_NAME_TMP)?)
    }

    /// Name of the include-scan cache.
    pub fn scan_cache_file_name(&self) -> Result<&str, DagError> {
        Ok(self.root().str_at(root::SCAN_CACHE_FILE_NAME)?)
    }

    /// Temporary name of the include-scan cache.
    pub fn scan_cache_file_name_tmp(&self) -> Result<&str, DagError> {
        Ok(self.root().str_at(root::SCAN_CACHE_FILE_NAME_TMP)?)
    }

    /// Name of the content-digest cache.
    pub fn digest_cache_file_name(&self) -> Result<&str, DagError> {
        Ok(self.root().str_at(root::DIGEST_CACHE_FILE_NAME)?)
    }

    /// Temporary name of the content-digest cache.
    pub fn digest_cache_file_name_tmp(&self) -> Result<&str, DagError> {
        Ok(self.root().str_at(root::DIGEST_CACHE_FILE_NAME_TMP)?)
    }

    /// Title shown by the build front end.
    pub fn build_title(&self) -> Result<Option<&str>, DagError> {
        Ok(self.root().opt_str_at(root::BUILD_TITLE)?)
    }

    /// Trailing magic number.
    pub fn magic_end(&self) -> Result<u32, DagError> {
        let bytes = self.view.bytes();
        let at = bytes.len().saturating_sub(4);
        Ok(Cursor::new(bytes, at).u32_at(0)?)
    }

    /// Decodes the whole graph into its owned model.
    pub fn to_data(&self) -> Result<DagData, DagError> {
        let guids = self.node_guids()?;
        let mut nodes = Vec::new();
        for (i, n) in self.nodes()?.iter().enumerate() {
            nodes.push(n?.to_data(guids.get(i)?)?);
        }
        let passes = self
            .passes()?
            .iter()
            .map(|p| p.map(|p| Pass {
                name: p.name.to_string(),
                build_order: p.build_order,
            }))
            .collect::<Result<_, _>>()?;
        let file_signatures = self
            .file_signatures()?
            .iter()
            .map(|s| s.map(|s| FileSignature {
                path: s.path.to_string(),
                timestamp: s.timestamp,
            }))
            .collect::<Result<_, _>>()?;
        let glob_signatures = self
            .glob_signatures()?
            .iter()
            .map(|s| s.map(|s| GlobSignature {
                path: s.path.to_string(),
                digest: s.digest,
            }))
            .collect::<Result<_, _>>()?;
        Ok(DagData {
            nodes,
            passes,
            file_signatures,
            glob_signatures,
            content_digest_extensions: self.content_digest_extensions()?.to_vec()?,
            state_file_name: self.state_file_name()?.to_string(),
            state_file_name_tmp: self.state_file_name_tmp()?.to_string(),
            scan_cache_file_name: self.scan_cache_file_name()?.to_string(),
            scan_cache_file_name_tmp: self.scan_cache_file_name_tmp()?.to_string(),
            digest_cache_file_name: self.digest_cache_file_name()?.to_string(),
            digest_cache_file_name_tmp: self.digest_cache_file_name_tmp()?.to_string(),
            build_title: self.build_title()?.map(str::to_string),
        })
    }
}

/// A node record inside a mapped graph.
#[derive(Clone, Copy)]
pub struct DagNode<'a> {
    at: Cursor<'a>,
}

impl<'a> FrozenRecord<'a> for DagNode<'a> {
    const SIZE: usize = node::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self { at })
    }
}

impl<'a> DagNode<'a> {
    /// Node flags.
    pub fn flags(&self) -> Result<NodeFlags, FrozenError> {
        self.at.u32_at(node::FLAGS).map(NodeFlags::from_bits)
    }

    /// Action text.
    pub fn action(&self) -> Result<&'a str, FrozenError> {
        self.at.str_at(node::ACTION)
    }

    /// Annotation text.
    pub fn annotation(&self) -> Result<&'a str, FrozenError> {
        self.at.str_at(node::ANNOTATION)
    }

    /// Index of the node's pass.
    pub fn pass_index(&self) -> Result<u32, FrozenError> {
        self.at.u32_at(node::PASS_INDEX)
    }

    /// Indices of nodes this one depends on, as stored.
    pub fn dependencies(&self) -> Result<FrozenArray<'a, u32>, FrozenError> {
        self.at.array_at(node::DEPENDENCIES)
    }

    /// Indices of nodes depending on this one, as stored.
    pub fn back_links(&self) -> Result<FrozenArray<'a, u32>, FrozenError> {
        self.at.array_at(node::BACK_LINKS)
    }

    /// Declared input files.
    pub fn input_files(&self) -> Result<FrozenArray<'a, FileRef<'a>>, FrozenError> {
        self.at.array_at(node::INPUTS)
    }

    /// Output files.
    pub fn output_files(&self) -> Result<FrozenArray<'a, FileRef<'a>>, FrozenError> {
        self.at.array_at(node::OUTPUTS)
    }

    /// Output directories.
    pub fn output_dirs(&self) -> Result<FrozenArray<'a, FileRef<'a>>, FrozenError> {
        self.at.array_at(node::OUTPUT_DIRS)
    }

    /// Auxiliary output files.
    pub fn aux_output_files(&self) -> Result<FrozenArray<'a, FileRef<'a>>, FrozenError> {
        self.at.array_at(node::AUX_OUTPUTS)
    }

    /// Environment overrides.
    pub fn env_vars(&self) -> Result<FrozenArray<'a, EnvVarRef<'a>>, FrozenError> {
        self.at.array_at(node::ENV_VARS)
    }

    /// The node's include scanner, if any.
    pub fn scanner(&self) -> Result<Option<ScannerView<'a>>, FrozenError> {
        Ok(self.at.ptr_at(node::SCANNER)?.map(|at| ScannerView { at }))
    }

    fn to_data(&self, guid: Digest) -> Result<NodeData, FrozenError> {
        Ok(NodeData {
            guid,
            flags: self.flags()?,
            action: self.action()?.to_string(),
            annotation: self.annotation()?.to_string(),
            pass_index: self.pass_index()?,
            dependencies: self.dependencies()?.to_vec()?,
            back_links: self.back_links()?.to_vec()?,
            inputs: owned_files(self.input_files()?)?,
            outputs: owned_files(self.output_files()?)?,
            output_dirs: owned_files(self.output_dirs()?)?,
            aux_outputs: owned_files(self.aux_output_files()?)?,
            env_vars: self
                .env_vars()?
                .iter()
                .map(|e| e.map(|e| EnvVar {
                    name: e.name.to_string(),
                    value: e.value.to_string(),
                }))
                .collect::<Result<_, _>>()?,
            scanner: self.scanner()?.map(|s| s.to_owned()).transpose()?,
        })
    }
}

fn owned_files(files: FrozenArray<'_, FileRef<'_>>) -> Result<Vec<FileAndHash>, FrozenError> {
    files
        .iter()
        .map(|f| {
            f.map(|f| FileAndHash {
                filename: f.filename.to_string(),
                filename_hash: f.filename_hash,
            })
        })
        .collect()
}

/// A scanner record shared by one or more nodes.
#[derive(Clone, Copy)]
pub struct ScannerView<'a> {
    at: Cursor<'a>,
}

impl<'a> ScannerView<'a> {
    /// Stored discriminant: `0` for cpp, `1` for generic.
    pub fn kind(&self) -> Result<u32, FrozenError> {
        self.at.u32_at(scanner::KIND)
    }

    /// Directories searched for included files.
    pub fn include_paths(&self) -> Result<FrozenArray<'a, &'a str>, FrozenError> {
        self.at.array_at(scanner::INCLUDE_PATHS)
    }

    /// Identity digest of the scanner configuration.
    pub fn guid(&self) -> Result<Digest, FrozenError> {
        self.at.digest_at(scanner::GUID)
    }

    /// Generic scanner flags (zero for cpp scanners).
    pub fn generic_flags(&self) -> Result<GenericFlags, FrozenError> {
        self.at.u32_at(scanner::GENERIC_FLAGS).map(GenericFlags::from_bits)
    }

    /// Generic scanner keywords (empty for cpp scanners).
    pub fn keywords(&self) -> Result<FrozenArray<'a, KeywordRef<'a>>, FrozenError> {
        self.at.array_at(scanner::KEYWORDS)
    }

    /// Decodes the owned scanner description.
    ///
    /// An unknown discriminant is reported as out of bounds at the kind field.
    pub fn to_owned(&self) -> Result<Scanner, FrozenError> {
        let kind = match self.kind()? {
            scanner::KIND_CPP => ScannerKind::Cpp,
            scanner::KIND_GENERIC => ScannerKind::Generic(GenericScanner {
                flags: self.generic_flags()?,
                keywords: self
                    .keywords()?
                    .iter()
                    .map(|k| k.map(|k| Keyword {
                        text: k.text.to_string(),
                        follow: k.follow,
                    }))
                    .collect::<Result<_, _>>()?,
            }),
            _ => {
                return Err(FrozenError::OutOfBounds {
                    offset: self.at.position() + scanner::KIND,
                    len: 0,
                })
            }
        };
        Ok(Scanner {
            kind,
            include_paths: self
                .include_paths()?
                .iter()
                .map(|p| p.map(str::to_string))
                .collect::<Result<_, _>>()?,
            guid: self.guid()?,
        })
    }
}

/// A `(filename, filename hash)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef<'a> {
    /// The path.
    pub filename: &'a str,
    /// Its path hash.
    pub filename_hash: u32,
}

impl<'a> FrozenRecord<'a> for FileRef<'a> {
    const SIZE: usize = file::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            filename: at.str_at(file::NAME)?,
            filename_hash: at.u32_at(file::HASH)?,
        })
    }
}

/// An environment override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvVarRef<'a> {
    /// Variable name.
    pub name: &'a str,
    /// Value.
    pub value: &'a str,
}

impl<'a> FrozenRecord<'a> for EnvVarRef<'a> {
    const SIZE: usize = env::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            name: at.str_at(env::NAME)?,
            value: at.str_at(env::VALUE)?,
        })
    }
}

/// A generic scanner keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordRef<'a> {
    /// Keyword text.
    pub text: &'a str,
    /// Stored byte length of `text`.
    pub len: u16,
    /// Whether matches are scanned recursively.
    pub follow: bool,
}

impl<'a> FrozenRecord<'a> for KeywordRef<'a> {
    const SIZE: usize = keyword::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            text: at.str_at(keyword::TEXT)?,
            len: at.u16_at(keyword::LEN)?,
            follow: at.u8_at(keyword::FOLLOW)? != 0,
        })
    }
}

/// A pass entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRef<'a> {
    /// Pass name.
    pub name: &'a str,
    /// Ordering key.
    pub build_order: i32,
}

impl<'a> FrozenRecord<'a> for PassRef<'a> {
    const SIZE: usize = pass::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            name: at.str_at(pass::NAME)?,
            build_order: at.i32_at(pass::BUILD_ORDER)?,
        })
    }
}

/// A file signature entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignatureRef<'a> {
    /// Path of the file.
    pub path: &'a str,
    /// Timestamp recorded at generation.
    pub timestamp: u64,
}

impl<'a> FrozenRecord<'a> for FileSignatureRef<'a> {
    const SIZE: usize = file_sig::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            path: at.str_at(file_sig::PATH)?,
            timestamp: at.u64_at(file_sig::TIMESTAMP)?,
        })
    }
}

/// A glob signature entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobSignatureRef<'a> {
    /// Path of the directory.
    pub path: &'a str,
    /// Listing digest recorded at generation.
    pub digest: Digest,
}

impl<'a> FrozenRecord<'a> for GlobSignatureRef<'a> {
    const SIZE: usize = glob_sig::SIZE;

    fn read(at: Cursor<'a>) -> Result<Self, FrozenError> {
        Ok(Self {
            path: at.str_at(glob_sig::PATH)?,
            digest: at.digest_at(glob_sig::DIGEST)?,
        })
    }
}
