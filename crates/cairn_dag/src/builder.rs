//! Turns node descriptors into a [`DagData`].

use std::collections::HashMap;

use cairn_common::{extension_hash, path_hash, Digest, FileAndHash};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::descriptor::{GraphDescriptor, NodeDescriptor, ScannerDescriptor};
use crate::error::DagError;
use crate::signatures::{glob_digest, SignatureProbe};
use crate::types::{
    node_identity, DagData, EnvVar, FileSignature, GenericFlags, GenericScanner, GlobSignature,
    Keyword, NodeData, NodeFlags, Pass, Scanner, ScannerKind,
};

/// Assigns pass indices in first-seen order.
#[derive(Debug, Default)]
pub struct PassRegistry {
    passes: Vec<Pass>,
    by_name: HashMap<String, u32>,
}

impl PassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of pass `name`, registering it on first use.
    ///
    /// Asking for a known name with a different build order is an error.
    pub fn resolve(&mut self, name: &str, build_order: i32) -> Result<u32, DagError> {
        if let Some(&index) = self.by_name.get(name) {
            let existing = self.passes[index as usize].build_order;
            if existing != build_order {
                return Err(DagError::InconsistentPassOrder {
                    name: name.to_string(),
                    existing,
                    requested: build_order,
                });
            }
            return Ok(index);
        }
        let index = self.passes.len() as u32;
        self.passes.push(Pass {
            name: name.to_string(),
            build_order,
        });
        self.by_name.insert(name.to_string(), index);
        Ok(index)
    }

    /// Registered passes in index order.
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// Consumes the registry.
    pub fn into_passes(self) -> Vec<Pass> {
        self.passes
    }
}

/// Graph-wide values that come from project configuration rather than from
/// the descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSettings {
    /// Title used when the descriptor has none.
    pub build_title: Option<String>,
    /// Name of the built-node state file.
    pub state_file_name: String,
    /// Name of the include-scan cache.
    pub scan_cache_file_name: String,
    /// Name of the content-digest cache.
    pub digest_cache_file_name: String,
    /// Extensions (with leading dot) of inputs whose contents are digested.
    pub content_digest_extensions: Vec<String>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            build_title: None,
            state_file_name: "build.state".to_string(),
            scan_cache_file_name: "build.scancache".to_string(),
            digest_cache_file_name: "build.digestcache".to_string(),
            content_digest_extensions: Vec::new(),
        }
    }
}

/// Temporary name a file is written under before it is published.
pub fn tmp_name(name: &str) -> String {
    format!("{name}.tmp")
}

/// Builds a [`DagData`] from a [`GraphDescriptor`].
pub struct DagBuilder<'p, P> {
    settings: GraphSettings,
    probe: &'p P,
}

impl<'p, P: SignatureProbe> DagBuilder<'p, P> {
    /// Creates a builder. `probe` supplies signature values the descriptor
    /// leaves out.
    pub fn new(settings: GraphSettings, probe: &'p P) -> Self {
        Self { settings, probe }
    }

    /// Resolves passes, dependencies and identities and checks the graph is
    /// acyclic and free of duplicates.
    pub fn build(&self, desc: &GraphDescriptor) -> Result<DagData, DagError> {
        let mut labels: HashMap<&str, u32> = HashMap::new();
        for (i, n) in desc.nodes.iter().enumerate() {
            if labels.insert(n.label.as_str(), i as u32).is_some() {
                return Err(DagError::DuplicateLabel {
                    label: n.label.clone(),
                });
            }
        }

        let mut passes = PassRegistry::new();
        let mut scanners: HashMap<Digest, Scanner> = HashMap::new();
        let mut identities: HashMap<Digest, &str> = HashMap::new();
        let mut nodes = Vec::with_capacity(desc.nodes.len());

        for n in &desc.nodes {
            let pass_index = passes.resolve(&n.pass.name, n.pass.build_order)?;
            let dependencies = resolve_deps(n, &labels)?;
            let scanner = match &n.scanner {
                Some(s) => {
                    let scanner = scanner_from(s)?;
                    // nodes sharing a configuration share one scanner record
                    Some(scanners.entry(scanner.guid).or_insert(scanner).clone())
                }
                None => None,
            };
            let node = node_from(n, pass_index, dependencies, scanner)?;
            if let Some(first) = identities.insert(node.guid, n.label.as_str()) {
                return Err(DagError::DuplicateNode {
                    first: first.to_string(),
                    second: n.label.clone(),
                    digest: node.guid,
                });
            }
            nodes.push(node);
        }

        check_acyclic(desc, &nodes)?;
        for i in 0..nodes.len() {
            for dep in nodes[i].dependencies.clone() {
                nodes[dep as usize].back_links.push(i as u32);
            }
        }

        let s = &self.settings;
        let dag = DagData {
            nodes,
            passes: passes.into_passes(),
            file_signatures: desc
                .file_signatures
                .iter()
                .map(|f| FileSignature {
                    path: f.path.clone(),
                    timestamp: f.timestamp.unwrap_or_else(|| self.probe.timestamp(&f.path)),
                })
                .collect(),
            glob_signatures: desc
                .glob_signatures
                .iter()
                .map(|g| GlobSignature {
                    path: g.path.clone(),
                    digest: match &g.files {
                        Some(files) => glob_digest(files),
                        None => self.probe.listing_digest(&g.path),
                    },
                })
                .collect(),
            content_digest_extensions: s
                .content_digest_extensions
                .iter()
                .map(|ext| path_hash(ext))
                .collect(),
            state_file_name: s.state_file_name.clone(),
            state_file_name_tmp: tmp_name(&s.state_file_name),
            scan_cache_file_name: s.scan_cache_file_name.clone(),
            scan_cache_file_name_tmp: tmp_name(&s.scan_cache_file_name),
            digest_cache_file_name: s.digest_cache_file_name.clone(),
            digest_cache_file_name_tmp: tmp_name(&s.digest_cache_file_name),
            build_title: desc.title.clone().or_else(|| s.build_title.clone()),
        };
        tracing::debug!(
            nodes = dag.nodes.len(),
            passes = dag.passes.len(),
            scanners = scanners.len(),
            "built graph from descriptors"
        );
        Ok(dag)
    }
}

/// Returns `true` when the contents of `path` feed the input signature,
/// given the graph's extension hashes.
pub fn wants_content_digest(extension_hashes: &[u32], path: &str) -> bool {
    extension_hashes.is_empty()
        || extension_hash(path).is_some_and(|h| extension_hashes.contains(&h))
}

fn resolve_deps(n: &NodeDescriptor, labels: &HashMap<&str, u32>) -> Result<Vec<u32>, DagError> {
    let mut deps = Vec::with_capacity(n.deps.len());
    for label in &n.deps {
        let index = labels
            .get(label.as_str())
            .copied()
            .ok_or_else(|| DagError::UnknownDependency {
                node: n.label.clone(),
                dependency: label.clone(),
            })?;
        if !deps.contains(&index) {
            deps.push(index);
        }
    }
    Ok(deps)
}

fn files(paths: &[String]) -> Vec<FileAndHash> {
    paths.iter().map(|p| FileAndHash::new(p.as_str())).collect()
}

fn node_from(
    n: &NodeDescriptor,
    pass_index: u32,
    dependencies: Vec<u32>,
    scanner: Option<Scanner>,
) -> Result<NodeData, DagError> {
    let inputs = files(&n.inputs);
    let outputs = files(&n.outputs);
    let output_dirs = files(&n.output_dirs);
    let aux_outputs = files(&n.aux_outputs);
    // BTreeMap iteration keeps env sorted by name
    let env_vars: Vec<EnvVar> = n
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    let guid = node_identity(
        &n.label,
        &n.action,
        &n.pass.name,
        &inputs,
        &outputs,
        &output_dirs,
        &aux_outputs,
        &env_vars,
        scanner.as_ref(),
    )?;
    let mut flags = NodeFlags::empty();
    if n.precious {
        flags.insert(NodeFlags::PRECIOUS_OUTPUTS);
    }
    if n.overwrite_outputs {
        flags.insert(NodeFlags::OVERWRITE_OUTPUTS);
    }
    Ok(NodeData {
        guid,
        flags,
        action: n.action.clone(),
        annotation: n.annotation.clone(),
        pass_index,
        dependencies,
        back_links: Vec::new(),
        inputs,
        outputs,
        output_dirs,
        aux_outputs,
        env_vars,
        scanner,
    })
}

fn scanner_from(s: &ScannerDescriptor) -> Result<Scanner, DagError> {
    match s {
        ScannerDescriptor::Cpp { include_paths } => {
            Scanner::new(ScannerKind::Cpp, include_paths.clone())
        }
        ScannerDescriptor::Generic {
            include_paths,
            require_whitespace,
            use_separators,
            bare_means_system,
            keywords,
        } => {
            let mut flags = GenericFlags::empty();
            for (set, flag) in [
                (*require_whitespace, GenericFlags::REQUIRE_WHITESPACE),
                (*use_separators, GenericFlags::USE_SEPARATORS),
                (*bare_means_system, GenericFlags::BARE_MEANS_SYSTEM),
            ] {
                if set {
                    flags.insert(flag);
                }
            }
            let keywords = keywords
                .iter()
                .map(|k| Keyword {
                    text: k.text.clone(),
                    follow: k.follow,
                })
                .collect();
            Scanner::new(
                ScannerKind::Generic(GenericScanner { flags, keywords }),
                include_paths.clone(),
            )
        }
    }
}

fn check_acyclic(desc: &GraphDescriptor, nodes: &[NodeData]) -> Result<(), DagError> {
    let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(nodes.len(), 0);
    let indices: Vec<NodeIndex> = nodes.iter().map(|_| graph.add_node(())).collect();
    for (i, n) in nodes.iter().enumerate() {
        for &dep in &n.dependencies {
            graph.add_edge(indices[dep as usize], indices[i], ());
        }
    }
    toposort(&graph, None).map(|_| ()).map_err(|cycle| DagError::DependencyCycle {
        label: desc.nodes[cycle.node_id().index()].label.clone(),
    })
}
