//! Freezes a [`DagData`] into the `.dag` format.

use std::collections::HashMap;
use std::path::Path;

use cairn_common::{Digest, FileAndHash};
use cairn_frozen::{FrozenBuilder, Written, DAG_MAGIC};

use crate::error::DagError;
use crate::layout::{env, file, file_sig, glob_sig, keyword, node, pass, root, scanner};
use crate::types::{DagData, NodeData, Scanner, ScannerKind};

/// Lays out `dag` in a fresh builder. The caller finishes it with
/// [`DAG_MAGIC`] as trailer.
pub fn write_dag(dag: &DagData) -> FrozenBuilder {
    let mut b = FrozenBuilder::new();
    let r = b.alloc(root::SIZE);
    b.put_u32(r + root::MAGIC, DAG_MAGIC);
    b.put_u32(r + root::NODE_COUNT, dag.nodes.len() as u32);

    let guids: Vec<Digest> = dag.nodes.iter().map(|n| n.guid).collect();
    b.put_digest_slice(r + root::NODE_GUIDS, &guids);

    let mut scanners: HashMap<Digest, usize> = HashMap::new();
    b.put_records(r + root::NODES, node::SIZE, &dag.nodes, |b, at, n| {
        write_node(b, at, n, &mut scanners)
    });

    let mut order: Vec<u32> = (0..dag.nodes.len() as u32).collect();
    order.sort_by_key(|&i| guids[i as usize]);
    b.put_u32_slice(r + root::GUID_ORDER, &order);

    b.put_records(r + root::PASSES, pass::SIZE, &dag.passes, |b, at, p| {
        b.put_str(at + pass::NAME, &p.name);
        b.put_i32(at + pass::BUILD_ORDER, p.build_order);
    });
    b.put_records(
        r + root::FILE_SIGNATURES,
        file_sig::SIZE,
        &dag.file_signatures,
        |b, at, s| {
            b.put_str(at + file_sig::PATH, &s.path);
            b.put_u64(at + file_sig::TIMESTAMP, s.timestamp);
        },
    );
    b.put_records(
        r + root::GLOB_SIGNATURES,
        glob_sig::SIZE,
        &dag.glob_signatures,
        |b, at, s| {
            b.put_str(at + glob_sig::PATH, &s.path);
            b.put_digest(at + glob_sig::DIGEST, &s.digest);
        },
    );
    b.put_u32_slice(
        r + root::CONTENT_DIGEST_EXTENSIONS,
        &dag.content_digest_extensions,
    );

    b.put_str(r + root::STATE_FILE_NAME, &dag.state_file_name);
    b.put_str(r + root::STATE_FILE_NAME_TMP, &dag.state_file_name_tmp);
    b.put_str(r + root::SCAN_CACHE_FILE_NAME, &dag.scan_cache_file_name);
    b.put_str(
        r + root::SCAN_CACHE_FILE_NAME_TMP,
        &dag.scan_cache_file_name_tmp,
    );
    b.put_str(r + root::DIGEST_CACHE_FILE_NAME, &dag.digest_cache_file_name);
    b.put_str(
        r + root::DIGEST_CACHE_FILE_NAME_TMP,
        &dag.digest_cache_file_name_tmp,
    );
    b.put_opt_str(r + root::BUILD_TITLE, dag.build_title.as_deref());
    b
}

/// Writes `dag` to `path` with its trailer. Publish the returned token to
/// make it visible under its final name.
pub fn save_dag(dag: &DagData, path: &Path) -> Result<Written, DagError> {
    let written = write_dag(dag).finish(path, Some(DAG_MAGIC))?;
    tracing::debug!(
        path = %path.display(),
        nodes = dag.nodes.len(),
        passes = dag.passes.len(),
        "froze build graph"
    );
    Ok(written)
}

fn write_node(
    b: &mut FrozenBuilder,
    at: usize,
    n: &NodeData,
    scanners: &mut HashMap<Digest, usize>,
) {
    b.put_str(at + node::ACTION, &n.action);
    b.put_str(at + node::ANNOTATION, &n.annotation);
    b.put_u32(at + node::PASS_INDEX, n.pass_index);
    b.put_u32(at + node::FLAGS, n.flags.bits());
    b.put_u32_slice(at + node::DEPENDENCIES, &n.dependencies);
    b.put_u32_slice(at + node::BACK_LINKS, &n.back_links);
    write_files(b, at + node::INPUTS, &n.inputs);
    write_files(b, at + node::OUTPUTS, &n.outputs);
    write_files(b, at + node::OUTPUT_DIRS, &n.output_dirs);
    write_files(b, at + node::AUX_OUTPUTS, &n.aux_outputs);
    b.put_records(at + node::ENV_VARS, env::SIZE, &n.env_vars, |b, at, e| {
        b.put_str(at + env::NAME, &e.name);
        b.put_str(at + env::VALUE, &e.value);
    });

    let target = n.scanner.as_ref().map(|s| match scanners.get(&s.guid) {
        Some(&existing) => existing,
        None => {
            let offset = write_scanner(b, s);
            scanners.insert(s.guid, offset);
            offset
        }
    });
    b.put_ptr(at + node::SCANNER, target);
}

fn write_files(b: &mut FrozenBuilder, at: usize, files: &[FileAndHash]) {
    b.put_records(at, file::SIZE, files, |b, at, f| {
        b.put_str(at + file::NAME, &f.filename);
        b.put_u32(at + file::HASH, f.filename_hash);
    });
}

fn write_scanner(b: &mut FrozenBuilder, s: &Scanner) -> usize {
    let at = b.alloc(scanner::SIZE);
    b.put_u32(at + scanner::KIND, s.kind.tag());
    b.put_str_slice(at + scanner::INCLUDE_PATHS, &s.include_paths);
    b.put_digest(at + scanner::GUID, &s.guid);
    if let ScannerKind::Generic(generic) = &s.kind {
        b.put_u32(at + scanner::GENERIC_FLAGS, generic.flags.bits());
        b.put_records(
            at + scanner::KEYWORDS,
            keyword::SIZE,
            &generic.keywords,
            |b, at, k| {
                b.put_str(at + keyword::TEXT, &k.text);
                // bounded by Scanner::new
                b.put_u16(at + keyword::LEN, u16::try_from(k.text.len()).unwrap_or(u16::MAX));
                b.put_u8(at + keyword::FOLLOW, u8::from(k.follow));
            },
        );
    }
    at
}
