//! Implementation of the `cairn inspect` command.
//!
//! Dumps every field of a frozen file. The file kind is taken from the
//! suffix and the header magic is validated before anything is printed.

use std::io::{self, Write};
use std::path::Path;

use cairn_cache::digest::read_records;
use cairn_cache::{DigestCacheFormat, RecordedFileRef, ScanFile, StateFile};
use cairn_dag::{Dag, DagError, FileRef};
use cairn_frozen::{FrozenArray, FrozenError, FrozenView};

use crate::{GlobalArgs, InspectArgs};

/// Runs the `cairn inspect` command.
pub fn run(args: &InspectArgs, _global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match inspect(Path::new(&args.file), &mut out) {
        Ok(()) => Ok(0),
        Err(e) => {
            out.flush()?;
            eprintln!("{}", e.message(&args.file));
            Ok(1)
        }
    }
}

enum DumpError {
    UnknownType,
    Frozen(FrozenError),
    Other(String),
}

impl DumpError {
    fn message(&self, file: &str) -> String {
        match self {
            DumpError::UnknownType => format!("{file}: unknown file type"),
            DumpError::Frozen(FrozenError::BadMagic { .. }) => format!("{file}: bad magic number"),
            DumpError::Frozen(FrozenError::Io { .. }) => format!("{file}: could not map file"),
            DumpError::Frozen(e) => format!("{file}: {e}"),
            DumpError::Other(e) => format!("{file}: {e}"),
        }
    }
}

impl From<FrozenError> for DumpError {
    fn from(e: FrozenError) -> Self {
        DumpError::Frozen(e)
    }
}

impl From<DagError> for DumpError {
    fn from(e: DagError) -> Self {
        match e {
            DagError::Frozen(e) => DumpError::Frozen(e),
            other => DumpError::Other(other.to_string()),
        }
    }
}

impl From<io::Error> for DumpError {
    fn from(e: io::Error) -> Self {
        DumpError::Other(e.to_string())
    }
}

fn inspect(path: &Path, out: &mut dyn Write) -> Result<(), DumpError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("dag") => dump_dag(path, out),
        Some("state") => dump_state(path, out),
        Some("scancache") => dump_scan_cache(path, out),
        Some("digestcache") => dump_digest_cache(path, out),
        _ => Err(DumpError::UnknownType),
    }
}

fn files(out: &mut dyn Write, label: &str, list: FrozenArray<'_, FileRef<'_>>) -> Result<(), DumpError> {
    writeln!(out, "  {label}: {}", list.len())?;
    for f in list.iter() {
        let f = f?;
        writeln!(out, "    {} (hash 0x{:08x})", f.filename, f.filename_hash)?;
    }
    Ok(())
}

fn dump_dag(path: &Path, out: &mut dyn Write) -> Result<(), DumpError> {
    let dag = Dag::open(path)?;
    writeln!(out, "magic: 0x{:08x}", dag.magic()?)?;
    writeln!(out, "title: {}", dag.build_title()?.unwrap_or("(none)"))?;
    writeln!(out, "nodes: {}", dag.node_count()?)?;
    let guids = dag.node_guids()?;
    for (index, node) in dag.nodes()?.iter().enumerate() {
        let node = node?;
        writeln!(out, "node {index}:")?;
        writeln!(out, "  guid: {}", guids.get(index)?)?;
        writeln!(out, "  action: {}", node.action()?)?;
        writeln!(out, "  annotation: {}", node.annotation()?)?;
        writeln!(out, "  pass: {}", node.pass_index()?)?;
        writeln!(out, "  flags: 0x{:x}", node.flags()?.bits())?;
        writeln!(out, "  dependencies: {:?}", node.dependencies()?.to_vec()?)?;
        writeln!(out, "  back links: {:?}", node.back_links()?.to_vec()?)?;
        files(out, "inputs", node.input_files()?)?;
        files(out, "outputs", node.output_files()?)?;
        files(out, "output dirs", node.output_dirs()?)?;
        files(out, "aux outputs", node.aux_output_files()?)?;
        let env = node.env_vars()?;
        writeln!(out, "  env: {}", env.len())?;
        for var in env.iter() {
            let var = var?;
            writeln!(out, "    {}={}", var.name, var.value)?;
        }
        match node.scanner()? {
            None => writeln!(out, "  scanner: none")?,
            Some(scanner) => {
                let kind = match scanner.kind()? {
                    0 => "cpp",
                    _ => "generic",
                };
                writeln!(out, "  scanner: {kind}")?;
                writeln!(out, "    guid: {}", scanner.guid()?)?;
                writeln!(out, "    include paths: {:?}", scanner.include_paths()?.to_vec()?)?;
                writeln!(out, "    flags: 0x{:x}", scanner.generic_flags()?.bits())?;
                for kw in scanner.keywords()?.iter() {
                    let kw = kw?;
                    writeln!(out, "    keyword: {} (len {}, follow {})", kw.text, kw.len, kw.follow)?;
                }
            }
        }
    }
    let passes = dag.passes()?;
    writeln!(out, "passes: {}", passes.len())?;
    for (index, pass) in passes.iter().enumerate() {
        let pass = pass?;
        writeln!(out, "  {index}: {} (order {})", pass.name, pass.build_order)?;
    }
    let file_sigs = dag.file_signatures()?;
    writeln!(out, "file signatures: {}", file_sigs.len())?;
    for sig in file_sigs.iter() {
        let sig = sig?;
        writeln!(out, "  {} @ {}", sig.path, sig.timestamp)?;
    }
    let glob_sigs = dag.glob_signatures()?;
    writeln!(out, "glob signatures: {}", glob_sigs.len())?;
    for sig in glob_sigs.iter() {
        let sig = sig?;
        writeln!(out, "  {} {}", sig.path, sig.digest)?;
    }
    let exts = dag.content_digest_extensions()?.to_vec()?;
    let exts: Vec<String> = exts.iter().map(|h| format!("0x{h:08x}")).collect();
    writeln!(out, "content digest extensions: [{}]", exts.join(", "))?;
    writeln!(
        out,
        "state file: {} ({})",
        dag.state_file_name()?,
        dag.state_file_name_tmp()?
    )?;
    writeln!(
        out,
        "scan cache: {} ({})",
        dag.scan_cache_file_name()?,
        dag.scan_cache_file_name_tmp()?
    )?;
    writeln!(
        out,
        "digest cache: {} ({})",
        dag.digest_cache_file_name()?,
        dag.digest_cache_file_name_tmp()?
    )?;
    writeln!(out, "magic end: 0x{:08x}", dag.magic_end()?)?;
    Ok(())
}

fn recorded(
    out: &mut dyn Write,
    label: &str,
    list: FrozenArray<'_, RecordedFileRef<'_>>,
) -> Result<(), DumpError> {
    writeln!(out, "  {label}: {}", list.len())?;
    for f in list.iter() {
        let f = f?;
        writeln!(out, "    {} @ {} (hash 0x{:08x})", f.filename, f.timestamp, f.filename_hash)?;
    }
    Ok(())
}

fn dump_state(path: &Path, out: &mut dyn Write) -> Result<(), DumpError> {
    let state = StateFile::open(path)?;
    writeln!(out, "magic: 0x{:08x}", state.magic()?)?;
    writeln!(out, "nodes: {}", state.node_count()?)?;
    let guids = state.guids()?;
    for (index, node) in state.built_nodes()?.iter().enumerate() {
        let node = node?;
        writeln!(out, "node {}:", guids.get(index)?)?;
        writeln!(out, "  success: {}", node.success()?)?;
        writeln!(out, "  input signature: {}", node.input_signature()?)?;
        recorded(out, "outputs", node.output_files()?)?;
        recorded(out, "aux outputs", node.aux_output_files()?)?;
        recorded(out, "inputs", node.input_files()?)?;
        recorded(out, "implicit inputs", node.implicit_input_files()?)?;
    }
    Ok(())
}

fn dump_scan_cache(path: &Path, out: &mut dyn Write) -> Result<(), DumpError> {
    let scans = ScanFile::open(path)?;
    writeln!(out, "magic: 0x{:08x}", scans.magic()?)?;
    writeln!(out, "entries: {}", scans.entry_count()?)?;
    for entry in scans.all_entries()? {
        writeln!(out, "entry {}:", entry.key)?;
        writeln!(out, "  access time: {}", entry.access_time)?;
        writeln!(out, "  file timestamp: {}", entry.result.file_timestamp)?;
        writeln!(out, "  includes: {}", entry.result.includes.len())?;
        for inc in &entry.result.includes {
            writeln!(
                out,
                "    {} (hash 0x{:08x}, follow {})",
                inc.filename, inc.filename_hash, inc.follow
            )?;
        }
    }
    writeln!(out, "magic end: 0x{:08x}", scans.magic_end()?)?;
    Ok(())
}

fn dump_digest_cache(path: &Path, out: &mut dyn Write) -> Result<(), DumpError> {
    let view = FrozenView::load::<DigestCacheFormat>(path)?;
    writeln!(out, "magic: 0x{:08x}", view.root().u32_at(0)?)?;
    let records = read_records(&view)?;
    writeln!(out, "records: {}", records.len())?;
    for r in &records {
        writeln!(out, "{}:", r.filename)?;
        writeln!(out, "  hash: 0x{:08x}", r.filename_hash)?;
        writeln!(out, "  digest: {}", r.digest)?;
        writeln!(out, "  access time: {}", r.access_time)?;
        writeln!(out, "  timestamp: {}", r.timestamp)?;
    }
    Ok(())
}
