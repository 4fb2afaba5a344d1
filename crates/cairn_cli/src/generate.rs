//! Implementation of the `cairn generate` command.

use std::path::{Path, PathBuf};

use cairn_cache::{DiskFs, FsProbe};
use cairn_dag::{save_dag, tmp_name, DagBuilder, GraphDescriptor};

use crate::project::load_project;
use crate::{GenerateArgs, GlobalArgs};

/// Runs the `cairn generate` command.
///
/// Builds the graph from the JSON description and the project settings and
/// publishes it atomically: the file is written under a temporary name and
/// renamed over the output.
pub fn run(args: &GenerateArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let desc = GraphDescriptor::load(Path::new(&args.graph))?;
    let fs = DiskFs::new(&project.root);
    let data = DagBuilder::new(project.config.graph_settings(), &FsProbe(&fs)).build(&desc)?;

    let out = args
        .output
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| project.dag_path());
    if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file_name = out
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("invalid output path: {}", out.display()))?;
    let tmp = out.with_file_name(tmp_name(file_name));
    let written = save_dag(&data, &tmp)?;
    let len = written.len();
    written.publish(&out)?;

    if !global.quiet {
        println!(
            "wrote {} ({} nodes, {} passes, {len} bytes)",
            out.display(),
            data.nodes.len(),
            data.passes.len()
        );
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_dag::Dag;

    const GRAPH: &str = r#"{
        "title": "cli demo",
        "nodes": [
            { "label": "cc", "action": "cc -c a.c", "inputs": ["a.c"], "outputs": ["a.o"],
              "pass": { "name": "compile", "build_order": 10 } }
        ],
        "glob_signatures": [{ "path": "src" }]
    }"#;

    fn setup() -> (tempfile::TempDir, GlobalArgs) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("cairn.toml"),
            "[project]\nname = \"demo\"\n[signatures]\ncontent_digest_extensions = [\".c\"]\n",
        )
        .unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("graph.json"), GRAPH).unwrap();
        let global = GlobalArgs {
            quiet: true,
            verbose: false,
            config: Some(tmp.path().to_string_lossy().into_owned()),
        };
        (tmp, global)
    }

    #[test]
    fn writes_default_location() {
        let (tmp, global) = setup();
        let args = GenerateArgs {
            graph: tmp.path().join("graph.json").to_string_lossy().into_owned(),
            output: None,
        };
        assert_eq!(run(&args, &global).unwrap(), 0);
        let dag_path = tmp.path().join(".cairn/build.dag");
        assert!(!tmp.path().join(".cairn/build.dag.tmp").exists());
        let dag = Dag::open(&dag_path).unwrap();
        assert_eq!(dag.node_count().unwrap(), 1);
        assert_eq!(dag.build_title().unwrap(), Some("cli demo"));
        assert_eq!(dag.content_digest_extensions().unwrap().len(), 1);
        assert_eq!(dag.glob_signatures().unwrap().len(), 1);
    }

    #[test]
    fn writes_explicit_output() {
        let (tmp, global) = setup();
        let out = tmp.path().join("elsewhere/x.dag");
        let args = GenerateArgs {
            graph: tmp.path().join("graph.json").to_string_lossy().into_owned(),
            output: Some(out.to_string_lossy().into_owned()),
        };
        run(&args, &global).unwrap();
        assert!(out.exists());
    }

    #[test]
    fn bad_descriptor_fails_without_output() {
        let (tmp, global) = setup();
        std::fs::write(
            tmp.path().join("graph.json"),
            r#"{ "nodes": [ { "label": "a", "deps": ["missing"] } ] }"#,
        )
        .unwrap();
        let args = GenerateArgs {
            graph: tmp.path().join("graph.json").to_string_lossy().into_owned(),
            output: None,
        };
        let err = run(&args, &global).unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(!tmp.path().join(".cairn/build.dag").exists());
    }
}
