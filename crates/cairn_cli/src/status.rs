//! Implementation of the `cairn status` command.

use std::path::PathBuf;

use cairn_cache::{BuildSession, DirectiveScanner, DiskFs};

use crate::project::load_project;
use crate::{GlobalArgs, StatusArgs};

/// Runs the `cairn status` command.
///
/// Prints each node that the next build would run, with the reason. Exits
/// with 1 when anything is out of date or the graph itself is stale. The
/// caches are only read.
pub fn run(args: &StatusArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = load_project(global)?;
    let dag_path = args
        .dag
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| project.dag_path());
    let session = BuildSession::open(
        &dag_path,
        DiskFs::new(&project.root),
        project.config.eviction_policy(),
    )?;

    if let Some(stale) = session.check_signatures()? {
        println!("graph must be regenerated: {stale}");
        return Ok(1);
    }

    let stale = session.out_of_date(&DirectiveScanner)?;
    let dag = session.dag();
    for (index, reason) in &stale {
        let node = dag.node(*index)?;
        let name = match node.annotation()? {
            "" => node.action()?,
            annotation => annotation,
        };
        println!("{name}: {reason}");
    }
    if !global.quiet {
        let title = dag.build_title()?.unwrap_or(project.config.project.name.as_str());
        println!(
            "{title}: {} of {} nodes out of date",
            stale.len(),
            dag.node_count()?
        );
    }
    Ok(if stale.is_empty() { 0 } else { 1 })
}
