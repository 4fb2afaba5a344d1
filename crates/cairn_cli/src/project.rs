//! Project root and configuration resolution shared by the commands.

use std::path::{Path, PathBuf};

use cairn_config::{find_project_root, load_config, ProjectConfig};

use crate::GlobalArgs;

/// A loaded project: its root directory and configuration.
pub struct Project {
    /// Directory containing `cairn.toml`.
    pub root: PathBuf,
    /// The parsed configuration.
    pub config: ProjectConfig,
}

impl Project {
    /// Default graph location.
    pub fn dag_path(&self) -> PathBuf {
        self.config.dag_path(&self.root)
    }
}

/// Resolves the project root from global CLI args.
///
/// `--config` may name the file or its directory; without it the current
/// directory and its parents are searched.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &global.config {
        Some(config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_file() {
                Ok(p.parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")))
            } else {
                Ok(p)
            }
        }
        None => Ok(find_project_root(&std::env::current_dir()?)?),
    }
}

/// Loads the project selected by the global args.
pub fn load_project(global: &GlobalArgs) -> Result<Project, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = load_config(&root)?;
    tracing::debug!(root = %root.display(), project = %config.project.name, "loaded project");
    Ok(Project { root, config })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(config: Option<String>) -> GlobalArgs {
        GlobalArgs {
            quiet: false,
            verbose: false,
            config,
        }
    }

    #[test]
    fn config_file_selects_its_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("cairn.toml");
        std::fs::write(&file, "[project]\nname = \"demo\"\n").unwrap();
        let g = global(Some(file.to_string_lossy().into_owned()));
        assert_eq!(resolve_project_root(&g).unwrap(), tmp.path());
        let project = load_project(&g).unwrap();
        assert_eq!(project.dag_path(), tmp.path().join(".cairn").join("build.dag"));
    }

    #[test]
    fn config_dir_is_used_as_is() {
        let tmp = tempfile::tempdir().unwrap();
        let g = global(Some(tmp.path().to_string_lossy().into_owned()));
        assert_eq!(resolve_project_root(&g).unwrap(), tmp.path());
        assert!(load_project(&g).is_err());
    }
}
