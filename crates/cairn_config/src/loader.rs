//! Configuration file loading and validation.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{ProjectConfig, DEFAULT_DAG_FILE};

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "cairn.toml";

/// Loads and validates `<project_dir>/cairn.toml`.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let content = std::fs::read_to_string(project_dir.join(CONFIG_FILE))?;
    load_config_from_str(&content)
}

/// Parses and validates a `cairn.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Walks up from `start` to the nearest directory containing `cairn.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).is_file() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(ConfigError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "could not find {CONFIG_FILE} in {} or any parent directory",
                    start.display()
                ),
            )));
        }
    }
}

fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.trim().is_empty() {
        return Err(ConfigError::ValidationError("project.name is empty".to_string()));
    }
    if config.cache.dir.is_empty() {
        return Err(ConfigError::ValidationError("cache.dir is empty".to_string()));
    }
    let files = [
        ("cache.state_file", &config.cache.state_file),
        ("cache.scan_cache_file", &config.cache.scan_cache_file),
        ("cache.digest_cache_file", &config.cache.digest_cache_file),
    ];
    let mut seen = HashSet::from([DEFAULT_DAG_FILE]);
    for (key, name) in files {
        if name.is_empty() {
            return Err(ConfigError::ValidationError(format!("{key} is empty")));
        }
        if name.contains(['/', '\\']) {
            return Err(ConfigError::ValidationError(format!(
                "{key} must be a file name, got '{name}'"
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "{key} '{name}' collides with another cache file"
            )));
        }
    }
    for ext in &config.signatures.content_digest_extensions {
        if !ext.starts_with('.') || ext.len() < 2 {
            return Err(ConfigError::ValidationError(format!(
                "content digest extension '{ext}' must start with a dot"
            )));
        }
    }
    if config.digest_cache.max_records == 0 {
        return Err(ConfigError::ValidationError(
            "digest_cache.max_records must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let toml = r#"
[project]
name = "demo"
title = "Demo build"

[cache]
dir = "build/cache"
state_file = "demo.state"
scan_cache_file = "demo.scancache"
digest_cache_file = "demo.digestcache"

[digest_cache]
max_age_days = 7
max_records = 5000

[scan_cache]
max_age_days = 14

[signatures]
content_digest_extensions = [".c", ".h"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(config.project.title.as_deref(), Some("Demo build"));
        assert_eq!(config.cache.dir, "build/cache");
        assert_eq!(config.cache.digest_cache_file, "demo.digestcache");
        assert_eq!(config.digest_cache.max_records, 5000);
        assert_eq!(config.scan_cache.max_age_days, 14);
    }

    #[test]
    fn missing_name_errors() {
        let err = load_config_from_str("[project]\nname = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn missing_project_table_errors() {
        let err = load_config_from_str("[cache]\ndir = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn colliding_file_names_error() {
        let toml = r#"
[project]
name = "demo"

[cache]
state_file = "same"
scan_cache_file = "same"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(err.to_string().contains("cache.scan_cache_file"));
    }

    #[test]
    fn cache_file_named_like_the_graph_errors() {
        let toml = "[project]\nname = \"demo\"\n[cache]\nstate_file = \"build.dag\"\n";
        assert!(matches!(
            load_config_from_str(toml).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn empty_file_name_errors() {
        let toml = "[project]\nname = \"demo\"\n[cache]\ndigest_cache_file = \"\"\n";
        assert!(matches!(
            load_config_from_str(toml).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn extension_without_dot_errors() {
        let toml = "[project]\nname = \"demo\"\n[signatures]\ncontent_digest_extensions = [\"c\"]\n";
        assert!(matches!(
            load_config_from_str(toml).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn find_project_root_in_parent() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "[project]\nname = \"x\"\n").unwrap();
        let sub = tmp.path().join("src").join("deep");
        std::fs::create_dir_all(&sub).unwrap();
        assert_eq!(find_project_root(&sub).unwrap(), tmp.path());
        let config = load_config(&find_project_root(&sub).unwrap()).unwrap();
        assert_eq!(config.project.name, "x");
    }

    #[test]
    fn find_project_root_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_project_root(tmp.path()).unwrap_err(),
            ConfigError::IoError(_)
        ));
    }
}
