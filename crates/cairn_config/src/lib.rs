//! Parsing and validation of `cairn.toml` project configuration files.
//!
//! The configuration names the cache directory and cache files, the eviction
//! limits and the signature policy. [`ProjectConfig::graph_settings`] and
//! [`ProjectConfig::eviction_policy`] turn it into the values the graph
//! builder and the build session take.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{find_project_root, load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
