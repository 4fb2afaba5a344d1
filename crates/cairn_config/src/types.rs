//! Configuration types deserialized from `cairn.toml`.

use std::path::{Path, PathBuf};

use cairn_cache::EvictionPolicy;
use cairn_common::SECS_PER_DAY;
use cairn_dag::GraphSettings;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

/// The top-level project configuration parsed from `cairn.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    /// Project metadata.
    pub project: ProjectMeta,
    /// Where the graph and its caches live.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Content-digest cache eviction.
    #[serde(default)]
    pub digest_cache: DigestCacheConfig,
    /// Include-scan cache eviction.
    #[serde(default)]
    pub scan_cache: ScanCacheConfig,
    /// Which inputs are signed by content.
    #[serde(default)]
    pub signatures: SignatureConfig,
}

impl ProjectConfig {
    /// The cache directory, resolved against `root`.
    pub fn cache_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.cache.dir)
    }

    /// Default location of the frozen graph under `root`.
    pub fn dag_path(&self, root: &Path) -> PathBuf {
        self.cache_dir(root).join(DEFAULT_DAG_FILE)
    }

    /// Graph metadata to freeze alongside the nodes.
    pub fn graph_settings(&self) -> GraphSettings {
        GraphSettings {
            build_title: self.project.title.clone(),
            state_file_name: self.cache.state_file.clone(),
            scan_cache_file_name: self.cache.scan_cache_file.clone(),
            digest_cache_file_name: self.cache.digest_cache_file.clone(),
            content_digest_extensions: self.signatures.content_digest_extensions.clone(),
        }
    }

    /// Cache eviction limits.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            digest_max_age_secs: self.digest_cache.max_age_days.saturating_mul(SECS_PER_DAY),
            digest_max_records: self.digest_cache.max_records,
            scan_max_age_secs: self.scan_cache.max_age_days.saturating_mul(SECS_PER_DAY),
        }
    }
}

/// File name of the graph inside the cache directory.
pub const DEFAULT_DAG_FILE: &str = "build.dag";

/// Core project metadata.
#[derive(Debug, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// Human-readable build title stored in the graph.
    #[serde(default)]
    pub title: Option<String>,
}

/// Cache file locations.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory relative to the project root.
    pub dir: String,
    /// Built-node state file name.
    pub state_file: String,
    /// Include-scan cache file name.
    pub scan_cache_file: String,
    /// Content-digest cache file name.
    pub digest_cache_file: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let graph = GraphSettings::default();
        Self {
            dir: ".cairn".to_string(),
            state_file: graph.state_file_name,
            scan_cache_file: graph.scan_cache_file_name,
            digest_cache_file: graph.digest_cache_file_name,
        }
    }
}

/// `[digest_cache]` limits.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DigestCacheConfig {
    /// Records unused for longer are dropped.
    pub max_age_days: u64,
    /// At most this many most recently used records are kept.
    pub max_records: usize,
}

impl Default for DigestCacheConfig {
    fn default() -> Self {
        let policy = EvictionPolicy::default();
        Self {
            max_age_days: policy.digest_max_age_secs / SECS_PER_DAY,
            max_records: policy.digest_max_records,
        }
    }
}

/// `[scan_cache]` limits.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanCacheConfig {
    /// Entries unused for longer are dropped.
    pub max_age_days: u64,
}

impl Default for ScanCacheConfig {
    fn default() -> Self {
        Self {
            max_age_days: EvictionPolicy::default().scan_max_age_secs / SECS_PER_DAY,
        }
    }
}

/// `[signatures]` settings.
#[derive(Debug, Default, Deserialize)]
pub struct SignatureConfig {
    /// Extensions (with the dot) whose inputs are signed by content; the
    /// rest are signed by timestamp. Empty signs every input by content.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub content_digest_extensions: Vec<String>,
}

/// Accepts `".c"` as well as `[".c", ".h"]`.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}
