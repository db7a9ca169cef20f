//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};

/// Filesystem tuning configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsConfig {
    /// Capacity of the file contents cache (whole file bodies).
    #[serde(default = "default_contents_cache")]
    pub contents_cache_capacity: usize,
    /// Capacity of the file attributes cache.
    #[serde(default = "default_attribs_cache")]
    pub attribs_cache_capacity: usize,
    /// Capacity of the query membership cache.
    #[serde(default = "default_query_cache")]
    pub query_cache_capacity: usize,
    /// Maximum file size accepted through a handle, in bytes. Zero means
    /// unlimited.
    #[serde(default)]
    pub size_limit: u64,
    /// Regular expressions matched against filenames during lookup; a match
    /// refuses the operation. Intended for editor swapfiles and trash-can
    /// names that applications create uninvited.
    #[serde(default = "default_forbidden_filenames")]
    pub forbidden_filenames: Vec<String>,
    /// Debounce delay for the change watcher, in milliseconds.
    #[serde(default = "default_change_watch_delay_ms")]
    pub change_watch_delay_ms: u64,
}

fn default_contents_cache() -> usize {
    100
}

fn default_attribs_cache() -> usize {
    10_000
}

fn default_query_cache() -> usize {
    10_000
}

fn default_forbidden_filenames() -> Vec<String> {
    vec![".*[.]sw[a-z]$".to_string(), "^[.]Trash$".to_string()]
}

fn default_change_watch_delay_ms() -> u64 {
    1000
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            contents_cache_capacity: default_contents_cache(),
            attribs_cache_capacity: default_attribs_cache(),
            query_cache_capacity: default_query_cache(),
            size_limit: 0,
            forbidden_filenames: default_forbidden_filenames(),
            change_watch_delay_ms: default_change_watch_delay_ms(),
        }
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fs: FsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_capacities() {
        let config = FsConfig::default();
        assert_eq!(config.contents_cache_capacity, 100);
        assert_eq!(config.attribs_cache_capacity, 10_000);
        assert_eq!(config.query_cache_capacity, 10_000);
        assert_eq!(config.size_limit, 0);
        assert_eq!(config.forbidden_filenames.len(), 2);
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: FsConfig = serde_json::from_str(r#"{"size_limit": 42}"#).unwrap();
        assert_eq!(config.size_limit, 42);
        assert_eq!(config.contents_cache_capacity, 100);
    }
}
