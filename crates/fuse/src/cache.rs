//! Per-filesystem LRU caches: file contents, file attributes, and query
//! membership. All are keyed structurally and internally synchronized.
//! NotFound results are cached as absent entries so repeated stats of
//! missing files stay cheap.

use facetfs_core::FsConfig;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Key of a file-scoped cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub namespace: String,
    pub entity_id: String,
    pub filename: String,
}

impl FileKey {
    pub fn new(namespace: &str, entity_id: &str, filename: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            entity_id: entity_id.to_string(),
            filename: filename.to_string(),
        }
    }
}

/// Key of a query membership entry, scoped to one query instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub namespace: String,
    pub query_id: i64,
    pub entity_id: String,
}

/// Cached file contents (or a cached absence).
#[derive(Clone, Debug)]
pub struct ContentsEntry {
    pub row_guid: String,
    pub data: Vec<u8>,
    pub exists: bool,
    pub directory: bool,
}

impl ContentsEntry {
    pub fn absent() -> Self {
        Self {
            row_guid: String::new(),
            data: Vec::new(),
            exists: false,
            directory: false,
        }
    }
}

/// Cached file attributes (or a cached absence).
#[derive(Clone, Debug, Default)]
pub struct AttribsEntry {
    pub row_guid: String,
    pub length: u64,
    pub exists: bool,
    pub directory: bool,
}

/// The three caches, scoped to one filesystem instance.
pub struct FsCaches {
    contents: Mutex<LruCache<FileKey, ContentsEntry>>,
    attribs: Mutex<LruCache<FileKey, AttribsEntry>>,
    query: Mutex<LruCache<QueryKey, bool>>,
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).expect("nonzero capacity")
}

impl FsCaches {
    pub fn new(config: &FsConfig) -> Self {
        Self {
            contents: Mutex::new(LruCache::new(capacity(config.contents_cache_capacity))),
            attribs: Mutex::new(LruCache::new(capacity(config.attribs_cache_capacity))),
            query: Mutex::new(LruCache::new(capacity(config.query_cache_capacity))),
        }
    }

    pub fn get_contents(&self, key: &FileKey) -> Option<ContentsEntry> {
        self.contents.lock().expect("contents lock").get(key).cloned()
    }

    pub fn get_attribs(&self, key: &FileKey) -> Option<AttribsEntry> {
        self.attribs.lock().expect("attribs lock").get(key).cloned()
    }

    /// Record a file's contents and derived attributes in both caches.
    pub fn put_file(&self, key: &FileKey, data: &[u8], row_guid: &str, directory: bool) {
        self.contents.lock().expect("contents lock").put(
            key.clone(),
            ContentsEntry {
                row_guid: row_guid.to_string(),
                data: data.to_vec(),
                exists: true,
                directory,
            },
        );
        self.attribs.lock().expect("attribs lock").put(
            key.clone(),
            AttribsEntry {
                row_guid: row_guid.to_string(),
                length: data.len() as u64,
                exists: true,
                directory,
            },
        );
    }

    /// Record that a file does not exist.
    pub fn put_absent(&self, key: &FileKey) {
        self.contents
            .lock()
            .expect("contents lock")
            .put(key.clone(), ContentsEntry::absent());
        self.attribs
            .lock()
            .expect("attribs lock")
            .put(key.clone(), AttribsEntry::default());
    }

    /// Drop both file-scoped entries for a key.
    pub fn invalidate(&self, key: &FileKey) {
        tracing::debug!(
            namespace = %key.namespace,
            entity_id = %key.entity_id,
            filename = %key.filename,
            "invalidating caches"
        );
        self.contents.lock().expect("contents lock").pop(key);
        self.attribs.lock().expect("attribs lock").pop(key);
    }

    pub fn record_query_member(&self, key: QueryKey) {
        self.query.lock().expect("query lock").put(key, true);
    }

    pub fn query_member(&self, key: &QueryKey) -> bool {
        self.query
            .lock()
            .expect("query lock")
            .get(key)
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caches() -> FsCaches {
        FsCaches::new(&FsConfig::default())
    }

    #[test]
    fn put_file_fills_both_caches() {
        let caches = caches();
        let key = FileKey::new("", "e", "a");
        caches.put_file(&key, b"data", "guid-1", false);

        let contents = caches.get_contents(&key).unwrap();
        assert!(contents.exists);
        assert_eq!(contents.data, b"data");
        assert_eq!(contents.row_guid, "guid-1");

        let attribs = caches.get_attribs(&key).unwrap();
        assert_eq!(attribs.length, 4);
        assert!(attribs.exists);
    }

    #[test]
    fn absence_is_cached() {
        let caches = caches();
        let key = FileKey::new("", "e", "missing");
        assert!(caches.get_attribs(&key).is_none());

        caches.put_absent(&key);
        let attribs = caches.get_attribs(&key).unwrap();
        assert!(!attribs.exists);
        assert_eq!(attribs.length, 0);
    }

    #[test]
    fn invalidate_clears_both() {
        let caches = caches();
        let key = FileKey::new("ns", "e", "a");
        caches.put_file(&key, b"x", "g", false);
        caches.invalidate(&key);
        assert!(caches.get_contents(&key).is_none());
        assert!(caches.get_attribs(&key).is_none());
    }

    #[test]
    fn query_membership_is_per_instance() {
        let caches = caches();
        let member = QueryKey {
            namespace: String::new(),
            query_id: 1,
            entity_id: "e".into(),
        };
        caches.record_query_member(member.clone());
        assert!(caches.query_member(&member));

        let other_instance = QueryKey {
            query_id: 2,
            ..member
        };
        assert!(!caches.query_member(&other_instance));
    }

    #[test]
    fn contents_cache_evicts_lru() {
        let config = FsConfig {
            contents_cache_capacity: 2,
            ..FsConfig::default()
        };
        let caches = FsCaches::new(&config);

        for name in ["a", "b", "c"] {
            caches.put_file(&FileKey::new("", "e", name), b"x", "g", false);
        }
        assert!(caches.get_contents(&FileKey::new("", "e", "a")).is_none());
        assert!(caches.get_contents(&FileKey::new("", "e", "c")).is_some());
    }
}
