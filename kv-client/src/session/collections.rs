//! Per-session collection-ID cache (C2, `spec.md` §4.3.3).

use std::collections::HashMap;

const DEFAULT_COLLECTION_PATH: &str = "_default._default";
const DEFAULT_COLLECTION_UID: u32 = 0;

#[derive(Debug, Default)]
pub struct CollectionIdCache {
    entries: HashMap<String, u32>,
}

impl CollectionIdCache {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(DEFAULT_COLLECTION_PATH.to_string(), DEFAULT_COLLECTION_UID);
        CollectionIdCache { entries }
    }

    pub fn get(&self, scope: &str, collection: &str) -> Option<u32> {
        self.entries.get(&path(scope, collection)).copied()
    }

    pub fn insert(&mut self, scope: &str, collection: &str, uid: u32) {
        self.entries.insert(path(scope, collection), uid);
    }

    pub fn invalidate(&mut self, scope: &str, collection: &str) {
        self.entries.remove(&path(scope, collection));
    }

    pub fn is_default(scope: &str, collection: &str) -> bool {
        path(scope, collection) == DEFAULT_COLLECTION_PATH
    }
}

fn path(scope: &str, collection: &str) -> String {
    format!("{scope}.{collection}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_collection_is_preseeded() {
        let cache = CollectionIdCache::new();
        assert_eq!(cache.get("_default", "_default"), Some(0));
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut cache = CollectionIdCache::new();
        cache.insert("tenant", "orders", 9);
        assert_eq!(cache.get("tenant", "orders"), Some(9));
    }

    #[test]
    fn invalidate_clears_entry() {
        let mut cache = CollectionIdCache::new();
        cache.insert("tenant", "orders", 9);
        cache.invalidate("tenant", "orders");
        assert_eq!(cache.get("tenant", "orders"), None);
    }

    #[test]
    fn is_default_matches_only_default_default() {
        assert!(CollectionIdCache::is_default("_default", "_default"));
        assert!(!CollectionIdCache::is_default("tenant", "orders"));
    }
}
