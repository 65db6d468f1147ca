//! Key → vbucket → node/session routing (C8, `spec.md` §2, §4.6 step 1).

use std::sync::Arc;

use kv_protocol::ClusterConfig;

use crate::session::KvSession;
use crate::tracker::ClusterTracker;

/// `vbucket(key) = (crc32(key) >> 16) & (num_vbuckets - 1)`, the hash every
/// Couchbase client uses to locate a key's partition.
pub fn vbucket_for_key(key: &[u8], num_vbuckets: usize) -> usize {
    debug_assert!(num_vbuckets.is_power_of_two(), "vbucket maps are always a power of two in size");
    let hash = crc32fast::hash(key);
    ((hash >> 16) as usize) & (num_vbuckets - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    NoConfigurationYet,
    VbucketUnowned,
    NoSessionForNode,
}

/// Resolves `key`'s owning node index under `config` for `replica_index`
/// (0 = master).
pub fn resolve_node(config: &ClusterConfig, key: &[u8], replica_index: usize) -> Result<usize, DispatchError> {
    if config.vbucket_map.is_empty() {
        return Err(DispatchError::NoConfigurationYet);
    }
    let vbucket = vbucket_for_key(key, config.vbucket_map.len());
    config.vbucket_owner(vbucket, replica_index).ok_or(DispatchError::VbucketUnowned)
}

/// Full resolution: key → vbucket → node → live session, against whatever
/// config the tracker currently holds.
pub async fn dispatch(tracker: &Arc<ClusterTracker>, key: &[u8], replica_index: usize) -> Result<Arc<KvSession>, DispatchError> {
    let config = tracker.current_config().await.ok_or(DispatchError::NoConfigurationYet)?;
    let node_index = resolve_node(&config, key, replica_index)?;
    tracker.node_session(node_index).await.ok_or(DispatchError::NoSessionForNode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vbucket_hash_is_within_range_and_deterministic() {
        let n = 1024;
        let a = vbucket_for_key(b"document-1", n);
        let b = vbucket_for_key(b"document-1", n);
        assert_eq!(a, b);
        assert!(a < n);
    }

    #[test]
    fn different_keys_usually_land_on_different_vbuckets() {
        let n = 1024;
        let a = vbucket_for_key(b"document-1", n);
        let b = vbucket_for_key(b"document-2", n);
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_node_reports_no_configuration_yet_on_empty_map() {
        let config = ClusterConfig::blank();
        assert_eq!(resolve_node(&config, b"k", 0), Err(DispatchError::NoConfigurationYet));
    }

    #[test]
    fn resolve_node_reports_unowned_vbucket() {
        let config = ClusterConfig { epoch: 1, rev: 1, nodes: vec![], vbucket_map: vec![vec![-1]], force: false };
        assert_eq!(resolve_node(&config, b"k", 0), Err(DispatchError::VbucketUnowned));
    }
}
