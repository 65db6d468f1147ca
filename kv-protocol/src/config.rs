//! Cluster configuration document model (`spec.md` §3, §6.2).
//!
//! Parses the JSON topology document the server publishes at bootstrap, via
//! server-push, and embedded in not-my-vbucket responses. The parser accepts
//! fields it does not recognise, matching the original's forward-compatible
//! `cbconfig`/`ConfigParser` behaviour.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServices {
    pub kv: Option<u16>,
    #[serde(rename = "kvSSL")]
    pub kv_ssl: Option<u16>,
    pub mgmt: Option<u16>,
    #[serde(rename = "mgmtSSL")]
    pub mgmt_ssl: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAlternateAddress {
    pub hostname: String,
    #[serde(default)]
    pub services: RawServices,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAlternateAddresses {
    pub external: Option<RawAlternateAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    pub hostname: String,
    #[serde(default)]
    pub services: RawServices,
    #[serde(rename = "alternateAddresses", default)]
    pub alternate_addresses: RawAlternateAddresses,
    #[serde(rename = "thisNode", default)]
    pub this_node: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVBucketServerMap {
    #[serde(rename = "serverList", default)]
    pub server_list: Vec<String>,
    #[serde(rename = "vBucketMap", default)]
    pub vbucket_map: Vec<Vec<i32>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawClusterConfig {
    pub rev: u64,
    #[serde(rename = "revEpoch", default)]
    pub rev_epoch: u64,
    #[serde(rename = "nodesExt", default)]
    pub nodes_ext: Vec<RawNode>,
    #[serde(rename = "vBucketServerMap")]
    pub vbucket_server_map: Option<RawVBucketServerMap>,
    #[serde(rename = "clusterCapabilities", default)]
    pub cluster_capabilities: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub name: Option<String>,
}

/// One node in the resolved configuration: hostname plus per-network-scheme
/// port maps (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub hostname: String,
    pub kv_port: Option<u16>,
    pub kv_ssl_port: Option<u16>,
    pub mgmt_port: Option<u16>,
    pub mgmt_ssl_port: Option<u16>,
    pub alt_hostname: Option<String>,
    pub alt_kv_port: Option<u16>,
    pub alt_kv_ssl_port: Option<u16>,
    pub this_node: bool,
}

impl Node {
    /// `(hostname, kv_port)` identity key used for config-tracker
    /// reconciliation diffs (`spec.md` §4.2).
    pub fn identity(&self, use_tls: bool, network: NetworkType) -> Option<(String, u16)> {
        match network {
            NetworkType::Default => {
                let port = if use_tls { self.kv_ssl_port } else { self.kv_port };
                port.map(|p| (self.hostname.clone(), p))
            }
            NetworkType::External => {
                let host = self.alt_hostname.as_ref()?;
                let port = if use_tls { self.alt_kv_ssl_port } else { self.alt_kv_port };
                port.map(|p| (host.clone(), p))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Default,
    External,
}

/// A fully resolved cluster topology, ordered by `(epoch, rev)`
/// (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub epoch: u64,
    pub rev: u64,
    pub nodes: Vec<Node>,
    /// `vbucket_map[vbucket_index] = [master, replica1, replica2, ...]`,
    /// node indices into `nodes`. `-1` means "no owner yet".
    pub vbucket_map: Vec<Vec<i32>>,
    pub force: bool,
}

impl ClusterConfig {
    pub fn order_key(&self) -> (u64, u64) {
        (self.epoch, self.rev)
    }

    /// A config whose vbucket map is present but empty is considered
    /// incomplete and must be dropped by the caller (`spec.md` §4.2).
    pub fn has_usable_vbucket_map(&self) -> bool {
        !self.vbucket_map.is_empty()
    }

    pub fn vbucket_owner(&self, vbucket: usize, replica_index: usize) -> Option<usize> {
        let row = self.vbucket_map.get(vbucket)?;
        let idx = *row.get(replica_index)?;
        if idx < 0 {
            None
        } else {
            Some(idx as usize)
        }
    }

    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawClusterConfig = serde_json::from_str(json)?;
        Ok(ClusterConfig::from_raw(raw, false))
    }

    pub fn from_raw(raw: RawClusterConfig, force: bool) -> Self {
        let nodes = raw
            .nodes_ext
            .into_iter()
            .map(|n| Node {
                hostname: n.hostname,
                kv_port: n.services.kv,
                kv_ssl_port: n.services.kv_ssl,
                mgmt_port: n.services.mgmt,
                mgmt_ssl_port: n.services.mgmt_ssl,
                alt_hostname: n.alternate_addresses.external.as_ref().map(|a| a.hostname.clone()),
                alt_kv_port: n.alternate_addresses.external.as_ref().and_then(|a| a.services.kv),
                alt_kv_ssl_port: n
                    .alternate_addresses
                    .external
                    .as_ref()
                    .and_then(|a| a.services.kv_ssl),
                this_node: n.this_node,
            })
            .collect();
        let vbucket_map = raw.vbucket_server_map.map(|m| m.vbucket_map).unwrap_or_default();
        ClusterConfig { epoch: raw.rev_epoch, rev: raw.rev, nodes, vbucket_map, force }
    }

    /// Builds a minimal placeholder config for a bucket-less session whose
    /// server does not support GCCCP (`spec.md` §4.3.1 step 6).
    pub fn blank() -> Self {
        ClusterConfig { epoch: 0, rev: 0, nodes: Vec::new(), vbucket_map: Vec::new(), force: false }
    }
}

/// Whether `candidate` supersedes `current` per the acceptance rule in
/// `spec.md` §4.2: absent current, `force`, or strictly greater `(epoch, rev)`.
pub fn supersedes(current: Option<&ClusterConfig>, candidate: &ClusterConfig) -> bool {
    match current {
        None => true,
        Some(_) if candidate.force => true,
        Some(current) => candidate.order_key() > current.order_key(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "rev": 5,
            "revEpoch": 1,
            "nodesExt": [
                { "hostname": "node1.example.com", "services": { "kv": 11210 }, "thisNode": true },
                { "hostname": "node2.example.com", "services": { "kv": 11210 } }
            ],
            "vBucketServerMap": {
                "serverList": ["node1.example.com:11210", "node2.example.com:11210"],
                "vBucketMap": [[0, 1], [1, 0]]
            },
            "someFutureField": { "nested": true }
        }"#
    }

    #[test]
    fn parses_and_ignores_unknown_fields() {
        let cfg = ClusterConfig::parse(sample_json()).unwrap();
        assert_eq!(cfg.order_key(), (1, 5));
        assert_eq!(cfg.nodes.len(), 2);
        assert!(cfg.nodes[0].this_node);
        assert_eq!(cfg.vbucket_owner(0, 0), Some(0));
        assert_eq!(cfg.vbucket_owner(1, 0), Some(1));
    }

    #[test]
    fn empty_vbucket_map_is_unusable() {
        let cfg = ClusterConfig { epoch: 1, rev: 1, nodes: vec![], vbucket_map: vec![], force: false };
        assert!(!cfg.has_usable_vbucket_map());
    }

    #[test]
    fn supersedes_requires_strictly_greater_order() {
        let c1 = ClusterConfig { epoch: 1, rev: 5, nodes: vec![], vbucket_map: vec![vec![0]], force: false };
        let c2_same = ClusterConfig { epoch: 1, rev: 5, nodes: vec![], vbucket_map: vec![vec![0]], force: false };
        let c2_newer = ClusterConfig { epoch: 1, rev: 6, nodes: vec![], vbucket_map: vec![vec![0]], force: false };
        assert!(supersedes(None, &c1));
        assert!(!supersedes(Some(&c1), &c2_same));
        assert!(supersedes(Some(&c1), &c2_newer));
        let forced = ClusterConfig { force: true, ..c2_same };
        assert!(supersedes(Some(&c1), &forced));
    }
}
