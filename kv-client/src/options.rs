//! Cluster-level configuration (`spec.md` §2 ambient "Configuration").
//!
//! Mirrors the teacher's `KeeperConfig::from_cli_and_deployment`
//! (`keeper-rs/src/config.rs`): a plain struct assembled by a fallible
//! constructor that validates invariants and clamps out-of-range values with
//! a `tracing::warn!` rather than silently accepting them.

use kv_protocol::FeatureSet;
use std::time::Duration;

use crate::sasl::SaslMechanism;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSelector {
    Auto,
    Default,
    External,
}

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub seed_addresses: Vec<String>,
    pub credentials: Credentials,
    pub bucket: Option<String>,
    pub use_tls: bool,
    pub network: NetworkSelector,
    pub user_agent: String,
    pub requested_features: FeatureSet,
    pub sasl_mechanisms: Option<Vec<SaslMechanism>>,

    pub bootstrap_timeout: Duration,
    pub connect_timeout: Duration,
    pub config_poll_interval: Duration,
    pub config_poll_floor: Duration,
    pub default_operation_timeout: Duration,
    pub durability_timeout_floor: Duration,

    pub background_bootstrap: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("at least one seed address is required")]
    NoSeedAddresses,
    #[error("user agent must be 250 characters or fewer, got {0}")]
    UserAgentTooLong(usize),
}

pub struct ClusterOptionsBuilder {
    seed_addresses: Vec<String>,
    credentials: Credentials,
    bucket: Option<String>,
    use_tls: bool,
    network: NetworkSelector,
    user_agent: String,
    sasl_mechanisms: Option<Vec<SaslMechanism>>,

    bootstrap_timeout: Duration,
    connect_timeout: Duration,
    config_poll_interval: Duration,
    config_poll_floor: Duration,
    default_operation_timeout: Duration,
    durability_timeout_floor: Duration,
    background_bootstrap: bool,
}

impl ClusterOptionsBuilder {
    pub fn new(seed_addresses: Vec<String>, credentials: Credentials) -> Self {
        ClusterOptionsBuilder {
            seed_addresses,
            credentials,
            bucket: None,
            use_tls: false,
            network: NetworkSelector::Auto,
            user_agent: "kv-client/0.1".to_string(),
            sasl_mechanisms: None,
            bootstrap_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            config_poll_interval: Duration::from_millis(2500),
            config_poll_floor: Duration::from_millis(50),
            default_operation_timeout: Duration::from_millis(2500),
            durability_timeout_floor: Duration::from_millis(1500),
            background_bootstrap: false,
        }
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn network(mut self, network: NetworkSelector) -> Self {
        self.network = network;
        self
    }

    pub fn sasl_mechanisms(mut self, mechanisms: Vec<SaslMechanism>) -> Self {
        self.sasl_mechanisms = Some(mechanisms);
        self
    }

    pub fn bootstrap_timeout(mut self, d: Duration) -> Self {
        self.bootstrap_timeout = d;
        self
    }

    pub fn config_poll_interval(mut self, d: Duration) -> Self {
        self.config_poll_interval = d;
        self
    }

    pub fn background_bootstrap(mut self, enabled: bool) -> Self {
        self.background_bootstrap = enabled;
        self
    }

    pub fn build(self) -> Result<ClusterOptions, OptionsError> {
        if self.seed_addresses.is_empty() {
            return Err(OptionsError::NoSeedAddresses);
        }
        if self.user_agent.len() > 250 {
            return Err(OptionsError::UserAgentTooLong(self.user_agent.len()));
        }

        // GCCCP heartbeat is clamped to the floor, mirroring the teacher's
        // clamp-and-warn pattern for out-of-range durations.
        let config_poll_interval = if self.config_poll_interval < self.config_poll_floor {
            tracing::warn!(
                configured_ms = self.config_poll_interval.as_millis() as u64,
                floor_ms = self.config_poll_floor.as_millis() as u64,
                "config poll interval below floor; clamping"
            );
            self.config_poll_floor
        } else {
            self.config_poll_interval
        };

        Ok(ClusterOptions {
            seed_addresses: self.seed_addresses,
            credentials: self.credentials,
            bucket: self.bucket,
            use_tls: self.use_tls,
            network: self.network,
            user_agent: self.user_agent,
            requested_features: FeatureSet::default_requested(),
            sasl_mechanisms: self.sasl_mechanisms,
            bootstrap_timeout: self.bootstrap_timeout,
            connect_timeout: self.connect_timeout,
            config_poll_interval,
            config_poll_floor: self.config_poll_floor,
            default_operation_timeout: self.default_operation_timeout,
            durability_timeout_floor: self.durability_timeout_floor,
            background_bootstrap: self.background_bootstrap,
        })
    }
}

impl ClusterOptions {
    /// The effective SASL mechanism list for this session, honouring a
    /// user override and otherwise falling back to TLS-dependent defaults
    /// (`spec.md` §4.3.1 step 3).
    pub fn effective_sasl_mechanisms(&self) -> Vec<SaslMechanism> {
        self.sasl_mechanisms.clone().unwrap_or_else(|| SaslMechanism::default_order(self.use_tls))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config_poll_interval.max(self.config_poll_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials { username: "alice".into(), password: "hunter2".into() }
    }

    #[test]
    fn rejects_empty_seed_list() {
        let err = ClusterOptionsBuilder::new(vec![], creds()).build().unwrap_err();
        assert!(matches!(err, OptionsError::NoSeedAddresses));
    }

    #[test]
    fn clamps_poll_interval_below_floor() {
        let opts = ClusterOptionsBuilder::new(vec!["node1:11210".into()], creds())
            .config_poll_interval(Duration::from_millis(1))
            .build()
            .unwrap();
        assert_eq!(opts.config_poll_interval, opts.config_poll_floor);
    }

    #[test]
    fn effective_mechanisms_follow_tls_default_when_unset() {
        let opts = ClusterOptionsBuilder::new(vec!["node1:11210".into()], creds()).use_tls(true).build().unwrap();
        assert_eq!(opts.effective_sasl_mechanisms(), vec![SaslMechanism::Plain]);
    }
}
