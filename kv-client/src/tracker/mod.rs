//! Cluster-wide configuration tracker (C6, `spec.md` §4.2).
//!
//! Grounded directly in `original_source/core/io/config_tracker.cxx`:
//! bootstrap at least one session, poll GCCCP round-robin over
//! GCCCP-capable sessions, and reconcile the session pool against whichever
//! config a session (bootstrap, push, or poll) last reported as superseding
//! the current one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kv_protocol::{
    supersedes, ClientError, ClusterConfig, DataType, ErrorKind, Magic, NetworkType, OpCode, Packet,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::observability::Observability;
use crate::options::{ClusterOptions, NetworkSelector};
use crate::session::bootstrap::bootstrap;
use crate::session::{BoxedStream, KvSession, SessionEvent};

/// Pluggable transport so this crate never hardcodes a TLS stack: callers
/// that need TLS supply a `Connector` backed by whatever library they use
/// (e.g. `tokio-rustls`), the tracker only knows it gets back a boxed duplex
/// stream.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> std::io::Result<BoxedStream>;
}

/// Plain, non-TLS TCP connector, used unless a caller supplies their own.
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> std::io::Result<BoxedStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

struct TrackedSession {
    session: Arc<KvSession>,
    identity: (String, u16),
    gcccp_capable: bool,
}

struct TrackerState {
    config: Option<ClusterConfig>,
    sessions: Vec<TrackedSession>,
    poll_cursor: usize,
}

pub struct ClusterTracker {
    options: ClusterOptions,
    connector: Arc<dyn Connector>,
    observability: Observability,
    state: Mutex<TrackerState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    closed: AtomicBool,
    config_changed: Notify,
}

impl ClusterTracker {
    pub fn new(options: ClusterOptions, observability: Observability) -> Arc<Self> {
        Self::with_connector(options, observability, Arc::new(TcpConnector))
    }

    pub fn with_connector(options: ClusterOptions, observability: Observability, connector: Arc<dyn Connector>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(ClusterTracker {
            options,
            connector,
            observability,
            state: Mutex::new(TrackerState { config: None, sessions: Vec::new(), poll_cursor: 0 }),
            events_tx,
            closed: AtomicBool::new(false),
            config_changed: Notify::new(),
        });

        let weak = Arc::downgrade(&tracker);
        tokio::spawn(async move {
            ClusterTracker::run_event_loop(weak, events_rx).await;
        });

        tracker
    }

    /// Bootstraps every seed address concurrently-in-sequence (one failure
    /// doesn't abort the others), accepts whichever configs supersede, and
    /// starts the background GCCCP poll loop. Fails only if every seed is
    /// unreachable (`spec.md` §4.2 "at least one session").
    pub async fn bootstrap(self: &Arc<Self>) -> Result<(), ClientError> {
        let mut last_err = None;
        let mut connected_any = false;

        for addr in self.options.seed_addresses.clone() {
            match self.bootstrap_one(&addr).await {
                Ok((session, config)) => {
                    connected_any = true;
                    let identity = split_host_port(&addr);
                    self.state.lock().await.sessions.push(TrackedSession { session, identity, gcccp_capable: true });
                    self.apply_config(config).await;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %addr, error = %e, "seed bootstrap failed");
                    last_err = Some(e);
                }
            }
        }

        if !connected_any {
            return Err(last_err.unwrap_or_else(|| ClientError::new(ErrorKind::NoEndpointsLeft, "no seed addresses reachable")));
        }

        self.spawn_poll_task();
        Ok(())
    }

    pub async fn current_config(&self) -> Option<ClusterConfig> {
        self.state.lock().await.config.clone()
    }

    pub async fn sessions_snapshot(&self) -> Vec<Arc<KvSession>> {
        self.state.lock().await.sessions.iter().map(|s| s.session.clone()).collect()
    }

    /// Resolves the session for `config.nodes[node_index]` under the
    /// currently accepted config, if that node has a live session.
    pub async fn node_session(&self, node_index: usize) -> Option<Arc<KvSession>> {
        let state = self.state.lock().await;
        let config = state.config.as_ref()?;
        let node = config.nodes.get(node_index)?;
        let identity = node.identity(self.options.use_tls, self.network_type())?;
        state.sessions.iter().find(|s| s.identity == identity).map(|s| s.session.clone())
    }

    pub async fn wait_for_config_change(&self) {
        self.config_changed.notified().await;
    }

    /// Idempotent shutdown: closes every tracked session (`spec.md` §4.2).
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions = std::mem::take(&mut self.state.lock().await.sessions);
        for tracked in sessions {
            tracked.session.close().await;
        }
    }

    fn network_type(&self) -> NetworkType {
        match self.options.network {
            NetworkSelector::External => NetworkType::External,
            NetworkSelector::Default | NetworkSelector::Auto => NetworkType::Default,
        }
    }

    async fn bootstrap_one(&self, addr: &str) -> Result<(Arc<KvSession>, ClusterConfig), ClientError> {
        let span = self.observability.tracer.start_span("kv.session.bootstrap", None);
        span.add_tag("endpoint", addr.to_string());
        self.observability.logger.debug(&format!("[tracker] {addr}"), "bootstrapping session");

        let result = async {
            let mut stream = self
                .connector
                .connect(addr)
                .await
                .map_err(|e| ClientError::new(ErrorKind::ResolveFailure, e.to_string()).with_endpoint(addr))?;
            let outcome = bootstrap(&mut stream, &self.options, addr).await?;
            let config = outcome.config.clone();
            let session = KvSession::spawn(stream, outcome, addr.to_string(), self.options.bucket.clone(), self.events_tx.clone());
            Ok((session, config))
        }
        .await;

        if let Err(e) = &result {
            self.observability.logger.warn(&format!("[tracker] {addr}"), &format!("bootstrap failed: {e}"));
        }
        span.end();
        result
    }

    async fn connect_and_add(self: &Arc<Self>, host: String, port: u16) {
        let addr = format!("{host}:{port}");
        match self.bootstrap_one(&addr).await {
            Ok((session, config)) => {
                self.state.lock().await.sessions.push(TrackedSession { session, identity: (host, port), gcccp_capable: true });
                self.apply_config(config).await;
            }
            Err(e) => {
                tracing::warn!(endpoint = %addr, error = %e, "failed to bootstrap node discovered via config update");
            }
        }
    }

    async fn apply_config(self: &Arc<Self>, candidate: ClusterConfig) {
        if !candidate.has_usable_vbucket_map() {
            tracing::debug!("dropping cluster config with an empty vbucket map");
            return;
        }

        let accepted = {
            let mut state = self.state.lock().await;
            if supersedes(state.config.as_ref(), &candidate) {
                tracing::info!(epoch = candidate.epoch, rev = candidate.rev, "accepted new cluster configuration");
                state.config = Some(candidate.clone());
                true
            } else {
                false
            }
        };

        if accepted {
            self.config_changed.notify_waiters();
            self.reconcile_sessions(candidate).await;
        }
    }

    async fn reconcile_sessions(self: &Arc<Self>, config: ClusterConfig) {
        let use_tls = self.options.use_tls;
        let network = self.network_type();
        let wanted: Vec<(String, u16)> = config.nodes.iter().filter_map(|n| n.identity(use_tls, network)).collect();

        let known: Vec<(String, u16)> = self.state.lock().await.sessions.iter().map(|s| s.identity.clone()).collect();
        let (to_add, to_remove) = diff_identities(&known, &wanted);

        for (host, port) in to_add {
            let tracker = Arc::clone(self);
            tokio::spawn(async move {
                tracker.connect_and_add(host, port).await;
            });
        }

        for identity in to_remove {
            self.remove_session_by_identity(&identity).await;
        }
    }

    async fn remove_session_by_identity(&self, identity: &(String, u16)) {
        let removed = {
            let mut state = self.state.lock().await;
            let idx = state.sessions.iter().position(|s| &s.identity == identity);
            idx.map(|i| state.sessions.remove(i))
        };
        if let Some(tracked) = removed {
            tracked.session.close().await;
        }
    }

    async fn remove_session_by_endpoint(&self, endpoint: &str) {
        let removed = {
            let mut state = self.state.lock().await;
            let idx = state.sessions.iter().position(|s| s.session.endpoint() == endpoint);
            idx.map(|i| state.sessions.remove(i))
        };
        if let Some(tracked) = removed {
            tracked.session.close().await;
        }
    }

    async fn poll_once(self: &Arc<Self>) -> Result<(), ClientError> {
        let session = {
            let mut state = self.state.lock().await;
            let n = state.sessions.len();
            if n == 0 {
                return Err(ClientError::new(ErrorKind::NoEndpointsLeft, "no sessions available for config polling"));
            }
            let mut picked = None;
            for _ in 0..n {
                state.poll_cursor = (state.poll_cursor + 1) % n;
                let candidate = &state.sessions[state.poll_cursor];
                if candidate.gcccp_capable && candidate.session.is_ready() {
                    picked = Some(candidate.session.clone());
                    break;
                }
            }
            picked
        };

        let Some(session) = session else {
            return Err(ClientError::new(ErrorKind::NoEndpointsLeft, "no ready GCCCP-capable session"));
        };

        let config = fetch_config_via_session(&session).await?;
        self.apply_config(config).await;
        Ok(())
    }

    fn spawn_poll_task(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        let interval = tracker.options.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if tracker.closed.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = tracker.poll_once().await {
                    tracing::warn!(error = %e, "GCCCP poll failed");
                }
            }
        });
    }

    async fn run_event_loop(weak: std::sync::Weak<ClusterTracker>, mut events_rx: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events_rx.recv().await {
            let Some(tracker) = weak.upgrade() else { break };
            match event {
                SessionEvent::ClusterMapChanged { bucket, config } => {
                    if bucket == tracker.options.bucket {
                        tracker.apply_config(config).await;
                    }
                }
                SessionEvent::Closed { endpoint } => {
                    tracker.remove_session_by_endpoint(&endpoint).await;
                }
            }
        }
    }
}

async fn fetch_config_via_session(session: &Arc<KvSession>) -> Result<ClusterConfig, ClientError> {
    let req = Packet {
        magic: Magic::Request,
        opcode: OpCode::GetClusterConfig,
        datatype: DataType::RAW,
        vbucket_or_status: 0,
        opaque: 0,
        cas: 0,
        framing_extras: Vec::new(),
        extras: Vec::new(),
        collection_uid: None,
        key: Vec::new(),
        value: Vec::new(),
    };
    let resp = session.send(req).await?;
    if !resp.status().is_success() {
        return Err(ClientError::new(ErrorKind::ConfigurationNotAvailable, "GET_CLUSTER_CONFIG failed").with_endpoint(session.endpoint()));
    }
    let text = std::str::from_utf8(&resp.value)
        .map_err(|_| ClientError::new(ErrorKind::ProtocolError, "cluster config is not UTF-8").with_endpoint(session.endpoint()))?;
    ClusterConfig::parse(text)
        .map_err(|e| ClientError::new(ErrorKind::ProtocolError, format!("invalid cluster config JSON: {e}")).with_endpoint(session.endpoint()))
}

fn split_host_port(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
        None => (addr.to_string(), 0),
    }
}

/// Diffs the currently-known node identities against a new config's wanted
/// set, returning `(to_add, to_remove)` (`original_source/core/io/config_tracker.cxx`
/// `diff_nodes`).
fn diff_identities(known: &[(String, u16)], wanted: &[(String, u16)]) -> (Vec<(String, u16)>, Vec<(String, u16)>) {
    let to_add = wanted.iter().filter(|w| !known.contains(w)).cloned().collect();
    let to_remove = known.iter().filter(|k| !wanted.contains(k)).cloned().collect();
    (to_add, to_remove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ClusterOptionsBuilder, Credentials};
    use crate::session::io::{read_one_frame, write_frame};
    use kv_protocol::Status;
    use std::sync::Mutex as StdMutex;

    struct DuplexConnector {
        server_side: StdMutex<Option<tokio::io::DuplexStream>>,
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self, _addr: &str) -> std::io::Result<BoxedStream> {
            let (client, server) = tokio::io::duplex(64 * 1024);
            let taken = self.server_side.lock().unwrap().replace(server);
            drop(taken);
            Ok(Box::new(client))
        }
    }

    fn response(opaque: u32, opcode: OpCode, status: Status, value: Vec<u8>) -> Packet {
        Packet {
            magic: Magic::Response,
            opcode,
            datatype: DataType::RAW,
            vbucket_or_status: status.0,
            opaque,
            cas: 0,
            framing_extras: Vec::new(),
            extras: Vec::new(),
            collection_uid: None,
            key: Vec::new(),
            value,
        }
    }

    /// Drives `ClusterTracker::bootstrap()` end to end against a fake
    /// single-node server that answers the whole bootstrap chain, then
    /// asserts the tracker accepted the resulting config.
    #[tokio::test]
    async fn bootstrap_accepts_first_usable_config() {
        let connector = Arc::new(DuplexConnector { server_side: StdMutex::new(None) });
        let options = ClusterOptionsBuilder::new(
            vec!["node1:11210".into()],
            Credentials { username: "alice".into(), password: "hunter2".into() },
        )
        .build()
        .unwrap();

        let tracker = ClusterTracker::with_connector(options, Observability::default(), connector.clone());

        let bootstrap_fut = tracker.bootstrap();
        tokio::pin!(bootstrap_fut);

        // Give `connect()` a chance to run so the duplex pair exists before we grab it.
        tokio::task::yield_now().await;
        let mut server = connector.server_side.lock().unwrap().take().expect("connector should have been invoked");

        let server_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let hello = read_one_frame(&mut server, &mut buf).await.unwrap();
            write_frame(&mut server, &response(hello.opaque, OpCode::Hello, Status::SUCCESS, Vec::new())).await.unwrap();

            let list = read_one_frame(&mut server, &mut buf).await.unwrap();
            write_frame(&mut server, &response(list.opaque, OpCode::SaslListMechs, Status::SUCCESS, b"PLAIN".to_vec())).await.unwrap();

            let auth = read_one_frame(&mut server, &mut buf).await.unwrap();
            write_frame(&mut server, &response(auth.opaque, OpCode::SaslAuth, Status::SUCCESS, Vec::new())).await.unwrap();

            let config_req = read_one_frame(&mut server, &mut buf).await.unwrap();
            let config_json = r#"{"rev":2,"revEpoch":1,"nodesExt":[{"hostname":"node1","services":{"kv":11210},"thisNode":true}],"vBucketServerMap":{"serverList":["node1:11210"],"vBucketMap":[[0]]}}"#;
            write_frame(&mut server, &response(config_req.opaque, OpCode::GetClusterConfig, Status::SUCCESS, config_json.as_bytes().to_vec())).await.unwrap();
        });

        bootstrap_fut.await.unwrap();
        server_task.await.unwrap();

        let config = tracker.current_config().await.unwrap();
        assert_eq!(config.order_key(), (1, 2));
        assert_eq!(tracker.sessions_snapshot().await.len(), 1);

        tracker.close().await;
    }

    #[test]
    fn split_host_port_parses_trailing_port() {
        assert_eq!(split_host_port("node1.example.com:11210"), ("node1.example.com".to_string(), 11210));
        assert_eq!(split_host_port("no-port"), ("no-port".to_string(), 0));
    }

    #[test]
    fn diff_identities_finds_added_and_removed_nodes() {
        let known = vec![("a".to_string(), 1), ("b".to_string(), 2)];
        let wanted = vec![("b".to_string(), 2), ("c".to_string(), 3)];
        let (added, removed) = diff_identities(&known, &wanted);
        assert_eq!(added, vec![("c".to_string(), 3)]);
        assert_eq!(removed, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn diff_identities_is_empty_when_unchanged() {
        let known = vec![("a".to_string(), 1)];
        let (added, removed) = diff_identities(&known, &known.clone());
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }
}
