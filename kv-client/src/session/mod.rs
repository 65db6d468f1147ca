//! Per-node session runtime (C3, `spec.md` §4.3): the operational state
//! machine for one MCBP connection once bootstrap has completed, plus the
//! two-mutex write/outstanding-request discipline from §4.3.2.

pub mod bootstrap;
pub mod collections;
pub mod io;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use kv_protocol::{
    ClientError, ClusterConfig, DataType, ErrorKind, ErrorMap, FeatureSet, Magic, OpCode, Packet,
    Status,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::session::bootstrap::BootstrapOutcome;
use crate::session::collections::CollectionIdCache;
use crate::session::io::{read_one_frame, write_frame, FrameIoError};

/// Bootstrap/lifecycle state of one session (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Resolving,
    Connecting,
    Handshaking,
    Authenticating,
    SelectingBucket,
    Ready,
    Disconnecting,
    Stopped,
    BootstrapFailed,
}

/// Anything the session runtime must surface to its owner (the config
/// tracker) outside the request/response path: a server-pushed topology
/// change, or the socket going away.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ClusterMapChanged { bucket: Option<String>, config: ClusterConfig },
    Closed { endpoint: String },
}

/// A duplex async stream a session can be built over, boxed so the tracker
/// can hold a uniform collection of sessions regardless of the concrete
/// transport (plain TCP vs TLS).
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncDuplex for T {}

pub type BoxedStream = Box<dyn AsyncDuplex>;

type PendingReplies = HashMap<u32, oneshot::Sender<Result<Packet, ClientError>>>;

/// One live connection to one KV node, past bootstrap.
pub struct KvSession {
    endpoint: String,
    bucket: Option<String>,
    state: StdMutex<SessionState>,
    write_half: AsyncMutex<WriteHalf<BoxedStream>>,
    outstanding: AsyncMutex<PendingReplies>,
    opaque_counter: AtomicU32,
    collections: StdMutex<CollectionIdCache>,
    features: FeatureSet,
    error_map: Option<ErrorMap>,
    closed: AtomicBool,
}

impl KvSession {
    /// Wraps an already-bootstrapped stream into a running session: splits
    /// it into read/write halves and spawns the read loop that dispatches
    /// responses to outstanding callers and forwards server pushes to
    /// `events`.
    pub fn spawn(
        stream: BoxedStream,
        outcome: BootstrapOutcome,
        endpoint: String,
        bucket: Option<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<KvSession> {
        let (read_half, write_half) = tokio::io::split(stream);

        let session = Arc::new(KvSession {
            endpoint,
            bucket,
            state: StdMutex::new(SessionState::Ready),
            write_half: AsyncMutex::new(write_half),
            outstanding: AsyncMutex::new(HashMap::new()),
            opaque_counter: AtomicU32::new(0),
            collections: StdMutex::new(CollectionIdCache::new()),
            features: outcome.negotiated_features,
            error_map: outcome.error_map,
            closed: AtomicBool::new(false),
        });

        let reader = session.clone();
        tokio::spawn(async move {
            reader.run_read_loop(read_half, events).await;
        });

        session
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn error_map(&self) -> Option<&ErrorMap> {
        self.error_map.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), SessionState::Ready)
    }

    pub fn collection_id(&self, scope: &str, collection: &str) -> Option<u32> {
        self.collections.lock().unwrap().get(scope, collection)
    }

    pub fn cache_collection_id(&self, scope: &str, collection: &str, uid: u32) {
        self.collections.lock().unwrap().insert(scope, collection, uid);
    }

    pub fn invalidate_collection_id(&self, scope: &str, collection: &str) {
        self.collections.lock().unwrap().invalidate(scope, collection);
    }

    fn next_opaque(&self) -> u32 {
        self.opaque_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `packet` (overwriting its opaque) and awaits the matching
    /// response. The opaque is registered in the outstanding map before the
    /// frame is written, so a response can never race its own registration;
    /// the write lock is released before awaiting the reply so the read loop
    /// is never blocked behind an in-flight send (`spec.md` §4.3.2).
    pub async fn send(&self, mut packet: Packet) -> Result<Packet, ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::new(ErrorKind::RequestCancelled, "session is closed").with_endpoint(&self.endpoint));
        }

        let opaque = self.next_opaque();
        packet.opaque = opaque;
        let (tx, rx) = oneshot::channel();
        self.outstanding.lock().await.insert(opaque, tx);

        let write_result = {
            let mut write_half = self.write_half.lock().await;
            write_frame(&mut *write_half, &packet).await
        };
        if let Err(e) = write_result {
            self.outstanding.lock().await.remove(&opaque);
            return Err(ClientError::new(ErrorKind::UnambiguousTimeout, format!("write failed: {e}")).with_endpoint(&self.endpoint));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::new(ErrorKind::RequestCancelled, "session closed before a response arrived").with_endpoint(&self.endpoint)),
        }
    }

    /// NOOP-based liveness probe (`spec.md` §4.3.6); returns the observed
    /// round-trip latency.
    pub async fn ping(&self) -> Result<Duration, ClientError> {
        let req = Packet {
            magic: Magic::Request,
            opcode: OpCode::Noop,
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
        let start = Instant::now();
        let resp = self.send(req).await?;
        if !resp.status().is_success() {
            return Err(ClientError::new(ErrorKind::ProtocolError, "NOOP returned non-success status").with_endpoint(&self.endpoint));
        }
        Ok(start.elapsed())
    }

    /// Idempotent shutdown: fails every outstanding request with
    /// `RequestCancelled`, shuts the write half down, and marks the session
    /// terminal (`spec.md` §4.3.5).
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock().unwrap() = SessionState::Disconnecting;

        {
            let mut write_half = self.write_half.lock().await;
            let _ = tokio::io::AsyncWriteExt::shutdown(&mut *write_half).await;
        }
        self.fail_all_outstanding(ErrorKind::RequestCancelled, "session closed").await;

        *self.state.lock().unwrap() = SessionState::Stopped;
    }

    async fn fail_all_outstanding(&self, kind: ErrorKind, message: &str) {
        let mut outstanding = self.outstanding.lock().await;
        for (_, tx) in outstanding.drain() {
            let _ = tx.send(Err(ClientError::new(kind, message.to_string()).with_endpoint(&self.endpoint)));
        }
    }

    async fn run_read_loop(self: Arc<Self>, mut read_half: ReadHalf<BoxedStream>, events: mpsc::UnboundedSender<SessionEvent>) {
        let mut buf = Vec::new();
        loop {
            let packet = match read_one_frame(&mut read_half, &mut buf).await {
                Ok(packet) => packet,
                Err(FrameIoError::Eof) => {
                    tracing::debug!(endpoint = %self.endpoint, "session socket closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, "session read loop terminating on error");
                    break;
                }
            };

            self.dispatch(packet, &events).await;
        }

        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = SessionState::Stopped;
        self.fail_all_outstanding(ErrorKind::RequestCancelled, "session connection lost").await;
        let _ = events.send(SessionEvent::Closed { endpoint: self.endpoint.clone() });
    }

    async fn dispatch(&self, packet: Packet, events: &mpsc::UnboundedSender<SessionEvent>) {
        if packet.opcode == OpCode::ClusterMapChangeNotification && packet.magic == Magic::ServerRequest {
            self.handle_cluster_map_push(&packet, events);
            return;
        }

        if !packet.magic.is_response() {
            // Unsolicited server request we don't model (e.g. DCP control);
            // nothing to reply to, nothing to dispatch.
            return;
        }

        // A not-my-vbucket response commonly carries a fresher config in its
        // value; forward it unconditionally so the tracker stays current even
        // if the caller only inspects the error (`spec.md` §4.3.4).
        if packet.status() == Status::NOT_MY_VBUCKET && !packet.value.is_empty() {
            self.handle_cluster_map_push(&packet, events);
        }

        let reply = self.outstanding.lock().await.remove(&packet.opaque);
        if let Some(tx) = reply {
            let _ = tx.send(Ok(packet));
        } else {
            tracing::debug!(endpoint = %self.endpoint, opaque = packet.opaque, "reply for unknown or already-cancelled opaque");
        }
    }

    fn handle_cluster_map_push(&self, packet: &Packet, events: &mpsc::UnboundedSender<SessionEvent>) {
        let Ok(text) = std::str::from_utf8(&packet.value) else { return };
        let Ok(config) = ClusterConfig::parse(text) else { return };
        let _ = events.send(SessionEvent::ClusterMapChanged { bucket: self.bucket.clone(), config });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_protocol::DataType;

    fn outcome() -> BootstrapOutcome {
        BootstrapOutcome {
            negotiated_features: FeatureSet::default_requested(),
            error_map: None,
            config: ClusterConfig::blank(),
        }
    }

    #[tokio::test]
    async fn send_receives_matching_response() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let session = KvSession::spawn(Box::new(client), outcome(), "node1:11210".into(), Some("travel-sample".into()), events_tx);

        let server_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let req = read_one_frame(&mut server, &mut buf).await.unwrap();
            let resp = Packet {
                magic: Magic::Response,
                opcode: req.opcode,
                datatype: DataType::RAW,
                vbucket_or_status: Status::SUCCESS.0,
                opaque: req.opaque,
                cas: 0,
                framing_extras: Vec::new(),
                extras: Vec::new(),
                collection_uid: None,
                key: Vec::new(),
                value: b"pong".to_vec(),
            };
            write_frame(&mut server, &resp).await.unwrap();
        });

        let req = Packet {
            magic: Magic::Request,
            opcode: OpCode::Get,
            datatype: DataType::RAW,
            vbucket_or_status: 0,
            opaque: 0,
            cas: 0,
            framing_extras: Vec::new(),
            extras: Vec::new(),
            collection_uid: None,
            key: b"doc".to_vec(),
            value: Vec::new(),
        };
        let resp = session.send(req).await.unwrap();
        assert_eq!(resp.value, b"pong");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_outstanding() {
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let session = KvSession::spawn(Box::new(client), outcome(), "node1:11210".into(), None, events_tx);

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Stopped);

        let err = session.send(Packet {
            magic: Magic::Request,
            opcode: OpCode::Noop,
            datatype: DataType::RAW,
            vbucket_or_status: 0,
            opaque: 0,
            cas: 0,
            framing_extras: Vec::new(),
            extras: Vec::new(),
            collection_uid: None,
            key: Vec::new(),
            value: Vec::new(),
        }).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestCancelled);
    }

    /// The cluster-map-change push arrives as a real wire frame (magic
    /// `ServerRequest`, opcode byte `0x01`) decoded through the normal read
    /// loop, not a hand-built `Packet` — this is the path that was silently
    /// dropping the notification before `OpCode::from_wire` namespaced it.
    #[tokio::test]
    async fn server_pushed_cluster_map_change_is_decoded_and_forwarded() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _session = KvSession::spawn(Box::new(client), outcome(), "node1:11210".into(), Some("travel-sample".into()), events_tx);

        let config_json = r#"{"rev":1,"revEpoch":1,"nodesExt":[{"hostname":"node1","services":{"kv":11210},"thisNode":true}],"vBucketServerMap":{"serverList":["node1:11210"],"vBucketMap":[[0]]}}"#;
        let push = Packet {
            magic: Magic::ServerRequest,
            opcode: OpCode::ClusterMapChangeNotification,
            datatype: DataType::RAW,
            vbucket_or_status: 0,
            opaque: 0,
            cas: 0,
            framing_extras: Vec::new(),
            extras: Vec::new(),
            collection_uid: None,
            key: b"travel-sample".to_vec(),
            value: config_json.as_bytes().to_vec(),
        };
        write_frame(&mut server, &push).await.unwrap();

        let event = events_rx.recv().await.expect("cluster map change event");
        match event {
            SessionEvent::ClusterMapChanged { bucket, config } => {
                assert_eq!(bucket.as_deref(), Some("travel-sample"));
                assert_eq!(config.order_key(), (1, 1));
            }
            other => panic!("expected ClusterMapChanged, got {other:?}"),
        }
    }
}
