//! Per-operation command runtime (C7, `spec.md` §4.6): dispatch selection,
//! collection resolution, durability encoding, response classification, and
//! cancellation-on-deadline.

pub mod dispatcher;

use std::sync::Arc;
use std::time::{Duration, Instant};

use kv_protocol::{
    map_status_code, ClientError, DataType, DurabilityLevel, ErrorKind, ErrorMapAttribute, FramingExtra,
    HelloFeature, Magic, OpCode, Packet, Status,
};

use crate::observability::Observability;
use crate::retry::{decide, delay_within_deadline, BackoffPolicy, DeadlineOutcome, RetryAction, RetryReason};
use crate::session::collections::CollectionIdCache;
use crate::session::KvSession;
use crate::tracker::ClusterTracker;

const UNKNOWN_COLLECTION_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub replica_index: usize,
    pub scope: String,
    pub collection: String,
    pub use_collections: bool,
    pub durability: DurabilityLevel,
    pub timeout: Duration,
    pub cas: u64,
}

impl Default for CommandOptions {
    fn default() -> Self {
        CommandOptions {
            replica_index: 0,
            scope: "_default".to_string(),
            collection: "_default".to_string(),
            use_collections: true,
            durability: DurabilityLevel::None,
            timeout: Duration::from_millis(2500),
            cas: 0,
        }
    }
}

enum Outcome {
    Retry(RetryReason),
    Terminal(ClientError),
}

/// Raises `requested` to `floor` when a durability level above `none` is in
/// play (`spec.md` §4.6 step 1).
fn effective_timeout(requested: Duration, durability: DurabilityLevel, floor: Duration) -> Duration {
    if durability.is_none() {
        requested
    } else {
        requested.max(floor)
    }
}

pub struct CommandRuntime {
    tracker: Arc<ClusterTracker>,
    observability: Observability,
    backoff: BackoffPolicy,
    durability_timeout_floor: Duration,
}

impl CommandRuntime {
    pub fn new(tracker: Arc<ClusterTracker>, observability: Observability, durability_timeout_floor: Duration) -> Self {
        CommandRuntime { tracker, observability, backoff: BackoffPolicy::default(), durability_timeout_floor }
    }

    pub async fn get(&self, key: &[u8], options: CommandOptions) -> Result<Packet, ClientError> {
        self.execute(OpCode::Get, key, Vec::new(), Vec::new(), options).await
    }

    pub async fn upsert(&self, key: &[u8], value: Vec<u8>, options: CommandOptions) -> Result<Packet, ClientError> {
        // Extras: 4-byte flags + 4-byte expiry, both zero for a plain upsert.
        self.execute(OpCode::Set, key, vec![0u8; 8], value, options).await
    }

    pub async fn remove(&self, key: &[u8], options: CommandOptions) -> Result<Packet, ClientError> {
        self.execute(OpCode::Delete, key, Vec::new(), Vec::new(), options).await
    }

    /// Drives the full lifecycle of one operation: dispatch, collection
    /// resolution, encode/send, classify, and retry-until-deadline
    /// (`spec.md` §4.6).
    pub async fn execute(&self, opcode: OpCode, key: &[u8], extras: Vec<u8>, value: Vec<u8>, options: CommandOptions) -> Result<Packet, ClientError> {
        let span = self.observability.tracer.start_span("kv.command", None);
        span.add_tag("opcode", format!("{opcode:?}"));

        let effective = effective_timeout(options.timeout, options.durability, self.durability_timeout_floor);
        let deadline = Instant::now() + effective;

        let mut attempt: u32 = 0;
        let result = loop {
            attempt += 1;
            match self.try_once(opcode, key, &extras, &value, &options, deadline).await {
                Ok(packet) => break Ok(packet),
                Err(Outcome::Terminal(e)) => break Err(e),
                Err(Outcome::Retry(reason)) => {
                    match decide(opcode, reason) {
                        RetryAction::DoNotRetry => {
                            break Err(ClientError::new(
                                terminal_kind_for(opcode, reason),
                                format!("not retrying after {reason:?}"),
                            ))
                        }
                        RetryAction::RetrySameNode | RetryAction::RetryOtherNode => {
                            let remaining = deadline.saturating_duration_since(Instant::now());
                            let backoff = if reason == RetryReason::KvCollectionOutdated {
                                UNKNOWN_COLLECTION_BACKOFF
                            } else {
                                match delay_within_deadline(&self.backoff, attempt, remaining) {
                                    DeadlineOutcome::Delay(d) => d,
                                    DeadlineOutcome::ExceedsDeadline => {
                                        break Err(ClientError::new(
                                            deadline_kind(opcode),
                                            format!("exceeded deadline retrying after {reason:?}"),
                                        ))
                                    }
                                }
                            };
                            if backoff > remaining {
                                break Err(ClientError::new(deadline_kind(opcode), format!("exceeded deadline retrying after {reason:?}")));
                            }
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
        };

        span.end();
        result
    }

    async fn try_once(
        &self,
        opcode: OpCode,
        key: &[u8],
        extras: &[u8],
        value: &[u8],
        options: &CommandOptions,
        deadline: Instant,
    ) -> Result<Packet, Outcome> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Outcome::Terminal(ClientError::new(deadline_kind(opcode), "deadline reached before dispatch")));
        }

        let session = dispatcher::dispatch(&self.tracker, key, options.replica_index)
            .await
            .map_err(|e| Outcome::Terminal(dispatch_error(e)))?;

        let collection_uid = if options.use_collections {
            Some(self.resolve_collection(&session, &options.scope, &options.collection).await.map_err(Outcome::Terminal)?)
        } else {
            None
        };

        let mut framing_extras = Vec::new();
        if !options.durability.is_none() {
            let timeout_ms = ((remaining.as_millis() as f64 * 0.9).max(1.0)) as u16;
            framing_extras.push(FramingExtra::Durability { level: options.durability, timeout_ms: Some(timeout_ms) });
        }

        let packet = Packet {
            magic: Magic::Request,
            opcode,
            datatype: DataType::RAW,
            vbucket_or_status: 0,
            opaque: 0,
            cas: options.cas,
            framing_extras,
            extras: extras.to_vec(),
            collection_uid,
            key: key.to_vec(),
            value: value.to_vec(),
        };

        let resp = match tokio::time::timeout(remaining, session.send(packet)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(Outcome::Terminal(e)),
            Err(_elapsed) => return Err(Outcome::Terminal(ClientError::new(deadline_kind(opcode), "command timed out").with_endpoint(session.endpoint()))),
        };

        self.classify(resp, opcode, &session, options)
    }

    async fn resolve_collection(&self, session: &Arc<KvSession>, scope: &str, collection: &str) -> Result<u32, ClientError> {
        if CollectionIdCache::is_default(scope, collection) {
            return Ok(0);
        }
        if !session.features().contains(HelloFeature::Collections) {
            return Err(ClientError::new(ErrorKind::UnsupportedOperation, "session did not negotiate collections").with_endpoint(session.endpoint()));
        }
        if let Some(uid) = session.collection_id(scope, collection) {
            return Ok(uid);
        }

        let path = format!("{scope}.{collection}");
        let req = Packet {
            magic: Magic::Request,
            opcode: OpCode::GetCollectionId,
            datatype: DataType::RAW,
            vbucket_or_status: 0,
            opaque: 0,
            cas: 0,
            framing_extras: Vec::new(),
            extras: Vec::new(),
            collection_uid: None,
            key: path.into_bytes(),
            value: Vec::new(),
        };
        let resp = session.send(req).await?;
        if !resp.status().is_success() {
            let kind = map_status_code(OpCode::GetCollectionId, resp.status()).unwrap_or(ErrorKind::ProtocolError);
            return Err(ClientError::new(kind, "GET_COLLECTION_ID failed").with_endpoint(session.endpoint()));
        }
        // Response extras: 8-byte manifest uid followed by the 4-byte collection uid.
        if resp.extras.len() < 12 {
            return Err(ClientError::new(ErrorKind::ProtocolError, "short GET_COLLECTION_ID response").with_endpoint(session.endpoint()));
        }
        let uid = u32::from_be_bytes(resp.extras[8..12].try_into().expect("slice of length 4"));
        session.cache_collection_id(scope, collection, uid);
        Ok(uid)
    }

    fn classify(&self, packet: Packet, opcode: OpCode, session: &Arc<KvSession>, options: &CommandOptions) -> Result<Packet, Outcome> {
        let status = packet.status();
        if status.is_success() {
            return Ok(packet);
        }

        match status {
            Status::NOT_MY_VBUCKET => return Err(Outcome::Retry(RetryReason::KvNotMyVbucket)),
            Status::UNKNOWN_COLLECTION => {
                session.invalidate_collection_id(&options.scope, &options.collection);
                return Err(Outcome::Retry(RetryReason::KvCollectionOutdated));
            }
            Status::LOCKED => return Err(Outcome::Retry(RetryReason::KvLocked)),
            Status::TEMPORARY_FAILURE | Status::BUSY | Status::NO_MEMORY | Status::NOT_INITIALIZED => {
                return Err(Outcome::Retry(RetryReason::KvTemporaryFailure))
            }
            Status::SYNC_WRITE_IN_PROGRESS => return Err(Outcome::Retry(RetryReason::KvSyncWriteInProgress)),
            Status::SYNC_WRITE_RE_COMMIT_IN_PROGRESS => return Err(Outcome::Retry(RetryReason::KvSyncWriteReCommitInProgress)),
            _ => {}
        }

        if let Some(entry) = session.error_map().and_then(|m| m.get(status.0)) {
            if entry.has(ErrorMapAttribute::RetryNow) {
                return Err(Outcome::Retry(RetryReason::ErrorMapRetryNow));
            }
            if entry.has(ErrorMapAttribute::RetryLater) {
                return Err(Outcome::Retry(RetryReason::ErrorMapRetryLater));
            }
        }

        let kind = map_status_code(opcode, status).unwrap_or(ErrorKind::ProtocolError);
        Err(Outcome::Terminal(ClientError::new(kind, format!("server returned status {:#06x}", status.0)).with_endpoint(session.endpoint())))
    }
}

fn deadline_kind(opcode: OpCode) -> ErrorKind {
    if opcode.is_idempotent() {
        ErrorKind::UnambiguousTimeout
    } else {
        ErrorKind::AmbiguousTimeout
    }
}

fn terminal_kind_for(opcode: OpCode, reason: RetryReason) -> ErrorKind {
    match reason {
        RetryReason::KvLocked if matches!(opcode, OpCode::Unlock) => ErrorKind::CasMismatch,
        RetryReason::SocketClosedWhileInFlight => ErrorKind::AmbiguousTimeout,
        _ => ErrorKind::ProtocolError,
    }
}

fn dispatch_error(e: dispatcher::DispatchError) -> ClientError {
    match e {
        dispatcher::DispatchError::NoConfigurationYet => ClientError::new(ErrorKind::ConfigurationNotAvailable, "no cluster configuration available yet"),
        dispatcher::DispatchError::VbucketUnowned => ClientError::new(ErrorKind::ConfigurationNotAvailable, "target vbucket has no owner in the current configuration"),
        dispatcher::DispatchError::NoSessionForNode => ClientError::new(ErrorKind::NoEndpointsLeft, "owning node has no live session"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durability_raises_timeout_to_floor() {
        let floor = Duration::from_millis(1500);
        assert_eq!(effective_timeout(Duration::from_millis(200), DurabilityLevel::Majority, floor), floor);
        assert_eq!(effective_timeout(Duration::from_millis(5000), DurabilityLevel::Majority, floor), Duration::from_millis(5000));
    }

    #[test]
    fn no_durability_leaves_timeout_untouched() {
        let floor = Duration::from_millis(1500);
        assert_eq!(effective_timeout(Duration::from_millis(200), DurabilityLevel::None, floor), Duration::from_millis(200));
    }

    #[test]
    fn deadline_kind_follows_idempotence() {
        assert_eq!(deadline_kind(OpCode::Get), ErrorKind::UnambiguousTimeout);
        assert_eq!(deadline_kind(OpCode::Set), ErrorKind::AmbiguousTimeout);
    }
}
