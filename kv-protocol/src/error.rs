//! Error kinds (`spec.md` §7). These are classifications, not exceptions:
//! every server status and transport failure maps onto exactly one of these,
//! and the retry orchestrator (in `kv-client`) branches on the kind, never on
//! a message string.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    // --- Timeout ---
    #[error("operation timed out before reaching the server, or is safe to retry")]
    UnambiguousTimeout,
    #[error("operation timed out after being dispatched and is not known to be idempotent")]
    AmbiguousTimeout,

    // --- KV domain ---
    #[error("document not found")]
    DocumentNotFound,
    #[error("document already exists")]
    DocumentExists,
    #[error("document is locked")]
    DocumentLocked,
    #[error("document is not locked")]
    DocumentNotLocked,
    #[error("CAS mismatch")]
    CasMismatch,
    #[error("value too large")]
    ValueTooLarge,
    #[error("durability requirement cannot be satisfied")]
    DurabilityImpossible,
    #[error("durable write outcome is ambiguous")]
    DurabilityAmbiguous,
    #[error("requested durability level is not available")]
    DurabilityLevelNotAvailable,
    #[error("a durable write is already in progress for this document")]
    DurableWriteInProgress,
    #[error("a durable write re-commit is already in progress for this document")]
    DurableWriteReCommitInProgress,
    #[error("subdoc path not found")]
    PathNotFound,
    #[error("subdoc path already exists")]
    PathExists,
    #[error("subdoc path does not match document structure")]
    PathMismatch,
    #[error("subdoc path syntax is invalid")]
    PathInvalid,
    #[error("subdoc path is too long")]
    PathTooBig,
    #[error("document is too deep for subdoc operations")]
    PathTooDeep,
    #[error("value is invalid for the target path")]
    ValueInvalid,
    #[error("value nesting is too deep")]
    ValueTooDeep,
    #[error("document is not valid JSON")]
    DocumentNotJson,
    #[error("numeric value too big for increment/decrement")]
    NumberTooBig,
    #[error("increment/decrement delta is invalid")]
    DeltaInvalid,
    #[error("xattr key-flag combination is invalid")]
    XattrInvalidKeyCombo,
    #[error("xattr macro is unknown")]
    XattrUnknownMacro,
    #[error("xattr virtual attribute is unknown")]
    XattrUnknownVirtualAttribute,
    #[error("xattr virtual attribute cannot be modified")]
    XattrCannotModifyVirtualAttribute,
    #[error("cannot revive a document that is still alive")]
    CannotReviveLivingDocument,
    #[error("mutation token is outdated")]
    MutationTokenOutdated,

    // --- Cluster ---
    #[error("bucket not found")]
    BucketNotFound,
    #[error("scope not found")]
    ScopeNotFound,
    #[error("collection not found")]
    CollectionNotFound,
    #[error("authentication failed")]
    AuthenticationFailure,
    #[error("temporary failure, safe to retry")]
    TemporaryFailure,
    #[error("request rate limited")]
    RateLimited,
    #[error("quota limited")]
    QuotaLimited,
    #[error("operation not supported by this session/server")]
    UnsupportedOperation,
    #[error("internal server failure")]
    InternalServerFailure,
    #[error("cluster configuration not yet available")]
    ConfigurationNotAvailable,

    // --- Network ---
    #[error("TLS/transport handshake failed")]
    HandshakeFailure,
    #[error("protocol framing violation")]
    ProtocolError,
    #[error("no endpoints left to try")]
    NoEndpointsLeft,
    #[error("DNS resolution failed")]
    ResolveFailure,
    #[error("cluster handle is closed")]
    ClusterClosed,

    // --- Cancellation ---
    #[error("request was cancelled")]
    RequestCancelled,
}

impl ErrorKind {
    /// Whether the server (not the transport) produced this classification;
    /// used by the command runtime to decide whether a response body exists
    /// to inspect further (e.g. an embedded not-my-vbucket config).
    pub const fn is_server_status(self) -> bool {
        !matches!(
            self,
            ErrorKind::UnambiguousTimeout
                | ErrorKind::AmbiguousTimeout
                | ErrorKind::HandshakeFailure
                | ErrorKind::ProtocolError
                | ErrorKind::NoEndpointsLeft
                | ErrorKind::ResolveFailure
                | ErrorKind::ClusterClosed
                | ErrorKind::RequestCancelled
        )
    }
}

/// A user-visible error: kind, one-line message, and the last-known endpoint
/// where relevant (`spec.md` §7, propagation policy).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}{}", .endpoint.as_ref().map(|e| format!(" ({e})")).unwrap_or_default())]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
    pub endpoint: Option<String>,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), endpoint: None }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}
