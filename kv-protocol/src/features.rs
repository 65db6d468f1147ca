//! HELLO feature negotiation (`spec.md` §3 "Hello features").
//!
//! Negotiation is data-driven per the spec's open question in `spec.md` §9:
//! the client always sends its full requested set and records whatever
//! subset the server echoes back, rather than hard-coding compatibility
//! rules per server version.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelloFeature {
    TcpNodelay,
    Xattr,
    Xerror,
    SelectBucket,
    Json,
    Duplex,
    AltRequestSupport,
    Tracing,
    SyncReplication,
    Collections,
    Snappy,
    MutationSeqno,
    UnorderedExecution,
    ClustermapChangeNotification,
    DeduplicateNotMyVbucketClustermap,
    PreserveTtl,
    SubdocCreateAsDeleted,
    SubdocReplaceBodyWithXattr,
    SubdocReplicaRead,
    Unknown(u16),
}

impl HelloFeature {
    pub const fn code(self) -> u16 {
        match self {
            HelloFeature::TcpNodelay => 0x0003,
            HelloFeature::MutationSeqno => 0x0004,
            HelloFeature::Xattr => 0x0006,
            HelloFeature::Xerror => 0x0007,
            HelloFeature::SelectBucket => 0x0008,
            HelloFeature::Snappy => 0x000a,
            HelloFeature::Json => 0x000b,
            HelloFeature::Duplex => 0x000c,
            HelloFeature::ClustermapChangeNotification => 0x000d,
            HelloFeature::UnorderedExecution => 0x000e,
            HelloFeature::Tracing => 0x000f,
            HelloFeature::AltRequestSupport => 0x0010,
            HelloFeature::SyncReplication => 0x0011,
            HelloFeature::Collections => 0x0012,
            HelloFeature::PreserveTtl => 0x0014,
            HelloFeature::SubdocCreateAsDeleted => 0x0017,
            HelloFeature::SubdocReplaceBodyWithXattr => 0x0019,
            HelloFeature::SubdocReplicaRead => 0x001e,
            HelloFeature::DeduplicateNotMyVbucketClustermap => 0x0016,
            HelloFeature::Unknown(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            0x0003 => HelloFeature::TcpNodelay,
            0x0004 => HelloFeature::MutationSeqno,
            0x0006 => HelloFeature::Xattr,
            0x0007 => HelloFeature::Xerror,
            0x0008 => HelloFeature::SelectBucket,
            0x000a => HelloFeature::Snappy,
            0x000b => HelloFeature::Json,
            0x000c => HelloFeature::Duplex,
            0x000d => HelloFeature::ClustermapChangeNotification,
            0x000e => HelloFeature::UnorderedExecution,
            0x000f => HelloFeature::Tracing,
            0x0010 => HelloFeature::AltRequestSupport,
            0x0011 => HelloFeature::SyncReplication,
            0x0012 => HelloFeature::Collections,
            0x0014 => HelloFeature::PreserveTtl,
            0x0016 => HelloFeature::DeduplicateNotMyVbucketClustermap,
            0x0017 => HelloFeature::SubdocCreateAsDeleted,
            0x0019 => HelloFeature::SubdocReplaceBodyWithXattr,
            0x001e => HelloFeature::SubdocReplicaRead,
            other => HelloFeature::Unknown(other),
        }
    }
}

/// The feature set the client requests and, after HELLO completes, the
/// subset the server actually granted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet(pub Vec<HelloFeature>);

impl FeatureSet {
    /// The feature set this core always requests. Individual callers may
    /// trim it (e.g. omit `SyncReplication`), but never add opaque ones —
    /// unknown requested codes would defeat forward-compatible negotiation.
    pub fn default_requested() -> Self {
        FeatureSet(vec![
            HelloFeature::TcpNodelay,
            HelloFeature::Xattr,
            HelloFeature::Xerror,
            HelloFeature::SelectBucket,
            HelloFeature::Json,
            HelloFeature::Duplex,
            HelloFeature::AltRequestSupport,
            HelloFeature::Tracing,
            HelloFeature::SyncReplication,
            HelloFeature::Collections,
            HelloFeature::Snappy,
            HelloFeature::MutationSeqno,
            HelloFeature::UnorderedExecution,
            HelloFeature::ClustermapChangeNotification,
            HelloFeature::DeduplicateNotMyVbucketClustermap,
            HelloFeature::PreserveTtl,
        ])
    }

    pub fn contains(&self, feature: HelloFeature) -> bool {
        self.0.iter().any(|f| f.code() == feature.code())
    }

    pub fn to_codes(&self) -> Vec<u16> {
        self.0.iter().map(|f| f.code()).collect()
    }

    pub fn from_codes(codes: &[u16]) -> Self {
        FeatureSet(codes.iter().copied().map(HelloFeature::from_code).collect())
    }
}
