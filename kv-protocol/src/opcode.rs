//! Client opcodes. Covers every opcode `spec.md` §6.1 requires the core to
//! implement, plus a handful the original C++ client models purely as data
//! (`original_source/core/protocol/client_opcode.hxx`) for forward-compatible
//! decoding even though the command runtime never issues them.

use crate::magic::Magic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Increment,
    Decrement,
    Append,
    Prepend,
    Noop,
    Version,
    Stat,
    Touch,
    GetAndTouch,
    GetAndLock,
    Unlock,
    GetReplica,
    ObserveSeqno,
    GetMeta,
    Hello,
    SaslListMechs,
    SaslAuth,
    SaslStep,
    SelectBucket,
    GetErrorMap,
    GetClusterConfig,
    GetCollectionId,
    SubdocMultiLookup,
    SubdocMultiMutation,
    ClusterMapChangeNotification,
    /// Any opcode not named above, carried verbatim for round-tripping.
    Unknown(u8),
}

impl OpCode {
    pub const fn byte(self) -> u8 {
        match self {
            OpCode::Get => 0x00,
            OpCode::Set => 0x01,
            OpCode::Add => 0x02,
            OpCode::Replace => 0x03,
            OpCode::Delete => 0x04,
            OpCode::Increment => 0x05,
            OpCode::Decrement => 0x06,
            OpCode::Append => 0x0e,
            OpCode::Prepend => 0x0f,
            OpCode::Noop => 0x0a,
            OpCode::Version => 0x0b,
            OpCode::Stat => 0x10,
            OpCode::Touch => 0x1c,
            OpCode::GetAndTouch => 0x1d,
            OpCode::GetAndLock => 0x94,
            OpCode::Unlock => 0x95,
            OpCode::GetReplica => 0x83,
            OpCode::ObserveSeqno => 0x91,
            OpCode::GetMeta => 0xa0,
            OpCode::Hello => 0x1f,
            OpCode::SaslListMechs => 0x20,
            OpCode::SaslAuth => 0x21,
            OpCode::SaslStep => 0x22,
            OpCode::SelectBucket => 0x89,
            OpCode::GetErrorMap => 0xfe,
            OpCode::GetClusterConfig => 0xb5,
            OpCode::GetCollectionId => 0xbb,
            OpCode::SubdocMultiLookup => 0xd0,
            OpCode::SubdocMultiMutation => 0xd1,
            OpCode::ClusterMapChangeNotification => 0x01,
            OpCode::Unknown(b) => b,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => OpCode::Get,
            0x01 => OpCode::Set,
            0x02 => OpCode::Add,
            0x03 => OpCode::Replace,
            0x04 => OpCode::Delete,
            0x05 => OpCode::Increment,
            0x06 => OpCode::Decrement,
            0x0e => OpCode::Append,
            0x0f => OpCode::Prepend,
            0x0a => OpCode::Noop,
            0x0b => OpCode::Version,
            0x10 => OpCode::Stat,
            0x1c => OpCode::Touch,
            0x1d => OpCode::GetAndTouch,
            0x94 => OpCode::GetAndLock,
            0x95 => OpCode::Unlock,
            0x83 => OpCode::GetReplica,
            0x91 => OpCode::ObserveSeqno,
            0xa0 => OpCode::GetMeta,
            0x1f => OpCode::Hello,
            0x20 => OpCode::SaslListMechs,
            0x21 => OpCode::SaslAuth,
            0x22 => OpCode::SaslStep,
            0x89 => OpCode::SelectBucket,
            0xfe => OpCode::GetErrorMap,
            0xb5 => OpCode::GetClusterConfig,
            0xbb => OpCode::GetCollectionId,
            0xd0 => OpCode::SubdocMultiLookup,
            0xd1 => OpCode::SubdocMultiMutation,
            other => OpCode::Unknown(other),
        }
    }

    /// Resolves the opcode byte in the namespace implied by `magic`: server
    /// requests/responses (`original_source/couchbase/protocol/server_opcode.hxx`)
    /// and client requests/responses share the same byte range with
    /// different meanings (server opcode `0x01` is the cluster-map-change
    /// push, not `Set`). Everything that isn't a recognised server opcode
    /// falls back to the client namespace via `from_byte`.
    pub fn from_wire(byte: u8, magic: Magic) -> Self {
        if matches!(magic, Magic::ServerRequest | Magic::ServerResponse) && byte == 0x01 {
            return OpCode::ClusterMapChangeNotification;
        }
        Self::from_byte(byte)
    }

    /// Whether a retry of this opcode can never double-apply a side effect,
    /// i.e. it is safe to retry blindly once already on the wire (`spec.md`
    /// §4.4 / §8 "Idempotence tag honoured").
    pub const fn is_idempotent(self) -> bool {
        matches!(
            self,
            OpCode::Get
                | OpCode::GetReplica
                | OpCode::GetMeta
                | OpCode::GetAndTouch
                | OpCode::ObserveSeqno
                | OpCode::Noop
                | OpCode::GetClusterConfig
                | OpCode::GetErrorMap
                | OpCode::GetCollectionId
                | OpCode::SubdocMultiLookup
                | OpCode::Unlock
        )
    }
}
