//! Server status code classification.
//!
//! Ported line-for-line from `map_status_code` in
//! `original_source/core/protocol/status.cxx`: every `key_value_status_code`
//! maps onto exactly one `ErrorKind`, with two opcode-dependent cases
//! (`exists`/`not_stored` differ for `insert`, `locked` differs for
//! `unlock`) preserved exactly as the original resolves them.

use crate::error::ErrorKind;
use crate::opcode::OpCode;

/// Raw 16-bit status code as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0x0000);
    pub const NOT_FOUND: Status = Status(0x0001);
    pub const EXISTS: Status = Status(0x0002);
    pub const TOO_BIG: Status = Status(0x0003);
    pub const INVALID: Status = Status(0x0004);
    pub const NOT_STORED: Status = Status(0x0005);
    pub const DELTA_BAD_VALUE: Status = Status(0x0006);
    pub const NOT_MY_VBUCKET: Status = Status(0x0007);
    pub const NO_BUCKET: Status = Status(0x0008);
    pub const LOCKED: Status = Status(0x0009);
    pub const AUTH_STALE: Status = Status(0x001f);
    pub const AUTH_ERROR: Status = Status(0x0020);
    pub const AUTH_CONTINUE: Status = Status(0x0021);
    pub const RANGE_ERROR: Status = Status(0x0022);
    pub const ROLLBACK: Status = Status(0x0023);
    pub const NO_ACCESS: Status = Status(0x0024);
    pub const NOT_INITIALIZED: Status = Status(0x0025);
    pub const RATE_LIMITED_NETWORK_INGRESS: Status = Status(0x0030);
    pub const RATE_LIMITED_NETWORK_EGRESS: Status = Status(0x0031);
    pub const RATE_LIMITED_MAX_CONNECTIONS: Status = Status(0x0032);
    pub const RATE_LIMITED_MAX_COMMANDS: Status = Status(0x0033);
    pub const SCOPE_SIZE_LIMIT_EXCEEDED: Status = Status(0x0034);
    pub const UNKNOWN_FRAME_INFO: Status = Status(0x0080);
    pub const UNKNOWN_COMMAND: Status = Status(0x0081);
    pub const NO_MEMORY: Status = Status(0x0082);
    pub const NOT_SUPPORTED: Status = Status(0x0083);
    pub const INTERNAL: Status = Status(0x0084);
    pub const BUSY: Status = Status(0x0085);
    pub const TEMPORARY_FAILURE: Status = Status(0x0086);
    pub const UNKNOWN_COLLECTION: Status = Status(0x00c8);
    pub const NO_COLLECTIONS_MANIFEST: Status = Status(0x00c9);
    pub const CANNOT_APPLY_COLLECTIONS_MANIFEST: Status = Status(0x00ca);
    pub const COLLECTIONS_MANIFEST_IS_AHEAD: Status = Status(0x00cb);
    pub const UNKNOWN_SCOPE: Status = Status(0x00cc);
    pub const DCP_STREAM_ID_INVALID: Status = Status(0x00cd);
    pub const DCP_STREAM_NOT_FOUND: Status = Status(0x00ce);
    pub const OPAQUE_NO_MATCH: Status = Status(0x00cf);
    pub const DURABILITY_INVALID_LEVEL: Status = Status(0x00a0);
    pub const DURABILITY_IMPOSSIBLE: Status = Status(0x00a1);
    pub const SYNC_WRITE_IN_PROGRESS: Status = Status(0x00a2);
    pub const SYNC_WRITE_AMBIGUOUS: Status = Status(0x00a3);
    pub const SYNC_WRITE_RE_COMMIT_IN_PROGRESS: Status = Status(0x00a4);
    pub const SUBDOC_PATH_NOT_FOUND: Status = Status(0x00c0);
    pub const SUBDOC_PATH_MISMATCH: Status = Status(0x00c1);
    pub const SUBDOC_PATH_INVALID: Status = Status(0x00c2);
    pub const SUBDOC_PATH_TOO_BIG: Status = Status(0x00c3);
    pub const SUBDOC_DOC_TOO_DEEP: Status = Status(0x00c4);
    pub const SUBDOC_VALUE_CANNOT_INSERT: Status = Status(0x00c5);
    pub const SUBDOC_DOC_NOT_JSON: Status = Status(0x00c6);
    pub const SUBDOC_NUM_RANGE_ERROR: Status = Status(0x00c7);
    pub const SUBDOC_DELTA_INVALID: Status = Status(0x00d6);
    pub const SUBDOC_PATH_EXISTS: Status = Status(0x00d7);
    pub const SUBDOC_VALUE_TOO_DEEP: Status = Status(0x00d8);
    pub const SUBDOC_INVALID_COMBO: Status = Status(0x00d9);
    pub const SUBDOC_MULTI_PATH_FAILURE: Status = Status(0x00da);
    pub const SUBDOC_SUCCESS_DELETED: Status = Status(0x00db);
    pub const SUBDOC_MULTI_PATH_FAILURE_DELETED: Status = Status(0x00dc);
    pub const SUBDOC_XATTR_INVALID_FLAG_COMBO: Status = Status(0x00dd);
    pub const SUBDOC_XATTR_INVALID_KEY_COMBO: Status = Status(0x00de);
    pub const SUBDOC_XATTR_UNKNOWN_MACRO: Status = Status(0x00df);
    pub const SUBDOC_XATTR_UNKNOWN_VATTR: Status = Status(0x00e0);
    pub const SUBDOC_XATTR_CANNOT_MODIFY_VATTR: Status = Status(0x00e1);
    pub const SUBDOC_DELETED_DOCUMENT_CANNOT_HAVE_VALUE: Status = Status(0x00e2);
    pub const SUBDOC_XATTR_UNKNOWN_VATTR_MACRO: Status = Status(0x00e3);
    pub const SUBDOC_CAN_ONLY_REVIVE_DELETED_DOCUMENTS: Status = Status(0x00e4);
    pub const SUBDOC_DELETED_DOCUMENT_FILTER: Status = Status(0x00e5);
    pub const SUBDOC_INVALID_XATTR_ORDER: Status = Status(0x00e6);
    pub const RANGE_SCAN_COMPLETE: Status = Status(0x00a6);
    pub const RANGE_SCAN_MORE: Status = Status(0x00a5);
    pub const RANGE_SCAN_CANCELLED: Status = Status(0x00a7);
    pub const RANGE_SCAN_VB_UUID_NOT_EQUAL: Status = Status(0x00a8);
    pub const NOT_LOCKED: Status = Status(0x00a9);

    pub const fn is_success(self) -> bool {
        matches!(
            self,
            Status::SUCCESS
                | Status::SUBDOC_MULTI_PATH_FAILURE
                | Status::SUBDOC_SUCCESS_DELETED
                | Status::SUBDOC_MULTI_PATH_FAILURE_DELETED
                | Status::RANGE_SCAN_COMPLETE
                | Status::RANGE_SCAN_MORE
        )
    }
}

/// Classifies `status` (observed in response to `opcode`) into an
/// `ErrorKind`. Unknown status codes map to `ProtocolError`, which is fatal
/// to the session (`spec.md` §4.5).
pub fn map_status_code(opcode: OpCode, status: Status) -> Option<ErrorKind> {
    use ErrorKind as E;
    if status.is_success() {
        return None;
    }
    Some(match status {
        Status::NOT_FOUND => E::DocumentNotFound,
        Status::NOT_STORED => {
            if matches!(opcode, OpCode::Add) {
                E::DocumentExists
            } else {
                E::DocumentNotFound
            }
        }
        Status::EXISTS => {
            if matches!(opcode, OpCode::Add) {
                E::DocumentExists
            } else {
                E::CasMismatch
            }
        }
        Status::TOO_BIG => E::ValueTooLarge,
        Status::INVALID
        | Status::SUBDOC_INVALID_COMBO
        | Status::SUBDOC_DELETED_DOCUMENT_CANNOT_HAVE_VALUE => E::ValueInvalid,
        Status::DELTA_BAD_VALUE | Status::SUBDOC_DELTA_INVALID => E::DeltaInvalid,
        Status::NO_BUCKET => E::BucketNotFound,
        Status::LOCKED => {
            if matches!(opcode, OpCode::Unlock) {
                E::CasMismatch
            } else {
                E::DocumentLocked
            }
        }
        Status::NOT_LOCKED => E::DocumentNotLocked,
        Status::AUTH_STALE | Status::AUTH_ERROR | Status::NO_ACCESS => E::AuthenticationFailure,
        Status::NOT_SUPPORTED | Status::UNKNOWN_COMMAND => E::UnsupportedOperation,
        Status::INTERNAL => E::InternalServerFailure,
        Status::BUSY | Status::TEMPORARY_FAILURE | Status::NO_MEMORY | Status::NOT_INITIALIZED => {
            E::TemporaryFailure
        }
        Status::UNKNOWN_COLLECTION => E::CollectionNotFound,
        Status::UNKNOWN_SCOPE => E::ScopeNotFound,
        Status::DURABILITY_INVALID_LEVEL => E::DurabilityLevelNotAvailable,
        Status::DURABILITY_IMPOSSIBLE => E::DurabilityImpossible,
        Status::SYNC_WRITE_IN_PROGRESS => E::DurableWriteInProgress,
        Status::SYNC_WRITE_AMBIGUOUS => E::DurabilityAmbiguous,
        Status::SYNC_WRITE_RE_COMMIT_IN_PROGRESS => E::DurableWriteReCommitInProgress,
        Status::SUBDOC_PATH_NOT_FOUND => E::PathNotFound,
        Status::SUBDOC_PATH_MISMATCH => E::PathMismatch,
        Status::SUBDOC_PATH_INVALID => E::PathInvalid,
        Status::SUBDOC_PATH_TOO_BIG => E::PathTooBig,
        Status::SUBDOC_DOC_TOO_DEEP => E::PathTooDeep,
        Status::SUBDOC_VALUE_CANNOT_INSERT => E::ValueInvalid,
        Status::SUBDOC_DOC_NOT_JSON => E::DocumentNotJson,
        Status::SUBDOC_NUM_RANGE_ERROR => E::NumberTooBig,
        Status::SUBDOC_PATH_EXISTS => E::PathExists,
        Status::SUBDOC_VALUE_TOO_DEEP => E::ValueTooDeep,
        Status::SUBDOC_XATTR_INVALID_FLAG_COMBO | Status::SUBDOC_XATTR_INVALID_KEY_COMBO => {
            E::XattrInvalidKeyCombo
        }
        Status::SUBDOC_XATTR_UNKNOWN_MACRO | Status::SUBDOC_XATTR_UNKNOWN_VATTR_MACRO => {
            E::XattrUnknownMacro
        }
        Status::SUBDOC_XATTR_UNKNOWN_VATTR => E::XattrUnknownVirtualAttribute,
        Status::SUBDOC_XATTR_CANNOT_MODIFY_VATTR => E::XattrCannotModifyVirtualAttribute,
        Status::SUBDOC_CAN_ONLY_REVIVE_DELETED_DOCUMENTS => E::CannotReviveLivingDocument,
        Status::RATE_LIMITED_NETWORK_INGRESS
        | Status::RATE_LIMITED_NETWORK_EGRESS
        | Status::RATE_LIMITED_MAX_CONNECTIONS
        | Status::RATE_LIMITED_MAX_COMMANDS => E::RateLimited,
        Status::SCOPE_SIZE_LIMIT_EXCEEDED => E::QuotaLimited,
        Status::SUBDOC_INVALID_XATTR_ORDER
        | Status::NOT_MY_VBUCKET
        | Status::AUTH_CONTINUE
        | Status::RANGE_ERROR
        | Status::ROLLBACK
        | Status::UNKNOWN_FRAME_INFO
        | Status::NO_COLLECTIONS_MANIFEST
        | Status::CANNOT_APPLY_COLLECTIONS_MANIFEST
        | Status::COLLECTIONS_MANIFEST_IS_AHEAD
        | Status::DCP_STREAM_ID_INVALID
        | Status::DCP_STREAM_NOT_FOUND
        | Status::OPAQUE_NO_MATCH
        | Status::RANGE_SCAN_CANCELLED => E::RequestCancelled,
        Status::RANGE_SCAN_VB_UUID_NOT_EQUAL => E::MutationTokenOutdated,
        _ => E::ProtocolError,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_distinguishes_exists_from_not_stored() {
        assert_eq!(
            map_status_code(OpCode::Add, Status::EXISTS),
            Some(ErrorKind::DocumentExists)
        );
        assert_eq!(
            map_status_code(OpCode::Add, Status::NOT_STORED),
            Some(ErrorKind::DocumentExists)
        );
        assert_eq!(
            map_status_code(OpCode::Replace, Status::EXISTS),
            Some(ErrorKind::CasMismatch)
        );
        assert_eq!(
            map_status_code(OpCode::Replace, Status::NOT_STORED),
            Some(ErrorKind::DocumentNotFound)
        );
    }

    #[test]
    fn unlock_distinguishes_locked_from_other_ops() {
        assert_eq!(
            map_status_code(OpCode::Unlock, Status::LOCKED),
            Some(ErrorKind::CasMismatch)
        );
        assert_eq!(
            map_status_code(OpCode::Get, Status::LOCKED),
            Some(ErrorKind::DocumentLocked)
        );
    }

    #[test]
    fn success_variants_map_to_none() {
        assert_eq!(map_status_code(OpCode::Get, Status::SUCCESS), None);
        assert_eq!(map_status_code(OpCode::Get, Status::RANGE_SCAN_MORE), None);
    }

    #[test]
    fn unknown_status_is_protocol_error() {
        assert_eq!(
            map_status_code(OpCode::Get, Status(0xffff)),
            Some(ErrorKind::ProtocolError)
        );
    }
}
