//! Binary MCBP wire protocol core: frame codec, opcode/status/error-map
//! model, HELLO feature set, and the cluster configuration document.
//!
//! This crate is transport- and runtime-agnostic: it owns byte-level framing
//! and classification only. Session bootstrap, retry orchestration, and
//! socket I/O live in `kv-client`.

pub mod codec;
pub mod config;
pub mod datatype;
pub mod error;
pub mod errormap;
pub mod features;
pub mod frame;
pub mod leb128;
pub mod magic;
pub mod opcode;
pub mod status;

pub use codec::{decode, encode, split_collection_prefixed_key, DecodeStatus};
pub use config::{supersedes, ClusterConfig, Node, NetworkType};
pub use datatype::DataType;
pub use error::{ClientError, ErrorKind};
pub use errormap::{ErrorMap, ErrorMapAttribute, ErrorMapEntry};
pub use features::{FeatureSet, HelloFeature};
pub use frame::{DurabilityLevel, FramingExtra, Packet, HEADER_LEN};
pub use magic::Magic;
pub use opcode::OpCode;
pub use status::{map_status_code, Status};
