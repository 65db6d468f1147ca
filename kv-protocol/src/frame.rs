//! Frame structure: the 24-byte header, the framing-extras TLV region, and
//! the in-memory `Packet` the codec encodes/decodes (`spec.md` §3, §4.1).

use crate::magic::Magic;
use crate::opcode::OpCode;
use crate::status::Status;
use crate::datatype::DataType;

pub const HEADER_LEN: usize = 24;

/// Durability requirement carried in a request's framing-extras
/// (`spec.md` §3 "Framing-extras frame").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityLevel {
    None,
    Majority,
    MajorityAndPersistToActive,
    PersistToMajority,
}

impl DurabilityLevel {
    pub const fn byte(self) -> u8 {
        match self {
            DurabilityLevel::None => 0x00,
            DurabilityLevel::Majority => 0x01,
            DurabilityLevel::MajorityAndPersistToActive => 0x02,
            DurabilityLevel::PersistToMajority => 0x03,
        }
    }

    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(DurabilityLevel::None),
            0x01 => Some(DurabilityLevel::Majority),
            0x02 => Some(DurabilityLevel::MajorityAndPersistToActive),
            0x03 => Some(DurabilityLevel::PersistToMajority),
            _ => None,
        }
    }

    pub const fn is_none(self) -> bool {
        matches!(self, DurabilityLevel::None)
    }
}

/// One framing-extras TLV frame, request or response side. Unknown frames
/// are represented as `Unknown` and passed through verbatim in both
/// directions per `spec.md` §4.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingExtra {
    Barrier,
    Durability { level: DurabilityLevel, timeout_ms: Option<u16> },
    PreserveTtl,
    StreamId(u16),
    OpenTracingContext(Vec<u8>),
    UserImpersonation(Vec<u8>),
    ServerDuration(u16),
    ReadUnits(u16),
    WriteUnits(u16),
    Unknown { id: u8, data: Vec<u8> },
}

impl FramingExtra {
    fn request_id(&self) -> u8 {
        match self {
            FramingExtra::Barrier => 0x0,
            FramingExtra::Durability { .. } => 0x1,
            FramingExtra::StreamId(_) => 0x3,
            FramingExtra::OpenTracingContext(_) => 0x4,
            FramingExtra::UserImpersonation(_) => 0x5,
            FramingExtra::PreserveTtl => 0x6,
            FramingExtra::Unknown { id, .. } => *id,
            FramingExtra::ServerDuration(_)
            | FramingExtra::ReadUnits(_)
            | FramingExtra::WriteUnits(_) => {
                unreachable!("response-only framing-extra encoded on the request side")
            }
        }
    }

    fn response_id(&self) -> u8 {
        match self {
            FramingExtra::ServerDuration(_) => 0x0,
            FramingExtra::ReadUnits(_) => 0x1,
            FramingExtra::WriteUnits(_) => 0x2,
            FramingExtra::Unknown { id, .. } => *id,
            _ => unreachable!("request-only framing-extra encoded on the response side"),
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            FramingExtra::Barrier | FramingExtra::PreserveTtl => Vec::new(),
            FramingExtra::Durability { level, timeout_ms } => {
                let mut v = vec![level.byte()];
                if let Some(t) = timeout_ms {
                    v.extend_from_slice(&t.to_be_bytes());
                }
                v
            }
            FramingExtra::StreamId(id) => id.to_be_bytes().to_vec(),
            FramingExtra::OpenTracingContext(ctx) => ctx.clone(),
            FramingExtra::UserImpersonation(user) => user.clone(),
            FramingExtra::ServerDuration(enc) => enc.to_be_bytes().to_vec(),
            FramingExtra::ReadUnits(u) | FramingExtra::WriteUnits(u) => u.to_be_bytes().to_vec(),
            FramingExtra::Unknown { data, .. } => data.clone(),
        }
    }

    /// Encodes this frame's 4-bit-id + 4-bit-size (or escaped size) TLV
    /// header followed by its payload, for the request side.
    pub fn encode_request(&self) -> Vec<u8> {
        encode_tlv(self.request_id(), &self.payload())
    }

    pub fn encode_response(&self) -> Vec<u8> {
        encode_tlv(self.response_id(), &self.payload())
    }

    /// The server-duration encoding reconstructs to microseconds as
    /// `enc^1.74 / 2` (`spec.md` §3).
    pub fn decoded_server_duration_micros(encoded: u16) -> f64 {
        (encoded as f64).powf(1.74) / 2.0
    }

    fn decode_request(id: u8, data: Vec<u8>) -> Self {
        match id {
            0x0 => FramingExtra::Barrier,
            0x1 => {
                let level = data.first().copied().and_then(DurabilityLevel::from_byte)
                    .unwrap_or(DurabilityLevel::None);
                let timeout_ms = if data.len() >= 3 {
                    Some(u16::from_be_bytes([data[1], data[2]]))
                } else {
                    None
                };
                FramingExtra::Durability { level, timeout_ms }
            }
            0x3 if data.len() >= 2 => FramingExtra::StreamId(u16::from_be_bytes([data[0], data[1]])),
            0x4 => FramingExtra::OpenTracingContext(data),
            0x5 => FramingExtra::UserImpersonation(data),
            0x6 => FramingExtra::PreserveTtl,
            _ => FramingExtra::Unknown { id, data },
        }
    }

    fn decode_response(id: u8, data: Vec<u8>) -> Self {
        match id {
            0x0 if data.len() >= 2 => FramingExtra::ServerDuration(u16::from_be_bytes([data[0], data[1]])),
            0x1 if data.len() >= 2 => FramingExtra::ReadUnits(u16::from_be_bytes([data[0], data[1]])),
            0x2 if data.len() >= 2 => FramingExtra::WriteUnits(u16::from_be_bytes([data[0], data[1]])),
            _ => FramingExtra::Unknown { id, data },
        }
    }
}

fn encode_tlv(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    if payload.len() < 15 {
        out.push((id << 4) | (payload.len() as u8));
    } else {
        // Escaped length: nibble 15 means "read one more byte, minus 15".
        out.push((id << 4) | 0x0f);
        out.push((payload.len() - 15) as u8);
    }
    out.extend_from_slice(payload);
    out
}

/// Reads one TLV frame from the front of `buf`, returning the frame's
/// `(id, payload, consumed)`. Returns `None` if `buf` does not contain a
/// complete frame.
fn decode_tlv(buf: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
    let first = *buf.first()?;
    let id = first >> 4;
    let mut len = (first & 0x0f) as usize;
    let mut header_len = 1;
    if len == 0x0f {
        let extra = *buf.get(1)? as usize;
        len = extra + 15;
        header_len = 2;
    }
    if buf.len() < header_len + len {
        return None;
    }
    let payload = buf[header_len..header_len + len].to_vec();
    Some((id, payload, header_len + len))
}

/// A fully decoded (or to-be-encoded) MCBP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: Magic,
    pub opcode: OpCode,
    pub datatype: DataType,
    /// Request side: the target vbucket. Response side: the status code.
    pub vbucket_or_status: u16,
    pub opaque: u32,
    pub cas: u64,
    pub framing_extras: Vec<FramingExtra>,
    pub extras: Vec<u8>,
    /// The collection UID prefix, if collections are enabled for this key.
    /// The codec is responsible for the wire-level LEB128 prefixing; this
    /// field never includes it.
    pub collection_uid: Option<u32>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Packet {
    pub fn status(&self) -> Status {
        debug_assert!(self.magic.is_response());
        Status(self.vbucket_or_status)
    }

    pub fn vbucket(&self) -> u16 {
        debug_assert!(!self.magic.is_response());
        self.vbucket_or_status
    }
}

pub(crate) fn split_framing_extras(buf: &[u8], is_request: bool) -> (Vec<FramingExtra>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        match decode_tlv(&buf[offset..]) {
            Some((id, data, consumed)) => {
                frames.push(if is_request {
                    FramingExtra::decode_request(id, data)
                } else {
                    FramingExtra::decode_response(id, data)
                });
                offset += consumed;
            }
            None => break,
        }
    }
    (frames, offset)
}
