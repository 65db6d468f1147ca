//! Frame-level read/write over an async duplex stream (`spec.md` §4.3.2).
//!
//! Kept free of session state so it can be unit-tested against
//! `tokio::io::duplex` without standing up a tracker or bootstrap machine.

use kv_protocol::{decode, encode, DecodeStatus, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameIoError {
    #[error("connection closed while reading a frame")]
    Eof,
    #[error("malformed frame")]
    Malformed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads exactly one frame from `stream`, using `buf` as the accumulation
/// buffer across calls (callers keep `buf` alive across the whole session).
pub async fn read_one_frame<S>(stream: &mut S, buf: &mut Vec<u8>) -> Result<Packet, FrameIoError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    loop {
        match decode(buf) {
            DecodeStatus::Ok { packet, consumed } => {
                buf.drain(..consumed);
                return Ok(packet);
            }
            DecodeStatus::Malformed => return Err(FrameIoError::Malformed),
            DecodeStatus::NeedData => {
                let mut chunk = vec![0u8; READ_CHUNK];
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(FrameIoError::Eof);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

pub async fn write_frame<S>(stream: &mut S, packet: &Packet) -> std::io::Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let bytes = encode(packet);
    stream.write_all(&bytes).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_protocol::{DataType, Magic, OpCode};

    fn sample() -> Packet {
        Packet {
            magic: Magic::Request,
            opcode: OpCode::Noop,
            datatype: DataType::RAW,
            vbucket_or_status: 0,
            opaque: 1,
            cas: 0,
            framing_extras: Vec::new(),
            extras: Vec::new(),
            collection_uid: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    #[tokio::test]
    async fn round_trips_a_frame_over_a_duplex_stream() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let packet = sample();
        write_frame(&mut client, &packet).await.unwrap();

        let mut buf = Vec::new();
        let decoded = read_one_frame(&mut server, &mut buf).await.unwrap();
        assert_eq!(decoded.opaque, packet.opaque);
        assert_eq!(decoded.opcode, packet.opcode);
    }

    #[tokio::test]
    async fn reports_eof_on_closed_stream() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let mut buf = Vec::new();
        let err = read_one_frame(&mut server, &mut buf).await.unwrap_err();
        assert!(matches!(err, FrameIoError::Eof));
    }
}
