//! # Message Framing
//!
//! Every protocol message travels as one frame:
//!
//! ```text
//! ┌────────────┬──────────────┬─────────────────────────┐
//! │ type (u16) │ length (u64) │ payload (length bytes)  │
//! └────────────┴──────────────┴─────────────────────────┘
//!      2 B          8 B               variable
//! ```
//!
//! Both integers are big-endian. The header is read first, the type is
//! checked against what the current protocol step expects, and only then is
//! exactly `length` bytes of payload read. A header announcing more than
//! [`MAX_FRAME_PAYLOAD`](crate::config::MAX_FRAME_PAYLOAD) is refused before
//! anything is allocated.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config;

use super::error::NetError;

/// The message types of the session, negotiation and transaction rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageType {
    /// Buyer → seller: open (or resume) a session.
    SessionRequest = 1,
    /// Either direction: acknowledge a session request or ack.
    SessionAck = 2,
    /// Buyer → seller: first negotiation payload (OT modes).
    NegoRequest = 3,
    /// Seller → buyer: negotiation response plus the seller's own request.
    NegoAckReq = 4,
    /// Buyer → seller: negotiation response to the seller's request.
    NegoAck = 5,
    /// Buyer → seller: proof-engine transaction request.
    TxRequest = 6,
    /// Seller → buyer: encrypted response.
    TxResponse = 7,
    /// Buyer → seller: signed receipt.
    TxReceipt = 8,
}

impl MessageType {
    /// Wire code of this message type.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = NetError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => MessageType::SessionRequest,
            2 => MessageType::SessionAck,
            3 => MessageType::NegoRequest,
            4 => MessageType::NegoAckReq,
            5 => MessageType::NegoAck,
            6 => MessageType::TxRequest,
            7 => MessageType::TxResponse,
            8 => MessageType::TxReceipt,
            other => return Err(NetError::UnknownMessageType(other)),
        })
    }
}

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message type.
    pub msg_type: MessageType,
    /// Payload length in bytes.
    pub len: u64,
}

impl FrameHeader {
    /// Encode the header into its 10-byte wire form.
    pub fn encode(&self) -> [u8; config::FRAME_HEADER_LEN] {
        let mut buf = [0u8; config::FRAME_HEADER_LEN];
        buf[..2].copy_from_slice(&self.msg_type.code().to_be_bytes());
        buf[2..].copy_from_slice(&self.len.to_be_bytes());
        buf
    }

    /// Decode a header and enforce the payload size limit.
    pub fn decode(mut raw: &[u8], limit: u64) -> Result<Self, NetError> {
        if raw.len() < config::FRAME_HEADER_LEN {
            return Err(NetError::Malformed {
                what: "frame header",
                reason: format!("{} bytes, need {}", raw.len(), config::FRAME_HEADER_LEN),
            });
        }
        let msg_type = MessageType::try_from(raw.get_u16())?;
        let len = raw.get_u64();
        if len > limit {
            return Err(NetError::FrameTooLarge { len, limit });
        }
        Ok(Self { msg_type, len })
    }
}

/// Write one complete frame and flush it.
pub async fn write_frame<W>(writer: &mut W, msg_type: MessageType, payload: &[u8]) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let header = FrameHeader {
        msg_type,
        len: payload.len() as u64,
    };
    let mut buf = BytesMut::with_capacity(config::FRAME_HEADER_LEN + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame of the expected type.
///
/// The header is validated before the payload is read: an unexpected type
/// fails immediately and leaves the payload unread, since the stream is
/// unusable from that point on anyway.
pub async fn read_frame<R>(reader: &mut R, expected: MessageType, limit: u64) -> Result<Vec<u8>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; config::FRAME_HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = FrameHeader::decode(&raw, limit)?;
    if header.msg_type != expected {
        return Err(NetError::UnexpectedMessage {
            expected,
            got: header.msg_type,
        });
    }

    let mut payload = vec![0u8; header.len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
