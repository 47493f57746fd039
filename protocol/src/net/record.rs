//! # Fixed-Layout Records
//!
//! Two payloads on the wire are not opaque proof-engine bytes and have a
//! layout of their own.
//!
//! ## Session request / ack
//!
//! ```text
//! id (u64 BE, 8) | mode (u8, 1) | sigma_merkle_root (32) | extra_info (rest)
//! ```
//!
//! `id == 0` in a request asks the responder to allocate a session. An ack
//! must always carry a non-zero id; that rule is enforced by the session
//! state machine, not by the codec.
//!
//! ## Negotiation ack + request
//!
//! ```text
//! response_len (u64 BE, 8) | response (response_len) | request (rest)
//! ```
//!
//! Folding the seller's negotiation response and its own negotiation
//! request into one frame saves a round-trip, at the price of validating
//! the inner length by hand.

use bytes::{Buf, BufMut};

use crate::config;

use super::error::NetError;

// ---------------------------------------------------------------------------
// Session Record
// ---------------------------------------------------------------------------

/// A session request or ack. Both directions share the same layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session identifier; `0` in a request means "allocate a new one".
    pub id: u64,
    /// Trade mode code.
    pub mode: u8,
    /// Sigma Merkle root of the dataset being traded.
    pub sigma_merkle_root: [u8; 32],
    /// Free-form trailer. The orchestrators carry the sender's address here.
    pub extra_info: Vec<u8>,
}

/// Wire request and wire ack are the same record.
pub type SessionRequest = SessionRecord;
/// See [`SessionRequest`].
pub type SessionAck = SessionRecord;

impl SessionRecord {
    /// Encode into the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(config::SESSION_RECORD_MIN_LEN + self.extra_info.len());
        buf.put_u64(self.id);
        buf.put_u8(self.mode);
        buf.put_slice(&self.sigma_merkle_root);
        buf.put_slice(&self.extra_info);
        buf
    }

    /// Decode from the wire layout. Anything shorter than 41 bytes fails.
    pub fn decode(mut raw: &[u8]) -> Result<Self, NetError> {
        if raw.len() < config::SESSION_RECORD_MIN_LEN {
            return Err(NetError::Malformed {
                what: "session record",
                reason: format!(
                    "{} bytes, need at least {}",
                    raw.len(),
                    config::SESSION_RECORD_MIN_LEN
                ),
            });
        }
        let id = raw.get_u64();
        let mode = raw.get_u8();
        let mut sigma_merkle_root = [0u8; 32];
        raw.copy_to_slice(&mut sigma_merkle_root);
        Ok(Self {
            id,
            mode,
            sigma_merkle_root,
            extra_info: raw.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Negotiation Ack + Request
// ---------------------------------------------------------------------------

/// Encode a negotiation response and request into one payload.
pub fn encode_nego_ack_req(response: &[u8], request: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(config::NEGO_LENGTH_PREFIX + response.len() + request.len());
    buf.put_u64(response.len() as u64);
    buf.put_slice(response);
    buf.put_slice(request);
    buf
}

/// Split a combined negotiation payload into `(response, request)`.
///
/// Rejects a payload of 8 bytes or less, an empty response, and a declared
/// response length that runs past the end of the payload.
pub fn decode_nego_ack_req(raw: &[u8]) -> Result<(Vec<u8>, Vec<u8>), NetError> {
    let malformed = |reason: String| NetError::Malformed {
        what: "nego ack+request",
        reason,
    };

    if raw.len() <= config::NEGO_LENGTH_PREFIX {
        return Err(malformed(format!("payload of {} bytes", raw.len())));
    }
    let (mut prefix, body) = raw.split_at(config::NEGO_LENGTH_PREFIX);
    let response_len = prefix.get_u64();
    if response_len == 0 {
        return Err(malformed("empty response".to_string()));
    }
    if response_len > body.len() as u64 {
        return Err(malformed(format!(
            "response length {} exceeds {} available bytes",
            response_len,
            body.len()
        )));
    }
    let (response, request) = body.split_at(response_len as usize);
    Ok((response.to_vec(), request.to_vec()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, extra: &[u8]) -> SessionRecord {
        SessionRecord {
            id,
            mode: 6,
            sigma_merkle_root: [0xAB; 32],
            extra_info: extra.to_vec(),
        }
    }

    #[test]
    fn session_record_round_trip() {
        let original = record(0xDEAD_BEEF, b"buyer-address-bytes!");
        let decoded = SessionRecord::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn session_record_without_extra_info() {
        let original = record(7, b"");
        let encoded = original.encode();
        assert_eq!(encoded.len(), 41);
        assert_eq!(SessionRecord::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn session_record_layout() {
        let encoded = record(1, b"\xFF").encode();
        assert_eq!(&encoded[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(encoded[8], 6);
        assert_eq!(&encoded[9..41], &[0xAB; 32]);
        assert_eq!(encoded[41], 0xFF);
    }

    #[test]
    fn short_session_record_rejected() {
        let encoded = record(1, b"").encode();
        assert!(SessionRecord::decode(&encoded[..40]).is_err());
        assert!(SessionRecord::decode(&[]).is_err());
    }

    #[test]
    fn nego_payload_round_trip() {
        let payload = encode_nego_ack_req(b"response", b"request");
        let (response, request) = decode_nego_ack_req(&payload).unwrap();
        assert_eq!(response, b"response");
        assert_eq!(request, b"request");
    }

    #[test]
    fn nego_payload_with_empty_request() {
        let payload = encode_nego_ack_req(b"only-response", b"");
        let (response, request) = decode_nego_ack_req(&payload).unwrap();
        assert_eq!(response, b"only-response");
        assert!(request.is_empty());
    }

    #[test]
    fn nego_payload_too_short_rejected() {
        assert!(decode_nego_ack_req(&[0u8; 8]).is_err());
        assert!(decode_nego_ack_req(&[0u8; 3]).is_err());
    }

    #[test]
    fn nego_payload_zero_response_len_rejected() {
        let mut payload = 0u64.to_be_bytes().to_vec();
        payload.extend_from_slice(b"request");
        assert!(decode_nego_ack_req(&payload).is_err());
    }

    #[test]
    fn nego_payload_overlong_response_len_rejected() {
        let mut payload = 9u64.to_be_bytes().to_vec();
        payload.extend_from_slice(b"12345678");
        assert!(decode_nego_ack_req(&payload).is_err());

        // Exactly the remaining length is fine.
        let mut payload = 8u64.to_be_bytes().to_vec();
        payload.extend_from_slice(b"12345678");
        let (response, request) = decode_nego_ack_req(&payload).unwrap();
        assert_eq!(response, b"12345678");
        assert!(request.is_empty());
    }
}
