//! # Negotiation Sub-Protocol
//!
//! Oblivious-transfer modes exchange key material before the transaction
//! round. The exchange is symmetric (each side answers the other's
//! request) but squeezed into three messages:
//!
//! ```text
//!   Buyer                                              Seller
//!     │  NegoRequest   (buyer request)                   │
//!     ├─────────────────────────────────────────────────►│
//!     │  NegoAckReq    (seller response ‖ seller request)│
//!     │◄─────────────────────────────────────────────────┤
//!     │  NegoAck       (buyer response)                  │
//!     ├─────────────────────────────────────────────────►│
//!  Negotiated                                        Negotiated
//! ```
//!
//! Plain modes skip this entirely and go straight from
//! `SessionEstablished` to the transaction round.

use tokio::io::{AsyncRead, AsyncWrite};

use super::error::NetError;
use super::frame::MessageType;
use super::node::{Node, NodeState};
use super::record::{decode_nego_ack_req, encode_nego_ack_req};

impl<S> Node<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Buyer: send the negotiation request.
    /// `SessionEstablished → NegoAckReqWait`.
    pub async fn send_nego_request(&mut self, request: &[u8]) -> Result<(), NetError> {
        self.send_step(
            MessageType::NegoRequest,
            request,
            &[NodeState::SessionEstablished],
            "SessionEstablished",
            NodeState::NegoAckReqWait,
        )
        .await
    }

    /// Seller: receive the buyer's negotiation request.
    /// `SessionEstablished → NegoRequestRecvd`.
    pub async fn recv_nego_request(&mut self) -> Result<Vec<u8>, NetError> {
        let request = self
            .recv_checked(
                MessageType::NegoRequest,
                &[NodeState::SessionEstablished],
                "SessionEstablished",
            )
            .await?;
        self.set_state(NodeState::NegoRequestRecvd);
        Ok(request)
    }

    /// Seller: send its response to the buyer's request together with its
    /// own request. `NegoRequestRecvd → NegoAckWait`.
    pub async fn send_nego_ack_req(&mut self, response: &[u8], request: &[u8]) -> Result<(), NetError> {
        if response.is_empty() {
            return Err(NetError::Malformed {
                what: "nego ack+request",
                reason: "empty response".to_string(),
            });
        }
        let payload = encode_nego_ack_req(response, request);
        self.send_step(
            MessageType::NegoAckReq,
            &payload,
            &[NodeState::NegoRequestRecvd],
            "NegoRequestRecvd",
            NodeState::NegoAckWait,
        )
        .await
    }

    /// Buyer: receive the seller's `(response, request)` pair.
    /// `NegoAckReqWait → NegoAckReqRecvd`.
    pub async fn recv_nego_ack_req(&mut self) -> Result<(Vec<u8>, Vec<u8>), NetError> {
        let raw = self
            .recv_checked(
                MessageType::NegoAckReq,
                &[NodeState::NegoAckReqWait],
                "NegoAckReqWait",
            )
            .await?;
        let pair = decode_nego_ack_req(&raw)?;
        self.set_state(NodeState::NegoAckReqRecvd);
        Ok(pair)
    }

    /// Buyer: send the response to the seller's request.
    /// `NegoAckReqRecvd → Negotiated`.
    pub async fn send_nego_ack(&mut self, response: &[u8]) -> Result<(), NetError> {
        self.send_step(
            MessageType::NegoAck,
            response,
            &[NodeState::NegoAckReqRecvd],
            "NegoAckReqRecvd",
            NodeState::Negotiated,
        )
        .await
    }

    /// Seller: receive the buyer's response. `NegoAckWait → Negotiated`.
    pub async fn recv_nego_ack(&mut self) -> Result<Vec<u8>, NetError> {
        let response = self
            .recv_checked(MessageType::NegoAck, &[NodeState::NegoAckWait], "NegoAckWait")
            .await?;
        self.set_state(NodeState::Negotiated);
        Ok(response)
    }
}
