//! # Node — One Peer Connection
//!
//! A [`Node`] wraps one reliable, ordered byte stream to one counterparty
//! together with the protocol state of that connection. Every protocol
//! operation (see `session.rs`, `nego.rs`, `transaction.rs`) is a method on
//! `Node` with a precondition state and a postcondition state:
//!
//! ```text
//!                  initiator (buyer)                    responder (seller)
//!
//!                    Connected                              Connected
//!   send request ──►  SessionAckWait      recv request ──►  SessionReqRecvd
//!   recv ack     ──►  SessionAckRecvd     send ack     ──►  SessionAckWait
//!   send ack     ──►  SessionEstablished  recv ack     ──►  SessionEstablished
//!
//!   (OT)  send nego req  ──► NegoAckReqWait   recv nego req  ──► NegoRequestRecvd
//!         recv ack+req   ──► NegoAckReqRecvd  send ack+req   ──► NegoAckWait
//!         send nego ack  ──► Negotiated       recv nego ack  ──► Negotiated
//!
//!   send tx request ──► TxResponseWait      recv tx request  ──► TxRequestRecvd
//!   recv response   ──► TxResponseRecvd     send response    ──► TxReceiptWait
//!   send receipt    ──► TxSecretWait        recv receipt     ──► TxReceiptRecvd
//! ```
//!
//! An operation invoked in any other state fails with
//! [`NetError::StateMismatch`] and leaves the state untouched. The state
//! only advances after the message has been fully sent or received, so a
//! failed I/O call leaves the node where it was (and the flow dead, since
//! there are no retries at this layer).
//!
//! A `Node` is owned by exactly one trade flow. It is deliberately not
//! `Clone` and holds no locks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config;
use crate::trade::TradeMode;

use super::error::NetError;
use super::frame::{read_frame, write_frame, MessageType};

// ---------------------------------------------------------------------------
// Node State
// ---------------------------------------------------------------------------

/// Protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Stream is up, nothing exchanged yet.
    Connected,
    /// Responder: a session request has been received.
    SessionReqRecvd,
    /// Waiting for the peer's session ack.
    SessionAckWait,
    /// Initiator: the preliminary ack arrived, our final ack is due.
    SessionAckRecvd,
    /// Both sides agree on `{id, mode}`.
    SessionEstablished,
    /// Responder: the buyer's negotiation request has been received.
    NegoRequestRecvd,
    /// Initiator: waiting for the seller's combined ack+request.
    NegoAckReqWait,
    /// Responder: waiting for the buyer's negotiation ack.
    NegoAckWait,
    /// Initiator: the combined ack+request has been received.
    NegoAckReqRecvd,
    /// Oblivious-transfer key material exchanged.
    Negotiated,
    /// Responder: the transaction request has been received.
    TxRequestRecvd,
    /// Initiator: waiting for the transaction response.
    TxResponseWait,
    /// Initiator: the response has been received.
    TxResponseRecvd,
    /// Responder: waiting for the signed receipt.
    TxReceiptWait,
    /// Responder: the signed receipt has been received and verified.
    TxReceiptRecvd,
    /// Initiator: the receipt is out; the secret comes via the ledger.
    TxSecretWait,
}

/// The negotiated session of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier allocated by the responder. Never zero.
    pub id: u64,
    /// Agreed trade mode.
    pub mode: TradeMode,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One peer connection plus its protocol state.
pub struct Node<S> {
    stream: S,
    state: NodeState,
    session: Option<Session>,
    /// Session proposed in a preliminary ack, awaiting the final ack.
    pub(super) pending: Option<Session>,
    io_timeout: Duration,
    max_payload: u64,
}

impl<S> Node<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a freshly connected stream with the default I/O timeout.
    pub fn new(stream: S) -> Self {
        Self::with_timeout(stream, config::DEFAULT_IO_TIMEOUT)
    }

    /// Wrap a freshly connected stream with a custom I/O timeout.
    pub fn with_timeout(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream,
            state: NodeState::Connected,
            session: None,
            pending: None,
            io_timeout,
            max_payload: config::MAX_FRAME_PAYLOAD,
        }
    }

    /// Override the largest payload this node accepts.
    pub fn with_max_payload(mut self, max_payload: u64) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Current protocol state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The established session, if the handshake has completed.
    pub fn session(&self) -> Option<Session> {
        self.session
    }

    /// The established session or a state-mismatch error.
    pub fn require_session(&self) -> Result<Session, NetError> {
        self.session.ok_or(NetError::StateMismatch {
            expected: "an established session",
            actual: self.state,
        })
    }

    /// Give back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    // -- state guards -------------------------------------------------------

    pub(super) fn expect_state(
        &self,
        accepted: &[NodeState],
        expected: &'static str,
    ) -> Result<(), NetError> {
        if accepted.contains(&self.state) {
            Ok(())
        } else {
            Err(NetError::StateMismatch {
                expected,
                actual: self.state,
            })
        }
    }

    pub(super) fn set_state(&mut self, state: NodeState) {
        tracing::trace!(from = ?self.state, to = ?state, "node state transition");
        self.state = state;
    }

    pub(super) fn establish(&mut self, session: Session) {
        self.pending = None;
        self.session = Some(session);
        self.set_state(NodeState::SessionEstablished);
    }

    // -- timed I/O ----------------------------------------------------------

    pub(super) async fn send(&mut self, msg_type: MessageType, payload: &[u8]) -> Result<(), NetError> {
        let io_timeout = self.io_timeout;
        tokio::time::timeout(io_timeout, write_frame(&mut self.stream, msg_type, payload))
            .await
            .map_err(|_| NetError::Timeout(io_timeout, "send"))?
    }

    pub(super) async fn recv(&mut self, msg_type: MessageType) -> Result<Vec<u8>, NetError> {
        let io_timeout = self.io_timeout;
        let limit = self.max_payload;
        tokio::time::timeout(io_timeout, read_frame(&mut self.stream, msg_type, limit))
            .await
            .map_err(|_| NetError::Timeout(io_timeout, "receive"))?
    }

    /// Send a payload as one protocol step: check `pre`, send, move to `post`.
    pub(super) async fn send_step(
        &mut self,
        msg_type: MessageType,
        payload: &[u8],
        pre: &[NodeState],
        expected: &'static str,
        post: NodeState,
    ) -> Result<(), NetError> {
        self.expect_state(pre, expected)?;
        self.send(msg_type, payload).await?;
        self.set_state(post);
        Ok(())
    }

    /// Receive one protocol step's payload without advancing the state.
    ///
    /// Used by steps that must validate the payload before committing to
    /// the transition; the caller calls [`set_state`](Self::set_state).
    pub(super) async fn recv_checked(
        &mut self,
        msg_type: MessageType,
        pre: &[NodeState],
        expected: &'static str,
    ) -> Result<Vec<u8>, NetError> {
        self.expect_state(pre, expected)?;
        self.recv(msg_type).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_node_starts_connected() {
        let (a, _b) = tokio::io::duplex(64);
        let node = Node::new(a);
        assert_eq!(node.state(), NodeState::Connected);
        assert!(node.session().is_none());
        assert!(node.require_session().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (a, _b) = tokio::io::duplex(64);
        let mut node = Node::with_timeout(a, Duration::from_secs(5));
        let err = node.recv(MessageType::SessionAck).await.unwrap_err();
        assert!(matches!(err, NetError::Timeout(_, "receive")));
    }

    #[tokio::test]
    async fn payload_limit_enforced() {
        let (a, b) = tokio::io::duplex(4096);
        let mut sender = Node::new(a);
        let mut receiver = Node::new(b).with_max_payload(16);
        sender.send(MessageType::TxResponse, &[7u8; 32]).await.unwrap();
        let err = receiver.recv(MessageType::TxResponse).await.unwrap_err();
        assert!(matches!(err, NetError::FrameTooLarge { len: 32, limit: 16 }));
    }
}
