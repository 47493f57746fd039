//! Error types for the peer wire protocol.
//!
//! Every [`Node`](super::Node) operation that can fail returns a
//! [`NetError`]. All of them are fatal to the flow that hit them: once a
//! peer has seen an unexpected message or a truncated frame, neither side
//! can assume the other's state machine is where it should be.

use alloy_primitives::Address;
use thiserror::Error;

use super::node::NodeState;
use super::frame::MessageType;

/// Errors that can occur while moving protocol messages between peers.
#[derive(Debug, Error)]
pub enum NetError {
    /// An operation was invoked outside its precondition state.
    #[error("state mismatch: operation requires {expected}, node is in {actual:?}")]
    StateMismatch {
        /// Human-readable description of the accepted state(s).
        expected: &'static str,
        /// The state the node was actually in.
        actual: NodeState,
    },

    /// The peer sent a frame of a different type than the protocol step
    /// expects.
    #[error("unexpected message: expected {expected:?}, got {got:?}")]
    UnexpectedMessage {
        /// The type this step waits for.
        expected: MessageType,
        /// The type that arrived.
        got: MessageType,
    },

    /// The frame header carried a type code we do not know.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),

    /// The peer announced a payload larger than we are willing to buffer.
    #[error("frame too large: {len} bytes (limit {limit})")]
    FrameTooLarge {
        /// Announced payload length.
        len: u64,
        /// Configured upper bound.
        limit: u64,
    },

    /// A payload did not decode into the record the step expects.
    #[error("malformed {what}: {reason}")]
    Malformed {
        /// Which record failed to decode.
        what: &'static str,
        /// Why.
        reason: String,
    },

    /// A session request or ack violated a protocol rule (bad mode,
    /// zero session id, mismatched final ack, ...).
    #[error("session rejected: {0}")]
    SessionRejected(String),

    /// The receipt signature recovered to someone other than the expected
    /// counterparty.
    #[error("receipt signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch {
        /// The buyer address we expected.
        expected: Address,
        /// The address the signature recovered to.
        recovered: Address,
    },

    /// Signing or signature recovery failed outright.
    #[error("signature error: {0}")]
    Signature(String),

    /// The peer did not complete a send or receive within the I/O timeout.
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, &'static str),

    /// Underlying stream failure (connection reset, EOF mid-frame, ...).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
