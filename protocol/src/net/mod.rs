//! # Peer Wire Protocol
//!
//! Byte-level plumbing between one buyer and one seller: framing, the
//! fixed-layout records, and the three state machines (session handshake,
//! OT negotiation, transaction round) implemented as methods on a
//! [`Node`].
//!
//! ```text
//! frame.rs        — type + length framing over any async byte stream
//! record.rs       — session request/ack and nego ack+request layouts
//! node.rs         — Node: one connection, its state, timed I/O
//! session.rs      — handshake establishing {id, mode}
//! nego.rs         — OT key-material exchange
//! transaction.rs  — request → response → signed receipt
//! error.rs        — NetError
//! ```

pub mod error;
pub mod frame;
pub mod nego;
pub mod node;
pub mod record;
pub mod session;
pub mod transaction;

pub use error::NetError;
pub use frame::{read_frame, write_frame, FrameHeader, MessageType};
pub use node::{Node, NodeState, Session};
pub use record::{SessionAck, SessionRecord, SessionRequest};
