//! # Session Handshake
//!
//! Establishes a shared session identifier and trade mode between two
//! peers. Three messages in the normal flow:
//!
//! ```text
//!   Buyer (initiator)                                  Seller (responder)
//!        │  SessionRequest { id: 0, mode, root, extra }      │
//!        ├──────────────────────────────────────────────────►│
//!        │  SessionAck { id: N, mode, root, extra } (prelim) │
//!        │◄──────────────────────────────────────────────────┤
//!        │  SessionAck { id: N, mode, root, extra } (final)  │
//!        ├──────────────────────────────────────────────────►│
//!   SessionEstablished                              SessionEstablished
//! ```
//!
//! The responder may also finalize directly with its first ack
//! (`need_further_ack = false`), in which case the initiator must receive
//! that ack with `need_further_ack = false` as well.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config;
use crate::trade::TradeMode;

use super::error::NetError;
use super::frame::MessageType;
use super::node::{Node, NodeState, Session};
use super::record::{SessionAck, SessionRecord, SessionRequest};

impl<S> Node<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Initiator: ask the peer to allocate a new session.
    ///
    /// Requires `Connected`; moves to `SessionAckWait`. The merkle root must
    /// be exactly 32 bytes.
    pub async fn send_new_session_request(
        &mut self,
        mode: TradeMode,
        sigma_merkle_root: &[u8],
        extra_info: &[u8],
    ) -> Result<(), NetError> {
        self.expect_state(&[NodeState::Connected], "Connected")?;
        let root: [u8; 32] = sigma_merkle_root.try_into().map_err(|_| {
            NetError::SessionRejected(format!(
                "sigma merkle root must be {} bytes, got {}",
                config::MERKLE_ROOT_LENGTH,
                sigma_merkle_root.len()
            ))
        })?;

        let request = SessionRequest {
            id: 0,
            mode: mode.code(),
            sigma_merkle_root: root,
            extra_info: extra_info.to_vec(),
        };
        self.send(MessageType::SessionRequest, &request.encode())
            .await?;
        self.set_state(NodeState::SessionAckWait);
        Ok(())
    }

    /// Responder: receive a session request.
    ///
    /// Requires `Connected`; moves to `SessionReqRecvd`. A new-session
    /// request (`id == 0`) carrying a mode at or above `MODE_MAX` is
    /// rejected.
    pub async fn recv_session_request(&mut self) -> Result<SessionRequest, NetError> {
        let raw = self
            .recv_checked(MessageType::SessionRequest, &[NodeState::Connected], "Connected")
            .await?;
        let request = SessionRecord::decode(&raw)?;
        if request.id == 0 && request.mode >= config::MODE_MAX {
            return Err(NetError::SessionRejected(format!(
                "unknown trade mode {}",
                request.mode
            )));
        }
        self.set_state(NodeState::SessionReqRecvd);
        Ok(request)
    }

    /// Send a session ack.
    ///
    /// Responder: valid in `SessionReqRecvd`. With `need_further_ack` the
    /// node waits for the initiator's final ack (`SessionAckWait`);
    /// otherwise the session is established immediately.
    ///
    /// Initiator: valid in `SessionAckRecvd`, always final. The `{id, mode}`
    /// must repeat what the responder proposed.
    pub async fn send_session_ack(
        &mut self,
        id: u64,
        mode: TradeMode,
        sigma_merkle_root: [u8; 32],
        extra_info: &[u8],
        need_further_ack: bool,
    ) -> Result<(), NetError> {
        self.expect_state(
            &[NodeState::SessionReqRecvd, NodeState::SessionAckRecvd],
            "SessionReqRecvd or SessionAckRecvd",
        )?;
        if id == 0 {
            return Err(NetError::SessionRejected(
                "session ack must carry a non-zero id".to_string(),
            ));
        }
        let initiator = self.state() == NodeState::SessionAckRecvd;
        let proposed = Session { id, mode };
        if initiator {
            if need_further_ack {
                return Err(NetError::SessionRejected(
                    "initiator's session ack is always final".to_string(),
                ));
            }
            if self.pending != Some(proposed) {
                return Err(NetError::SessionRejected(format!(
                    "final ack {:?} does not match proposed session {:?}",
                    proposed, self.pending
                )));
            }
        }

        let ack = SessionAck {
            id,
            mode: mode.code(),
            sigma_merkle_root,
            extra_info: extra_info.to_vec(),
        };
        self.send(MessageType::SessionAck, &ack.encode()).await?;

        if need_further_ack {
            self.pending = Some(proposed);
            self.set_state(NodeState::SessionAckWait);
        } else {
            self.establish(proposed);
        }
        Ok(())
    }

    /// Receive a session ack.
    ///
    /// Valid in `SessionAckWait`. The initiator passes
    /// `need_further_ack = true` for a preliminary ack (moves to
    /// `SessionAckRecvd`, a final ack of its own is due); `false` finalizes
    /// to `SessionEstablished`. A responder receiving the final ack requires
    /// it to repeat the session it proposed.
    pub async fn recv_session_ack(&mut self, need_further_ack: bool) -> Result<SessionAck, NetError> {
        let raw = self
            .recv_checked(MessageType::SessionAck, &[NodeState::SessionAckWait], "SessionAckWait")
            .await?;
        let ack = SessionRecord::decode(&raw)?;
        if ack.id == 0 {
            return Err(NetError::SessionRejected(
                "session ack carries id 0".to_string(),
            ));
        }
        let mode = TradeMode::try_from(ack.mode)
            .map_err(|_| NetError::SessionRejected(format!("unknown trade mode {}", ack.mode)))?;
        let session = Session { id: ack.id, mode };

        if let Some(pending) = self.pending {
            if pending != session {
                return Err(NetError::SessionRejected(format!(
                    "ack {:?} does not match proposed session {:?}",
                    session, pending
                )));
            }
        }

        if need_further_ack {
            self.pending = Some(session);
            self.set_state(NodeState::SessionAckRecvd);
        } else {
            self.establish(session);
        }
        Ok(ack)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const ROOT: [u8; 32] = [0x11; 32];

    fn pair() -> (Node<DuplexStream>, Node<DuplexStream>) {
        let (a, b) = tokio::io::duplex(4096);
        (Node::new(a), Node::new(b))
    }

    #[tokio::test]
    async fn three_message_handshake_converges() {
        let (mut buyer, mut seller) = pair();
        let mode = TradeMode::PlainOtComplaint;

        let buyer_side = async {
            buyer
                .send_new_session_request(mode, &ROOT, b"buyer")
                .await
                .unwrap();
            let ack = buyer.recv_session_ack(true).await.unwrap();
            let mode = TradeMode::try_from(ack.mode).unwrap();
            buyer
                .send_session_ack(ack.id, mode, ack.sigma_merkle_root, b"buyer", false)
                .await
                .unwrap();
        };
        let seller_side = async {
            let request = seller.recv_session_request().await.unwrap();
            assert_eq!(request.id, 0);
            assert_eq!(request.extra_info, b"buyer");
            let mode = TradeMode::try_from(request.mode).unwrap();
            seller
                .send_session_ack(42, mode, request.sigma_merkle_root, b"seller", true)
                .await
                .unwrap();
            seller.recv_session_ack(false).await.unwrap();
        };
        tokio::join!(buyer_side, seller_side);

        assert_eq!(buyer.state(), NodeState::SessionEstablished);
        assert_eq!(seller.state(), NodeState::SessionEstablished);
        assert_eq!(buyer.session(), seller.session());
        assert_eq!(buyer.session(), Some(Session { id: 42, mode }));
    }

    #[tokio::test]
    async fn single_ack_handshake_converges() {
        let (mut buyer, mut seller) = pair();
        let mode = TradeMode::TableVrfQuery;

        let buyer_side = async {
            buyer.send_new_session_request(mode, &ROOT, b"").await.unwrap();
            buyer.recv_session_ack(false).await.unwrap();
        };
        let seller_side = async {
            seller.recv_session_request().await.unwrap();
            seller
                .send_session_ack(9, mode, ROOT, b"", false)
                .await
                .unwrap();
        };
        tokio::join!(buyer_side, seller_side);

        assert_eq!(buyer.session(), Some(Session { id: 9, mode }));
        assert_eq!(seller.session(), Some(Session { id: 9, mode }));
    }

    #[tokio::test]
    async fn bad_merkle_root_length_rejected_without_state_change() {
        let (mut buyer, _seller) = pair();
        let err = buyer
            .send_new_session_request(TradeMode::PlainComplaint, &[0u8; 31], b"")
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::SessionRejected(_)));
        assert_eq!(buyer.state(), NodeState::Connected);
    }

    #[tokio::test]
    async fn out_of_range_mode_rejected_by_responder() {
        let (a, b) = tokio::io::duplex(4096);
        let mut raw = a;
        let mut seller = Node::new(b);

        let request = SessionRecord {
            id: 0,
            mode: config::MODE_MAX,
            sigma_merkle_root: ROOT,
            extra_info: vec![],
        };
        super::super::frame::write_frame(&mut raw, MessageType::SessionRequest, &request.encode())
            .await
            .unwrap();

        let err = seller.recv_session_request().await.unwrap_err();
        assert!(matches!(err, NetError::SessionRejected(_)));
        assert_eq!(seller.state(), NodeState::Connected);
    }

    #[tokio::test]
    async fn zero_id_ack_rejected() {
        let (mut buyer, mut seller) = pair();
        buyer
            .send_new_session_request(TradeMode::PlainComplaint, &ROOT, b"")
            .await
            .unwrap();
        seller.recv_session_request().await.unwrap();
        let err = seller
            .send_session_ack(0, TradeMode::PlainComplaint, ROOT, b"", true)
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::SessionRejected(_)));
        assert_eq!(seller.state(), NodeState::SessionReqRecvd);
    }

    #[tokio::test]
    async fn mismatched_final_ack_rejected() {
        let (mut buyer, mut seller) = pair();
        let mode = TradeMode::PlainComplaint;
        buyer.send_new_session_request(mode, &ROOT, b"").await.unwrap();
        seller.recv_session_request().await.unwrap();
        seller.send_session_ack(5, mode, ROOT, b"", true).await.unwrap();
        buyer.recv_session_ack(true).await.unwrap();

        let err = buyer
            .send_session_ack(6, mode, ROOT, b"", false)
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::SessionRejected(_)));
        assert_eq!(buyer.state(), NodeState::SessionAckRecvd);
    }

    #[tokio::test]
    async fn handshake_ops_refused_in_wrong_state() {
        let (mut buyer, _seller) = pair();
        let mode = TradeMode::PlainComplaint;

        // Nothing but a request (or a peer's request) is valid on a fresh node.
        assert!(matches!(
            buyer.send_session_ack(1, mode, ROOT, b"", false).await,
            Err(NetError::StateMismatch { .. })
        ));
        assert!(matches!(
            buyer.recv_session_ack(false).await,
            Err(NetError::StateMismatch { .. })
        ));
        assert_eq!(buyer.state(), NodeState::Connected);

        buyer.send_new_session_request(mode, &ROOT, b"").await.unwrap();
        assert!(matches!(
            buyer.send_new_session_request(mode, &ROOT, b"").await,
            Err(NetError::StateMismatch { .. })
        ));
        assert!(matches!(
            buyer.recv_session_request().await,
            Err(NetError::StateMismatch { .. })
        ));
        assert_eq!(buyer.state(), NodeState::SessionAckWait);
    }
}
