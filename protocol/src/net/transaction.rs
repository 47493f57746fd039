//! # Transaction Round
//!
//! ```text
//!   Buyer                                              Seller
//!     │  TxRequest   (engine request)                    │
//!     ├─────────────────────────────────────────────────►│
//!     │  TxResponse  (encrypted response)                │
//!     │◄─────────────────────────────────────────────────┤
//!     │  TxReceipt   (signature ‖ receipt body)          │
//!     ├─────────────────────────────────────────────────►│
//!  TxSecretWait                                   TxReceiptRecvd
//! ```
//!
//! The round starts from `SessionEstablished` (plain modes) or
//! `Negotiated` (OT modes). Nothing is sent after the receipt: the seller
//! reveals the secret through the ledger, never over the wire.

use alloy_primitives::Address;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::trade::SignedReceipt;

use super::error::NetError;
use super::frame::MessageType;
use super::node::{Node, NodeState};

const ROUND_START: &[NodeState] = &[NodeState::SessionEstablished, NodeState::Negotiated];
const ROUND_START_DESC: &str = "SessionEstablished or Negotiated";

impl<S> Node<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Buyer: send the proof-engine request. `→ TxResponseWait`.
    pub async fn send_tx_request(&mut self, request: &[u8]) -> Result<(), NetError> {
        self.send_step(
            MessageType::TxRequest,
            request,
            ROUND_START,
            ROUND_START_DESC,
            NodeState::TxResponseWait,
        )
        .await
    }

    /// Seller: receive the buyer's request. `→ TxRequestRecvd`.
    pub async fn recv_tx_request(&mut self) -> Result<Vec<u8>, NetError> {
        let request = self
            .recv_checked(MessageType::TxRequest, ROUND_START, ROUND_START_DESC)
            .await?;
        self.set_state(NodeState::TxRequestRecvd);
        Ok(request)
    }

    /// Seller: send the encrypted response. `TxRequestRecvd → TxReceiptWait`.
    pub async fn send_tx_response(&mut self, response: &[u8]) -> Result<(), NetError> {
        self.send_step(
            MessageType::TxResponse,
            response,
            &[NodeState::TxRequestRecvd],
            "TxRequestRecvd",
            NodeState::TxReceiptWait,
        )
        .await
    }

    /// Buyer: receive the response. `TxResponseWait → TxResponseRecvd`.
    pub async fn recv_tx_response(&mut self) -> Result<Vec<u8>, NetError> {
        let response = self
            .recv_checked(MessageType::TxResponse, &[NodeState::TxResponseWait], "TxResponseWait")
            .await?;
        self.set_state(NodeState::TxResponseRecvd);
        Ok(response)
    }

    /// Buyer: send the signed receipt. `TxResponseRecvd → TxSecretWait`.
    pub async fn send_tx_receipt(&mut self, receipt: &SignedReceipt) -> Result<(), NetError> {
        self.expect_state(&[NodeState::TxResponseRecvd], "TxResponseRecvd")?;
        let payload = receipt.encode()?;
        self.send(MessageType::TxReceipt, &payload).await?;
        self.set_state(NodeState::TxSecretWait);
        Ok(())
    }

    /// Seller: receive the signed receipt and check it was signed by
    /// `buyer` for this session. `TxReceiptWait → TxReceiptRecvd`.
    pub async fn recv_tx_receipt(&mut self, seller: Address, buyer: Address) -> Result<SignedReceipt, NetError> {
        let session = self.require_session()?;
        let raw = self
            .recv_checked(MessageType::TxReceipt, &[NodeState::TxReceiptWait], "TxReceiptWait")
            .await?;
        let receipt = SignedReceipt::decode(&raw)?;
        receipt.verify(session.id, seller, buyer)?;
        self.set_state(NodeState::TxReceiptRecvd);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{ComplaintReceipt, Receipt, ReceiptBody, TradeMode};
    use alloy_primitives::{B256, U256};
    use alloy_signer_local::PrivateKeySigner;
    use tokio::io::DuplexStream;

    async fn established(mode: TradeMode) -> (Node<DuplexStream>, Node<DuplexStream>) {
        let (a, b) = tokio::io::duplex(8192);
        let (mut buyer, mut seller) = (Node::new(a), Node::new(b));
        let root = [7u8; 32];
        let buyer_side = async {
            buyer.send_new_session_request(mode, &root, b"").await.unwrap();
            buyer.recv_session_ack(false).await.unwrap();
        };
        let seller_side = async {
            seller.recv_session_request().await.unwrap();
            seller.send_session_ack(77, mode, root, b"", false).await.unwrap();
        };
        tokio::join!(buyer_side, seller_side);
        (buyer, seller)
    }

    fn body() -> ReceiptBody {
        ReceiptBody {
            price: U256::from(100u64),
            expire_at: 2_000_000_000,
            receipt: Receipt::Complaint(ComplaintReceipt {
                seed2: B256::repeat_byte(1),
                k_root: B256::repeat_byte(2),
                count: 10,
            }),
        }
    }

    #[tokio::test]
    async fn full_round_with_verified_receipt() {
        let (mut buyer, mut seller) = established(TradeMode::PlainComplaint).await;
        let key = PrivateKeySigner::random();
        let seller_addr = Address::repeat_byte(0x5E);
        let signed = SignedReceipt::sign(&key, 77, seller_addr, key.address(), body()).unwrap();

        let buyer_side = async {
            buyer.send_tx_request(b"request").await.unwrap();
            assert_eq!(buyer.recv_tx_response().await.unwrap(), b"response");
            buyer.send_tx_receipt(&signed).await.unwrap();
        };
        let seller_side = async {
            assert_eq!(seller.recv_tx_request().await.unwrap(), b"request");
            seller.send_tx_response(b"response").await.unwrap();
            seller.recv_tx_receipt(seller_addr, key.address()).await.unwrap()
        };
        let ((), received) = tokio::join!(buyer_side, seller_side);

        assert_eq!(received.body, body());
        assert_eq!(buyer.state(), NodeState::TxSecretWait);
        assert_eq!(seller.state(), NodeState::TxReceiptRecvd);
    }

    #[tokio::test]
    async fn receipt_from_wrong_signer_rejected() {
        let (mut buyer, mut seller) = established(TradeMode::PlainComplaint).await;
        let impostor = PrivateKeySigner::random();
        let real_buyer = Address::repeat_byte(0xB0);
        let seller_addr = Address::repeat_byte(0x5E);
        let signed = SignedReceipt::sign(&impostor, 77, seller_addr, real_buyer, body()).unwrap();

        let buyer_side = async {
            buyer.send_tx_request(b"q").await.unwrap();
            buyer.recv_tx_response().await.unwrap();
            buyer.send_tx_receipt(&signed).await.unwrap();
        };
        let seller_side = async {
            seller.recv_tx_request().await.unwrap();
            seller.send_tx_response(b"r").await.unwrap();
            seller.recv_tx_receipt(seller_addr, real_buyer).await
        };
        let ((), result) = tokio::join!(buyer_side, seller_side);

        assert!(matches!(result, Err(NetError::SignerMismatch { .. })));
        assert_eq!(seller.state(), NodeState::TxReceiptWait);
    }

    #[tokio::test]
    async fn round_refused_before_session() {
        let (a, _b) = tokio::io::duplex(64);
        let mut node = Node::new(a);
        assert!(matches!(
            node.send_tx_request(b"x").await,
            Err(NetError::StateMismatch { .. })
        ));
        assert!(matches!(
            node.recv_tx_request().await,
            Err(NetError::StateMismatch { .. })
        ));
        assert!(matches!(
            node.send_tx_response(b"x").await,
            Err(NetError::StateMismatch { .. })
        ));
        assert!(matches!(
            node.recv_tx_response().await,
            Err(NetError::StateMismatch { .. })
        ));
        assert!(matches!(
            node.recv_tx_receipt(Address::ZERO, Address::ZERO).await,
            Err(NetError::StateMismatch { .. })
        ));
        assert_eq!(node.state(), NodeState::Connected);
    }

    #[tokio::test]
    async fn receipt_cannot_precede_response() {
        let (mut buyer, _seller) = established(TradeMode::PlainComplaint).await;
        let key = PrivateKeySigner::random();
        let signed = SignedReceipt::sign(&key, 77, Address::ZERO, key.address(), body()).unwrap();
        assert!(matches!(
            buyer.send_tx_receipt(&signed).await,
            Err(NetError::StateMismatch { .. })
        ));
        buyer.send_tx_request(b"q").await.unwrap();
        assert!(matches!(
            buyer.send_tx_receipt(&signed).await,
            Err(NetError::StateMismatch { .. })
        ));
        assert!(matches!(
            buyer.send_tx_request(b"again").await,
            Err(NetError::StateMismatch { .. })
        ));
        assert_eq!(buyer.state(), NodeState::TxResponseWait);
    }
}
