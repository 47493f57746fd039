//! # Buyer Orchestrator
//!
//! One generic flow for every mode. The mode decides three things only:
//! whether negotiation runs (OT), how the price is computed (flat for
//! VRF queries), and what happens with a bad secret (claim for complaint
//! modes, dead end otherwise).
//!
//! ```text
//! data status ─► handshake ─► engine session ─► [nego] ─► request
//!   ─► response ─► receipt ─► sign & send ─► poll secret ─► verify
//!   ─► decrypt | positions | claim
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn, Instrument};

use crate::config;
use crate::engine::{BuyerProver, BuyerSessionParams, ProofEngine, SecretCheck};
use crate::ledger::{ClaimSubmission, DataStatus, Ledger};
use crate::net::Node;

use super::book::{LiveTrade, TradeBook};
use super::bulletin::Bulletin;
use super::cancel::Cancellation;
use super::error::{FailureCause, TradeError};
use super::mode::Scheme;
use super::receipt::{ReceiptBody, Secret, SignedReceipt};
use super::selection::Selection;
use super::status::TxStatus;
use super::transaction::{Role, TradeId, Transaction};
use super::unix_now;

/// Buyer-side tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyerConfig {
    /// Bound on every send and receive.
    pub io_timeout: Duration,
    /// How long the seller may take to settle a receipt.
    pub receipt_ttl: Duration,
    /// Interval between ledger polls for the secret.
    pub poll_interval: Duration,
    /// Decrypted data lands in `<output_dir>/<session_id>.out`.
    pub output_dir: PathBuf,
}

impl Default for BuyerConfig {
    fn default() -> Self {
        Self {
            io_timeout: config::DEFAULT_IO_TIMEOUT,
            receipt_ttl: config::RECEIPT_TTL,
            poll_interval: config::SECRET_POLL_INTERVAL,
            output_dir: PathBuf::from("pod-output"),
        }
    }
}

/// What to buy, from whom, at what price.
#[derive(Debug, Clone)]
pub struct BuyOrder {
    /// Must match the address the seller announces in its session ack.
    pub seller: Address,
    /// Listing to buy from. Checked live on the ledger first.
    pub bulletin: Bulletin,
    /// Validated against the bulletin before connecting.
    pub selection: Selection,
    /// Price per demanded item, or the flat price of a VRF query.
    pub unit_price: U256,
}

/// Buyer side of the protocol. One instance runs any number of trades
/// concurrently, each over its own stream.
pub struct Buyer {
    config: BuyerConfig,
    signer: PrivateKeySigner,
    engine: Arc<dyn ProofEngine>,
    ledger: Arc<dyn Ledger>,
    book: Arc<TradeBook>,
}

impl Buyer {
    /// `signer` signs receipts; its address identifies the buyer to sellers
    /// and the ledger. Trade records go to `book`.
    pub fn new(
        config: BuyerConfig,
        signer: PrivateKeySigner,
        engine: Arc<dyn ProofEngine>,
        ledger: Arc<dyn Ledger>,
        book: Arc<TradeBook>,
    ) -> Self {
        Self {
            config,
            signer,
            engine,
            ledger,
            book,
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Live and stored buyer-side trades.
    pub fn book(&self) -> &Arc<TradeBook> {
        &self.book
    }

    /// Run one trade over a freshly connected stream to `order.seller`.
    ///
    /// Returns the final record on `CLOSED` (including a successful claim)
    /// and an error carrying the terminal status otherwise.
    pub async fn trade<S>(&self, stream: S, order: BuyOrder, cancel: Cancellation) -> Result<Transaction, TradeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = tracing::info_span!(
            "buy",
            mode = %order.bulletin.mode,
            seller = %order.seller,
            session_id = tracing::field::Empty,
        );
        self.run(stream, order, cancel).instrument(span).await
    }

    async fn run<S>(&self, stream: S, order: BuyOrder, cancel: Cancellation) -> Result<Transaction, TradeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mode = order.bulletin.mode;
        order.selection.validate(&order.bulletin)?;

        // Bulletin must be live on the ledger before any traffic.
        match self.ledger.read_data_status(order.bulletin.key()).await {
            Ok(DataStatus::Ok) => {}
            Ok(other) => {
                return Err(TradeError::rejected(
                    TxStatus::InvalidBulletin,
                    format!("bulletin status is {other:?}"),
                ))
            }
            Err(e) => return Err(TradeError::failed(TxStatus::InvalidBulletin, e)),
        }

        // Handshake. No record exists until the session id is known.
        let mut node = Node::with_timeout(stream, self.config.io_timeout);
        let root = order.bulletin.sigma_merkle_root;
        let me = self.address();
        let session_id = async {
            node.send_new_session_request(mode, root.as_slice(), me.as_slice())
                .await?;
            let ack = node.recv_session_ack(true).await?;
            if ack.extra_info != order.seller.as_slice() {
                return Err(FailureCause::Rejected(format!(
                    "session ack from {}, expected {}",
                    hex::encode(&ack.extra_info),
                    order.seller
                )));
            }
            node.send_session_ack(ack.id, mode, ack.sigma_merkle_root, me.as_slice(), false)
                .await?;
            Ok(ack.id)
        }
        .await
        .map_err(|cause| TradeError::failed(TxStatus::SessionFailed, cause))?;
        tracing::Span::current().record("session_id", session_id);

        let id = TradeId {
            role: Role::Buyer,
            session_id,
            seller: order.seller,
            buyer: me,
        };
        let mut trade = self.book.open(Transaction::new(
            id,
            order.bulletin.clone(),
            Some(order.selection.clone()),
            order.unit_price,
        ))?;
        info!(session_id, "session established");

        let mut prover = self
            .engine
            .buyer_session(&BuyerSessionParams {
                session_id,
                mode,
                bulletin: order.bulletin.clone(),
                selection: order.selection.clone(),
            })
            .map_err(|e| trade.fail(TxStatus::InvalidSession, e))?;

        if mode.is_ot() {
            checkpoint(&mut trade, &cancel)?;
            negotiate(&mut node, prover.as_mut())
                .await
                .map_err(|cause| trade.fail(TxStatus::NegoFailed, cause))?;
            trade.set_status(TxStatus::Negotiated)?;
        }

        // Request / response.
        checkpoint(&mut trade, &cancel)?;
        let request = prover
            .request()
            .map_err(|e| trade.fail(TxStatus::RequestFailed, e))?;
        node.send_tx_request(&request)
            .await
            .map_err(|e| trade.fail(TxStatus::RequestFailed, e))?;
        trade.set_status(TxStatus::RequestSent)?;

        checkpoint(&mut trade, &cancel)?;
        let response = node
            .recv_tx_response()
            .await
            .map_err(|e| trade.fail(TxStatus::ResponseFailed, e))?;
        trade.set_status(TxStatus::ResponseReceived)?;
        debug!(session_id, bytes = response.len(), "response received");

        let receipt = prover
            .on_response(&response)
            .map_err(|e| trade.fail(TxStatus::InvalidResponse, e))?;
        trade.try_record(|tx| tx.session.set_receipt(&receipt))?;
        trade.set_status(TxStatus::ReceiptCreated)?;

        // Sign and send the receipt.
        let price = match (mode.scheme(), receipt.count()) {
            (Scheme::VrfQuery, _) | (_, None) => order.unit_price,
            (_, Some(count)) => order.unit_price.saturating_mul(U256::from(count)),
        };
        let expire_at = unix_now() + self.config.receipt_ttl.as_secs();
        let body = ReceiptBody {
            price,
            expire_at,
            receipt: receipt.clone(),
        };
        checkpoint(&mut trade, &cancel)?;
        let signed = SignedReceipt::sign(&self.signer, session_id, order.seller, me, body)
            .map_err(|e| trade.fail(TxStatus::ReceiptFailed, e))?;
        node.send_tx_receipt(&signed)
            .await
            .map_err(|e| trade.fail(TxStatus::ReceiptFailed, e))?;
        trade.record(|tx| {
            tx.price = price;
            tx.expire_at = expire_at;
            tx.receipt_signature = Some(signed.signature_bytes().to_vec());
        });
        trade.set_status(TxStatus::ReceiptSent)?;
        info!(session_id, %price, expire_at, "receipt sent");

        // The secret comes through the ledger.
        let secret = self
            .poll_secret(&mut trade, &cancel)
            .await?;
        trade.try_record(|tx| tx.session.set_secret(&secret))?;
        trade.set_status(TxStatus::SecretReceived)?;

        match prover.on_secret(&secret) {
            SecretCheck::Valid => {
                trade.set_status(TxStatus::SecretVerified)?;
                let output = self.config.output_dir.join(format!("{session_id}.out"));
                prover
                    .decrypt(&output)
                    .map_err(|e| trade.fail(TxStatus::DecryptFailed, e))?;
                trade.record(|tx| tx.output = Some(output.clone()));
                info!(session_id, output = %output.display(), "data decrypted");
            }
            SecretCheck::Positions(positions) => {
                trade.try_record(|tx| tx.session.set_positions(positions))?;
                trade.set_status(TxStatus::SecretVerified)?;
            }
            SecretCheck::Invalid(reason) => {
                warn!(session_id, %reason, "secret does not check");
                trade.record(|tx| tx.failure = Some(reason.clone()));
                trade.set_status(TxStatus::InvalidSecret)?;
                if !mode.has_claim_path() {
                    return Err(trade.fail(TxStatus::InvalidSecret, FailureCause::Rejected(reason)));
                }
                self.claim(&mut trade, prover.as_mut(), &order).await?;
            }
        }

        trade.set_status(TxStatus::Closed)?;
        Ok(trade.snapshot())
    }

    async fn poll_secret(&self, trade: &mut LiveTrade, cancel: &Cancellation) -> Result<Secret, TradeError> {
        let tx = trade.tx();
        let (session_id, seller, buyer, expire_at) = (tx.session_id, tx.seller, tx.buyer, tx.expire_at);
        loop {
            checkpoint(trade, cancel)?;
            match self.ledger.read_secret(session_id, seller, buyer).await {
                Ok(Some(secret)) => return Ok(secret),
                Ok(None) if unix_now() >= expire_at => {
                    return Err(trade.fail(
                        TxStatus::ReadSecretFailed,
                        FailureCause::Rejected("receipt expired before the secret was revealed".into()),
                    ))
                }
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => return Err(trade.fail(TxStatus::ReadSecretFailed, e)),
            }
        }
    }

    async fn claim(
        &self,
        trade: &mut LiveTrade,
        prover: &mut dyn BuyerProver,
        order: &BuyOrder,
    ) -> Result<(), TradeError> {
        let claim = prover
            .claim()
            .map_err(|e| trade.fail(TxStatus::SendClaimFailed, e))?;
        trade.try_record(|tx| tx.session.set_claim(claim.clone()))?;
        let Some(receipt) = trade.tx().session.receipt() else {
            return Err(trade.fail(
                TxStatus::SendClaimFailed,
                FailureCause::Rejected("no receipt recorded".into()),
            ));
        };
        let tx = trade.tx();
        let submission = ClaimSubmission {
            session_id: tx.session_id,
            seller: tx.seller,
            buyer: tx.buyer,
            bulletin_key: order.bulletin.key(),
            receipt,
            claim,
        };
        let claim_tx = self
            .ledger
            .submit_claim(&submission)
            .await
            .map_err(|e| trade.fail(TxStatus::SendClaimFailed, e))?;
        trade.record(|tx| tx.claim_tx = Some(claim_tx));
        trade.set_status(TxStatus::SendClaim)?;
        info!(session_id = submission.session_id, %claim_tx, "claim filed");
        Ok(())
    }
}

/// OT negotiation, buyer side.
async fn negotiate<S>(node: &mut Node<S>, prover: &mut dyn BuyerProver) -> Result<(), FailureCause>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let request = prover.nego_request()?;
    node.send_nego_request(&request).await?;
    let (response, seller_request) = node.recv_nego_ack_req().await?;
    prover.on_nego_response(&response)?;
    let answer = prover.on_nego_request(&seller_request)?;
    node.send_nego_ack(&answer).await?;
    Ok(())
}

pub(super) fn checkpoint(trade: &mut LiveTrade, cancel: &Cancellation) -> Result<(), TradeError> {
    if cancel.is_cancelled() {
        return Err(trade.fail(TxStatus::Cancelled, FailureCause::Cancelled));
    }
    Ok(())
}
