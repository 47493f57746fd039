//! # Seller Orchestrator
//!
//! Answers buyers on accepted connections. Each connection carries one
//! trade and runs in its own task; trades share only the [`TradeBook`].
//!
//! ```text
//! handshake ─► engine session ─► [nego] ─► request ─► response
//!   ─► receipt (signature, scheme, price) ─► deposit & expiry
//!   ─► reveal secret on the ledger ─► confirm
//! ```

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn, Instrument};

use crate::config;
use crate::engine::{ProofEngine, SellerProver};
use crate::ledger::{Ledger, SecretSubmission};
use crate::net::{NetError, Node};

use super::book::TradeBook;
use super::bulletin::Bulletin;
use super::buyer::checkpoint;
use super::cancel::Cancellation;
use super::error::{FailureCause, TradeError};
use super::mode::{Scheme, TradeMode};
use super::status::TxStatus;
use super::transaction::{Role, TradeId, Transaction};
use super::unix_now;

/// Seller-side tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SellerConfig {
    /// Minimum accepted price per delivered item, or for one VRF query.
    pub unit_price: U256,
    /// Bound on every send and receive.
    pub io_timeout: Duration,
    /// A receipt expiring sooner than this is not settled.
    pub expiry_margin: Duration,
}

impl Default for SellerConfig {
    fn default() -> Self {
        Self {
            unit_price: U256::from(1u64),
            io_timeout: config::DEFAULT_IO_TIMEOUT,
            expiry_margin: config::SECRET_EXPIRY_MARGIN,
        }
    }
}

/// Seller side of the protocol. Serves the bulletins it was given through
/// [`offer`](Self::offer).
pub struct Seller {
    config: SellerConfig,
    address: Address,
    engine: Arc<dyn ProofEngine>,
    ledger: Arc<dyn Ledger>,
    book: Arc<TradeBook>,
    offers: DashMap<(B256, TradeMode), Bulletin>,
}

impl Seller {
    /// `address` is announced to buyers and receives the payments; the
    /// ledger must hold listings published under it. Offers start empty.
    pub fn new(
        config: SellerConfig,
        address: Address,
        engine: Arc<dyn ProofEngine>,
        ledger: Arc<dyn Ledger>,
        book: Arc<TradeBook>,
    ) -> Self {
        Self {
            config,
            address,
            engine,
            ledger,
            book,
            offers: DashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn book(&self) -> &Arc<TradeBook> {
        &self.book
    }

    /// Offer a published bulletin. Buyers address it by root and mode.
    pub fn offer(&self, bulletin: Bulletin) {
        self.offers
            .insert((bulletin.sigma_merkle_root, bulletin.mode), bulletin);
    }

    /// Accept connections until cancelled, one trade task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut cancel: Cancellation) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), seller = %self.address, "seller listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "buyer connected");
                    let seller = Arc::clone(&self);
                    let trade_cancel = cancel.clone();
                    tokio::spawn(async move {
                        match seller.trade(stream, trade_cancel).await {
                            Ok(tx) => info!(%peer, session_id = tx.session_id, "trade closed"),
                            Err(e) => warn!(%peer, error = %e, "trade ended"),
                        }
                    });
                }
                _ = cancel.cancelled() => {
                    info!("seller shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Run one trade over a connected stream.
    pub async fn trade<S>(&self, stream: S, cancel: Cancellation) -> Result<Transaction, TradeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = tracing::info_span!(
            "sell",
            seller = %self.address,
            session_id = tracing::field::Empty,
        );
        self.run(stream, cancel).instrument(span).await
    }

    async fn run<S>(&self, stream: S, cancel: Cancellation) -> Result<Transaction, TradeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut node = Node::with_timeout(stream, self.config.io_timeout);

        let request = node
            .recv_session_request()
            .await
            .map_err(|e| TradeError::failed(TxStatus::SessionFailed, e))?;
        let mode = TradeMode::try_from(request.mode).map_err(|code| {
            TradeError::rejected(TxStatus::SessionFailed, format!("unknown trade mode {code}"))
        })?;
        let root = B256::from(request.sigma_merkle_root);
        let bulletin = self
            .offers
            .get(&(root, mode))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                TradeError::rejected(
                    TxStatus::InvalidBulletin,
                    format!("no {mode} offer for root {root}"),
                )
            })?;
        if request.extra_info.len() != config::ADDRESS_LENGTH {
            return Err(TradeError::rejected(
                TxStatus::SessionFailed,
                format!("buyer address is {} bytes", request.extra_info.len()),
            ));
        }
        let buyer = Address::from_slice(&request.extra_info);

        let session_id = rand::random::<u64>().max(1);
        async {
            node.send_session_ack(
                session_id,
                mode,
                request.sigma_merkle_root,
                self.address.as_slice(),
                true,
            )
            .await?;
            node.recv_session_ack(false).await
        }
        .await
        .map_err(|e| TradeError::failed(TxStatus::SessionFailed, e))?;
        tracing::Span::current().record("session_id", session_id);

        let id = TradeId {
            role: Role::Seller,
            session_id,
            seller: self.address,
            buyer,
        };
        let mut trade = self
            .book
            .open(Transaction::new(id, bulletin.clone(), None, self.config.unit_price))?;
        info!(session_id, %buyer, %mode, "session established");

        let mut prover = self
            .engine
            .seller_session(session_id, mode, &bulletin)
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
        let request = node
            .recv_tx_request()
            .await
            .map_err(|e| trade.fail(TxStatus::RequestFailed, e))?;
        let response = prover
            .on_request(&request)
            .map_err(|e| trade.fail(TxStatus::ResponseFailed, e))?;
        node.send_tx_response(&response)
            .await
            .map_err(|e| trade.fail(TxStatus::ResponseFailed, e))?;
        trade.set_status(TxStatus::ResponseSent)?;
        debug!(session_id, bytes = response.len(), "response sent");

        // Receipt: signature, scheme, price, then the engine's own check.
        checkpoint(&mut trade, &cancel)?;
        let signed = node
            .recv_tx_receipt(self.address, buyer)
            .await
            .map_err(|e| {
                let status = match &e {
                    NetError::SignerMismatch { .. }
                    | NetError::Signature(_)
                    | NetError::Malformed { .. } => TxStatus::InvalidReceipt,
                    _ => TxStatus::ReceiptFailed,
                };
                trade.fail(status, e)
            })?;
        let body = signed.body.clone();
        if body.receipt.scheme() != mode.scheme() {
            return Err(trade.fail(
                TxStatus::InvalidReceipt,
                FailureCause::Rejected(format!(
                    "{:?} receipt in a {mode} trade",
                    body.receipt.scheme()
                )),
            ));
        }
        let minimum = match (mode.scheme(), body.receipt.count()) {
            (Scheme::VrfQuery, _) | (_, None) => self.config.unit_price,
            (_, Some(count)) => self.config.unit_price.saturating_mul(U256::from(count)),
        };
        if body.price < minimum {
            return Err(trade.fail(
                TxStatus::InvalidReceipt,
                FailureCause::Rejected(format!("price {} below {minimum}", body.price)),
            ));
        }
        let secret = prover
            .on_receipt(&body.receipt)
            .map_err(|e| trade.fail(TxStatus::InvalidReceipt, e))?;
        trade.try_record(|tx| {
            tx.price = body.price;
            tx.expire_at = body.expire_at;
            tx.receipt_signature = Some(signed.signature_bytes().to_vec());
            tx.session.set_receipt(&body.receipt)?;
            tx.session.set_secret(&secret)
        })?;
        trade.set_status(TxStatus::ReceiptReceived)?;
        info!(session_id, price = %body.price, expire_at = body.expire_at, "receipt accepted");

        // Settlement preconditions. Nothing is written to the ledger when
        // either fails.
        checkpoint(&mut trade, &cancel)?;
        let reservation = self.book.deposits().reserve(self.address, buyer, body.price);
        let covered = self
            .ledger
            .verify_deposit(self.address, buyer, reservation.total())
            .await
            .map_err(|e| trade.fail(TxStatus::SendSecretTerminated, e))?;
        if !covered {
            return Err(trade.fail(
                TxStatus::SendSecretTerminated,
                FailureCause::Rejected(format!(
                    "buyer deposit does not cover {} locked",
                    reservation.total()
                )),
            ));
        }
        let margin = self.config.expiry_margin.as_secs();
        if body.expire_at.saturating_sub(unix_now()) < margin {
            return Err(trade.fail(
                TxStatus::SendSecretTerminated,
                FailureCause::Rejected(format!(
                    "receipt expires at {}, less than {margin}s away",
                    body.expire_at
                )),
            ));
        }

        let submission = SecretSubmission {
            session_id,
            seller: self.address,
            buyer,
            bulletin_key: bulletin.key(),
            price: body.price,
            expire_at: body.expire_at,
            receipt: body.receipt.clone(),
            receipt_signature: signed.signature_bytes().to_vec(),
            secret: secret.clone(),
        };
        let settlement_tx = self
            .ledger
            .submit_secret(&submission)
            .await
            .map_err(|e| trade.fail(TxStatus::SendSecretFailed, e))?;
        match self.ledger.read_secret(session_id, self.address, buyer).await {
            Ok(Some(revealed)) if revealed == secret => {}
            Ok(_) => {
                return Err(trade.fail(
                    TxStatus::SendSecretFailed,
                    FailureCause::Rejected("secret not visible on the ledger".into()),
                ))
            }
            Err(e) => return Err(trade.fail(TxStatus::SendSecretFailed, e)),
        }
        drop(reservation);
        trade.record(|tx| tx.settlement_tx = Some(settlement_tx));
        trade.set_status(TxStatus::SecretSent)?;
        info!(session_id, %settlement_tx, "secret revealed");

        trade.set_status(TxStatus::Closed)?;
        Ok(trade.snapshot())
    }
}

/// OT negotiation, seller side.
async fn negotiate<S>(node: &mut Node<S>, prover: &mut dyn SellerProver) -> Result<(), FailureCause>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let buyer_request = node.recv_nego_request().await?;
    let response = prover.on_nego_request(&buyer_request)?;
    let request = prover.nego_request()?;
    node.send_nego_ack_req(&response, &request).await?;
    let answer = node.recv_nego_ack().await?;
    prover.on_nego_response(&answer)?;
    Ok(())
}
