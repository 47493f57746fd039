//! # Settlement Contract
//!
//! An in-memory model of the on-chain settlement contract. It holds buyer
//! deposits per seller, accepts a seller's secret against a buyer-signed
//! receipt, and lets the buyer of a complaint-mode trade reclaim the price
//! with a claim while the claim window is open.
//!
//! ## Lifecycle
//!
//! 1. **Publish**: the seller registers a bulletin under its content key.
//! 2. **Deposit**: the buyer locks funds towards one seller.
//! 3. **Reveal**: the seller submits the secret with the signed receipt.
//!    The price moves from the deposit into escrow.
//! 4. **Claim**: within the window, a valid claim refunds the escrowed
//!    price to the buyer's deposit.
//! 5. **Release**: after the window, the escrowed price is paid out to
//!    the seller.
//!
//! Every successful state change counts as one ledger write, so tests can
//! assert that a flow left the chain untouched.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, Signature, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use pod_protocol::engine::complaint::verify_claim;
use pod_protocol::ledger::{ClaimSubmission, DataStatus, Ledger, LedgerError, SecretSubmission};
use pod_protocol::trade::{unix_now, Bulletin, Receipt, ReceiptBody, Secret, SignedReceipt};

/// Default time a buyer has to file a claim after the secret is revealed.
pub const DEFAULT_CLAIM_WINDOW: Duration = Duration::from_secs(24 * 3600);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("bulletin {0} is not published")]
    UnknownBulletin(B256),

    #[error("bulletin {0} has been revoked")]
    Revoked(B256),

    /// The caller does not own the bulletin it is acting on.
    #[error("{caller} does not own bulletin {key}")]
    NotOwner { caller: Address, key: B256 },

    #[error("receipt expired at {expire_at}, now {now}")]
    ReceiptExpired { expire_at: u64, now: u64 },

    #[error("invalid receipt signature: {0}")]
    InvalidSignature(String),

    #[error("insufficient deposit: need {needed}, have {available}")]
    InsufficientDeposit { needed: U256, available: U256 },

    #[error("session {0} is already settled")]
    AlreadySettled(u64),

    #[error("session {0} has no settlement")]
    NotSettled(u64),

    #[error("secret and receipt belong to different schemes")]
    SchemeMismatch,

    #[error("claim window closed")]
    ClaimWindowClosed,

    #[error("claim window still open")]
    ClaimWindowOpen,

    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    #[error("amount overflow")]
    AmountOverflow,

    #[error("ledger is unavailable")]
    Unavailable,
}

impl From<SettlementError> for LedgerError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Unavailable => LedgerError::Unavailable(e.to_string()),
            other => LedgerError::Rejected(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A bulletin as registered on the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub seller: Address,
    pub bulletin: Bulletin,
    pub revoked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Secret revealed; price held in escrow until the claim window ends.
    Revealed,
    /// A claim succeeded; the price went back to the buyer's deposit.
    Refunded,
    /// The claim window ended; the price was paid to the seller.
    Released,
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementStatus::Revealed => write!(f, "Revealed"),
            SettlementStatus::Refunded => write!(f, "Refunded"),
            SettlementStatus::Released => write!(f, "Released"),
        }
    }
}

/// One settled trade, keyed by `(session_id, seller, buyer)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub bulletin_key: B256,
    pub price: U256,
    pub receipt: Receipt,
    pub secret: Secret,
    /// Unix seconds of the reveal.
    pub revealed_at: u64,
    pub status: SettlementStatus,
    pub tx_hash: B256,
}

type SettlementKey = (u64, Address, Address);

#[derive(Debug, Default)]
struct State {
    listings: HashMap<B256, Listing>,
    /// Buyer funds towards one seller, keyed `(seller, buyer)`.
    deposits: HashMap<(Address, Address), U256>,
    /// Released earnings per seller.
    balances: HashMap<Address, U256>,
    settlements: HashMap<SettlementKey, Settlement>,
    writes: u64,
    unavailable: bool,
}

impl State {
    fn check_available(&self) -> Result<(), SettlementError> {
        if self.unavailable {
            return Err(SettlementError::Unavailable);
        }
        Ok(())
    }

    /// Hash standing in for the transaction that carried a write.
    fn commit(&mut self, tag: &[u8]) -> B256 {
        self.writes += 1;
        let mut data = tag.to_vec();
        data.extend_from_slice(&self.writes.to_be_bytes());
        keccak256(data)
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SettlementContract {
    claim_window: Duration,
    state: Mutex<State>,
}

impl Default for SettlementContract {
    fn default() -> Self {
        Self::new(DEFAULT_CLAIM_WINDOW)
    }
}

impl SettlementContract {
    /// A contract accepting claims for `claim_window` after each reveal.
    /// A zero window refuses every claim.
    pub fn new(claim_window: Duration) -> Self {
        Self {
            claim_window,
            state: Mutex::new(State::default()),
        }
    }

    /// Register a bulletin for `seller`. Returns its content key.
    pub fn publish(&self, seller: Address, bulletin: &Bulletin) -> Result<B256, SettlementError> {
        let key = bulletin.key();
        let mut state = self.state.lock();
        state.check_available()?;
        if let Some(existing) = state.listings.get(&key) {
            if existing.seller != seller {
                return Err(SettlementError::NotOwner { caller: seller, key });
            }
        }
        state.listings.insert(
            key,
            Listing {
                seller,
                bulletin: bulletin.clone(),
                revoked: false,
            },
        );
        state.commit(b"publish");
        info!(%seller, %key, mode = %bulletin.mode, "bulletin published");
        Ok(key)
    }

    /// Withdraw a bulletin. Settlements already made are not affected.
    pub fn revoke(&self, seller: Address, key: B256) -> Result<(), SettlementError> {
        let mut state = self.state.lock();
        state.check_available()?;
        let listing = state
            .listings
            .get_mut(&key)
            .ok_or(SettlementError::UnknownBulletin(key))?;
        if listing.seller != seller {
            return Err(SettlementError::NotOwner { caller: seller, key });
        }
        listing.revoked = true;
        state.commit(b"revoke");
        info!(%seller, %key, "bulletin revoked");
        Ok(())
    }

    /// Lock `amount` of `buyer`'s funds towards `seller`.
    pub fn deposit(&self, buyer: Address, seller: Address, amount: U256) -> Result<U256, SettlementError> {
        let mut state = self.state.lock();
        state.check_available()?;
        let entry = state.deposits.entry((seller, buyer)).or_insert(U256::ZERO);
        let total = entry
            .checked_add(amount)
            .ok_or(SettlementError::AmountOverflow)?;
        *entry = total;
        state.commit(b"deposit");
        debug!(%buyer, %seller, %amount, %total, "deposit");
        Ok(total)
    }

    /// Accept a revealed secret against a signed receipt.
    pub fn reveal(&self, submission: &SecretSubmission, now: u64) -> Result<B256, SettlementError> {
        let (session_id, seller, buyer) = (submission.session_id, submission.seller, submission.buyer);
        let mut state = self.state.lock();
        state.check_available()?;

        let key = submission.bulletin_key;
        let listing = state
            .listings
            .get(&key)
            .ok_or(SettlementError::UnknownBulletin(key))?;
        if listing.revoked {
            return Err(SettlementError::Revoked(key));
        }
        if listing.seller != seller {
            return Err(SettlementError::NotOwner { caller: seller, key });
        }
        if now >= submission.expire_at {
            return Err(SettlementError::ReceiptExpired {
                expire_at: submission.expire_at,
                now,
            });
        }
        if submission.receipt.scheme() != submission.secret.scheme() {
            return Err(SettlementError::SchemeMismatch);
        }
        verify_receipt_signature(submission)?;

        let settlement_key = (session_id, seller, buyer);
        if state.settlements.contains_key(&settlement_key) {
            return Err(SettlementError::AlreadySettled(session_id));
        }
        let available = state
            .deposits
            .get(&(seller, buyer))
            .copied()
            .unwrap_or(U256::ZERO);
        let remaining = available
            .checked_sub(submission.price)
            .ok_or(SettlementError::InsufficientDeposit {
                needed: submission.price,
                available,
            })?;

        state.deposits.insert((seller, buyer), remaining);
        let tx_hash = state.commit(b"reveal");
        state.settlements.insert(
            settlement_key,
            Settlement {
                bulletin_key: key,
                price: submission.price,
                receipt: submission.receipt.clone(),
                secret: submission.secret.clone(),
                revealed_at: now,
                status: SettlementStatus::Revealed,
                tx_hash,
            },
        );
        info!(session_id, %seller, %buyer, price = %submission.price, "secret revealed");
        Ok(tx_hash)
    }

    /// Refund the buyer if the claim proves the delivery was bad.
    ///
    /// The contract decrypts the claimed ciphertext with the revealed seed
    /// itself. The ciphertext must be one the buyer signed for, and the
    /// result must differ from the published leaf.
    pub fn claim(&self, submission: &ClaimSubmission, now: u64) -> Result<B256, SettlementError> {
        let session_id = submission.session_id;
        let settlement_key = (session_id, submission.seller, submission.buyer);
        let window = self.claim_window.as_secs();
        let mut state = self.state.lock();
        state.check_available()?;

        let settlement = state
            .settlements
            .get(&settlement_key)
            .ok_or(SettlementError::NotSettled(session_id))?;
        if settlement.status != SettlementStatus::Revealed
            || now.saturating_sub(settlement.revealed_at) >= window
        {
            return Err(SettlementError::ClaimWindowClosed);
        }
        if settlement.receipt != submission.receipt {
            return Err(SettlementError::InvalidClaim(
                "receipt differs from the settled one".to_string(),
            ));
        }
        let Receipt::Complaint(receipt) = &settlement.receipt else {
            return Err(SettlementError::InvalidClaim(
                "only complaint trades accept claims".to_string(),
            ));
        };
        let Secret::Complaint(secret) = &settlement.secret else {
            return Err(SettlementError::InvalidClaim(
                "settled secret is not a complaint seed".to_string(),
            ));
        };
        let sigma_root = state
            .listings
            .get(&settlement.bulletin_key)
            .map(|listing| listing.bulletin.sigma_merkle_root)
            .ok_or(SettlementError::UnknownBulletin(settlement.bulletin_key))?;
        verify_claim(&submission.claim, receipt, secret.seed0, sigma_root)
            .map_err(|e| SettlementError::InvalidClaim(e.to_string()))?;

        let price = settlement.price;
        let deposit = state
            .deposits
            .entry((submission.seller, submission.buyer))
            .or_insert(U256::ZERO);
        *deposit = deposit
            .checked_add(price)
            .ok_or(SettlementError::AmountOverflow)?;
        let tx_hash = state.commit(b"claim");
        if let Some(settlement) = state.settlements.get_mut(&settlement_key) {
            settlement.status = SettlementStatus::Refunded;
        }
        info!(session_id, buyer = %submission.buyer, %price, "claim accepted, buyer refunded");
        Ok(tx_hash)
    }

    /// Pay out an unchallenged settlement once its claim window has passed.
    pub fn release(&self, session_id: u64, seller: Address, buyer: Address, now: u64) -> Result<U256, SettlementError> {
        let window = self.claim_window.as_secs();
        let mut state = self.state.lock();
        state.check_available()?;
        let settlement = state
            .settlements
            .get(&(session_id, seller, buyer))
            .ok_or(SettlementError::NotSettled(session_id))?;
        if settlement.status != SettlementStatus::Revealed {
            return Err(SettlementError::NotSettled(session_id));
        }
        if now.saturating_sub(settlement.revealed_at) < window {
            return Err(SettlementError::ClaimWindowOpen);
        }
        let price = settlement.price;
        let balance = state.balances.entry(seller).or_insert(U256::ZERO);
        *balance = balance
            .checked_add(price)
            .ok_or(SettlementError::AmountOverflow)?;
        state.commit(b"release");
        if let Some(settlement) = state.settlements.get_mut(&(session_id, seller, buyer)) {
            settlement.status = SettlementStatus::Released;
        }
        info!(session_id, %seller, %price, "settlement released");
        Ok(price)
    }

    // -- reads ----------------------------------------------------------------

    pub fn data_status(&self, key: B256) -> DataStatus {
        match self.state.lock().listings.get(&key) {
            None => DataStatus::Unknown,
            Some(listing) if listing.revoked => DataStatus::Revoked,
            Some(_) => DataStatus::Ok,
        }
    }

    pub fn deposit_of(&self, seller: Address, buyer: Address) -> U256 {
        self.state
            .lock()
            .deposits
            .get(&(seller, buyer))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn balance_of(&self, seller: Address) -> U256 {
        self.state
            .lock()
            .balances
            .get(&seller)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn settlement(&self, session_id: u64, seller: Address, buyer: Address) -> Option<Settlement> {
        self.state
            .lock()
            .settlements
            .get(&(session_id, seller, buyer))
            .cloned()
    }

    /// Number of successful state changes so far.
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Make every call fail as if the chain could not be reached.
    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }
}

fn verify_receipt_signature(submission: &SecretSubmission) -> Result<(), SettlementError> {
    let signature = Signature::from_raw(&submission.receipt_signature)
        .map_err(|e| SettlementError::InvalidSignature(e.to_string()))?;
    let signed = SignedReceipt {
        signature,
        body: ReceiptBody {
            price: submission.price,
            expire_at: submission.expire_at,
            receipt: submission.receipt.clone(),
        },
    };
    signed
        .verify(submission.session_id, submission.seller, submission.buyer)
        .map_err(|e| SettlementError::InvalidSignature(e.to_string()))
}

// ---------------------------------------------------------------------------
// Ledger boundary
// ---------------------------------------------------------------------------

#[async_trait]
impl Ledger for SettlementContract {
    async fn read_data_status(&self, bulletin_key: B256) -> Result<DataStatus, LedgerError> {
        self.state.lock().check_available()?;
        Ok(self.data_status(bulletin_key))
    }

    async fn submit_secret(&self, submission: &SecretSubmission) -> Result<B256, LedgerError> {
        Ok(self.reveal(submission, unix_now())?)
    }

    async fn read_secret(
        &self,
        session_id: u64,
        seller: Address,
        buyer: Address,
    ) -> Result<Option<Secret>, LedgerError> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .settlements
            .get(&(session_id, seller, buyer))
            .map(|s| s.secret.clone()))
    }

    async fn submit_claim(&self, submission: &ClaimSubmission) -> Result<B256, LedgerError> {
        Ok(self.claim(submission, unix_now())?)
    }

    async fn verify_deposit(&self, seller: Address, buyer: Address, amount: U256) -> Result<bool, LedgerError> {
        self.state.lock().check_available()?;
        Ok(self.deposit_of(seller, buyer) >= amount)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
