//! # Proof-Engine Boundary
//!
//! The cryptography of a trade (encryption of the delivered blocks,
//! commitments, proofs of misbehavior) lives behind two capability
//! traits, one per role. The orchestrators only move the opaque bytes
//! these produce and consume.
//!
//! ```text
//!   BuyerProver                                SellerProver
//!   nego_request ─────────────────────────────► on_nego_request
//!   on_nego_response ◄──────────────────────── (response)
//!   (response) ◄────────────────────────────── nego_request
//!   on_nego_request ─────────────────────────► on_nego_response
//!   request ─────────────────────────────────► on_request
//!   on_response  ◄─────────────────────────── (response)
//!   (receipt) ───────────────────────────────► on_receipt → Secret
//!   on_secret / claim / decrypt
//! ```
//!
//! The negotiation methods are only called in OT modes. Calls are
//! synchronous and run inline in the async flow.

pub mod complaint;
pub mod sim;

use std::path::Path;

use thiserror::Error;

use crate::trade::{Bulletin, Claim, Receipt, Secret, Selection, TradeMode};

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine does not implement this step for the session's mode.
    #[error("{0} is not supported for this mode")]
    Unsupported(&'static str),

    /// A peer payload did not decode.
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    /// A peer payload decoded but failed verification.
    #[error("verification failed: {0}")]
    Verification(String),

    /// No dataset is loaded for the requested bulletin.
    #[error("no dataset for bulletin {0}")]
    UnknownDataset(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of checking a revealed secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretCheck {
    /// The secret opens the delivered data.
    Valid,
    /// VRF query: the secret unblinded these row positions, one list per
    /// demanded value.
    Positions(Vec<Vec<u64>>),
    /// The secret does not match what was delivered.
    Invalid(String),
}

/// Everything a buyer session is created from.
#[derive(Debug, Clone)]
pub struct BuyerSessionParams {
    pub session_id: u64,
    pub mode: TradeMode,
    pub bulletin: Bulletin,
    pub selection: Selection,
}

/// Factory for per-trade engine sessions.
pub trait ProofEngine: Send + Sync {
    fn buyer_session(&self, params: &BuyerSessionParams) -> Result<Box<dyn BuyerProver>, EngineError>;

    fn seller_session(
        &self,
        session_id: u64,
        mode: TradeMode,
        bulletin: &Bulletin,
    ) -> Result<Box<dyn SellerProver>, EngineError>;
}

/// Buyer half of one trade.
pub trait BuyerProver: Send {
    fn nego_request(&mut self) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Unsupported("negotiation"))
    }

    /// Answer the seller's negotiation request.
    fn on_nego_request(&mut self, _request: &[u8]) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Unsupported("negotiation"))
    }

    /// Check the seller's answer to our negotiation request.
    fn on_nego_response(&mut self, _response: &[u8]) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("negotiation"))
    }

    fn request(&mut self) -> Result<Vec<u8>, EngineError>;

    /// Verify the seller's response and commit to it in a receipt.
    fn on_response(&mut self, response: &[u8]) -> Result<Receipt, EngineError>;

    fn on_secret(&mut self, secret: &Secret) -> SecretCheck;

    /// Build the claim for the last secret that failed to check.
    fn claim(&mut self) -> Result<Claim, EngineError>;

    /// Write the demanded plaintext to `output`.
    fn decrypt(&mut self, output: &Path) -> Result<(), EngineError>;
}

/// Seller half of one trade.
pub trait SellerProver: Send {
    /// Answer the buyer's negotiation request.
    fn on_nego_request(&mut self, _request: &[u8]) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Unsupported("negotiation"))
    }

    fn nego_request(&mut self) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Unsupported("negotiation"))
    }

    /// Check the buyer's answer to our negotiation request.
    fn on_nego_response(&mut self, _response: &[u8]) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("negotiation"))
    }

    /// Verify the request and build the encrypted response.
    fn on_request(&mut self, request: &[u8]) -> Result<Vec<u8>, EngineError>;

    /// Check that the receipt commits to what we sent; release the secret.
    fn on_receipt(&mut self, receipt: &Receipt) -> Result<Secret, EngineError>;
}
