//! # Ledger Boundary
//!
//! Everything the trade flows need from the settlement chain, as one
//! async trait. A production deployment implements it over an RPC
//! client; `pod-contracts` ships an in-memory implementation.
//!
//! Calls are awaited without internal cancellation: once a secret or
//! claim submission is in flight, the flow waits for its outcome.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trade::{Claim, Receipt, Secret};

/// Publication state of a bulletin on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataStatus {
    /// Published and tradable.
    Ok,
    /// Never published under this key.
    Unknown,
    /// Withdrawn by its seller.
    Revoked,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger processed the call and refused it.
    #[error("rejected by ledger: {0}")]
    Rejected(String),

    /// The ledger could not be reached or did not answer.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Everything the settlement contract needs to release payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSubmission {
    pub session_id: u64,
    pub seller: Address,
    pub buyer: Address,
    pub bulletin_key: B256,
    pub price: U256,
    pub expire_at: u64,
    pub receipt: Receipt,
    /// 65-byte buyer signature over the receipt hash.
    pub receipt_signature: Vec<u8>,
    pub secret: Secret,
}

/// A buyer's refund request against a revealed secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSubmission {
    pub session_id: u64,
    pub seller: Address,
    pub buyer: Address,
    pub bulletin_key: B256,
    pub receipt: Receipt,
    pub claim: Claim,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Publication state of the bulletin with the given content key.
    async fn read_data_status(&self, bulletin_key: B256) -> Result<DataStatus, LedgerError>;

    /// Reveal a secret against a signed receipt. Returns the ledger
    /// transaction hash.
    async fn submit_secret(&self, submission: &SecretSubmission) -> Result<B256, LedgerError>;

    /// The secret revealed for `(session_id, seller, buyer)`, if any.
    async fn read_secret(
        &self,
        session_id: u64,
        seller: Address,
        buyer: Address,
    ) -> Result<Option<Secret>, LedgerError>;

    /// File a claim. Returns the ledger transaction hash.
    async fn submit_claim(&self, submission: &ClaimSubmission) -> Result<B256, LedgerError>;

    /// Whether `buyer` has at least `amount` deposited towards `seller`.
    async fn verify_deposit(
        &self,
        seller: Address,
        buyer: Address,
        amount: U256,
    ) -> Result<bool, LedgerError>;
}
