//! # Transaction Record
//!
//! One [`Transaction`] per side of a trade, persisted on every status
//! change. The per-scheme artifacts (receipt, secret, claim, positions)
//! live in a [`ModeSession`]; exactly one variant applies to a given
//! mode, so a record can never hold, say, a VRF secret for a complaint
//! trade.

use std::fmt;
use std::path::PathBuf;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bulletin::Bulletin;
use super::error::TradeError;
use super::mode::{DataKind, Scheme, TradeMode, Transfer};
use super::receipt::{
    AtomicSwapReceipt, AtomicSwapSecret, AtomicSwapVcReceipt, AtomicSwapVcSecret, Claim,
    ComplaintReceipt, ComplaintSecret, Receipt, Secret, VrfReceipt, VrfSecret,
};
use super::selection::Selection;
use super::status::TxStatus;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Which side of the trade a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Buyer,
    Seller,
}

/// Unique key of one side of a trade. At most one live flow per id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeId {
    pub role: Role,
    pub session_id: u64,
    pub seller: Address,
    pub buyer: Address,
}

impl TradeId {
    /// Store key: `role (1) | session_id (8 BE) | seller (20) | buyer (20)`.
    /// Big-endian ids keep one role's records in session order.
    pub fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 8 + 20 + 20);
        key.push(match self.role {
            Role::Buyer => 0,
            Role::Seller => 1,
        });
        key.extend_from_slice(&self.session_id.to_be_bytes());
        key.extend_from_slice(self.seller.as_slice());
        key.extend_from_slice(self.buyer.as_slice());
        key
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
        };
        write!(f, "{role}:{}:{}:{}", self.session_id, self.seller, self.buyer)
    }
}

// ---------------------------------------------------------------------------
// Mode Session
// ---------------------------------------------------------------------------

/// Scheme-specific artifacts collected as the flow advances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track<R, S> {
    pub kind: DataKind,
    pub transfer: Transfer,
    pub receipt: Option<R>,
    pub secret: Option<S>,
}

impl<R, S> Track<R, S> {
    fn new(kind: DataKind, transfer: Transfer) -> Self {
        Self {
            kind,
            transfer,
            receipt: None,
            secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeSession {
    Complaint {
        track: Track<ComplaintReceipt, ComplaintSecret>,
        claim: Option<Claim>,
    },
    AtomicSwap(Track<AtomicSwapReceipt, AtomicSwapSecret>),
    AtomicSwapVc(Track<AtomicSwapVcReceipt, AtomicSwapVcSecret>),
    VrfQuery {
        track: Track<VrfReceipt, VrfSecret>,
        /// Matching row indices per queried value, once unblinded.
        positions: Option<Vec<Vec<u64>>>,
    },
}

impl ModeSession {
    pub fn new(mode: TradeMode) -> Self {
        let (kind, transfer) = (mode.data_kind(), mode.transfer());
        match mode.scheme() {
            Scheme::Complaint => ModeSession::Complaint {
                track: Track::new(kind, transfer),
                claim: None,
            },
            Scheme::AtomicSwap => ModeSession::AtomicSwap(Track::new(kind, transfer)),
            Scheme::AtomicSwapVc => ModeSession::AtomicSwapVc(Track::new(kind, transfer)),
            Scheme::VrfQuery => ModeSession::VrfQuery {
                track: Track::new(kind, transfer),
                positions: None,
            },
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            ModeSession::Complaint { .. } => Scheme::Complaint,
            ModeSession::AtomicSwap(_) => Scheme::AtomicSwap,
            ModeSession::AtomicSwapVc(_) => Scheme::AtomicSwapVc,
            ModeSession::VrfQuery { .. } => Scheme::VrfQuery,
        }
    }

    pub fn set_receipt(&mut self, receipt: &Receipt) -> Result<(), TradeError> {
        let expected = self.scheme();
        match (self, receipt) {
            (ModeSession::Complaint { track, .. }, Receipt::Complaint(r)) => {
                track.receipt = Some(r.clone())
            }
            (ModeSession::AtomicSwap(track), Receipt::AtomicSwap(r)) => {
                track.receipt = Some(r.clone())
            }
            (ModeSession::AtomicSwapVc(track), Receipt::AtomicSwapVc(r)) => {
                track.receipt = Some(r.clone())
            }
            (ModeSession::VrfQuery { track, .. }, Receipt::VrfQuery(r)) => {
                track.receipt = Some(r.clone())
            }
            _ => {
                return Err(TradeError::SchemeMismatch {
                    expected,
                    got: receipt.scheme(),
                })
            }
        }
        Ok(())
    }

    pub fn set_secret(&mut self, secret: &Secret) -> Result<(), TradeError> {
        let expected = self.scheme();
        match (self, secret) {
            (ModeSession::Complaint { track, .. }, Secret::Complaint(s)) => {
                track.secret = Some(s.clone())
            }
            (ModeSession::AtomicSwap(track), Secret::AtomicSwap(s)) => {
                track.secret = Some(s.clone())
            }
            (ModeSession::AtomicSwapVc(track), Secret::AtomicSwapVc(s)) => {
                track.secret = Some(s.clone())
            }
            (ModeSession::VrfQuery { track, .. }, Secret::VrfQuery(s)) => {
                track.secret = Some(s.clone())
            }
            _ => {
                return Err(TradeError::SchemeMismatch {
                    expected,
                    got: secret.scheme(),
                })
            }
        }
        Ok(())
    }

    pub fn set_claim(&mut self, new: Claim) -> Result<(), TradeError> {
        match self {
            ModeSession::Complaint { claim, .. } => {
                *claim = Some(new);
                Ok(())
            }
            other => Err(TradeError::SchemeMismatch {
                expected: other.scheme(),
                got: Scheme::Complaint,
            }),
        }
    }

    pub fn set_positions(&mut self, new: Vec<Vec<u64>>) -> Result<(), TradeError> {
        match self {
            ModeSession::VrfQuery { positions, .. } => {
                *positions = Some(new);
                Ok(())
            }
            other => Err(TradeError::SchemeMismatch {
                expected: other.scheme(),
                got: Scheme::VrfQuery,
            }),
        }
    }

    pub fn receipt(&self) -> Option<Receipt> {
        match self {
            ModeSession::Complaint { track, .. } => {
                track.receipt.clone().map(Receipt::Complaint)
            }
            ModeSession::AtomicSwap(track) => track.receipt.clone().map(Receipt::AtomicSwap),
            ModeSession::AtomicSwapVc(track) => track.receipt.clone().map(Receipt::AtomicSwapVc),
            ModeSession::VrfQuery { track, .. } => track.receipt.clone().map(Receipt::VrfQuery),
        }
    }

    pub fn secret(&self) -> Option<Secret> {
        match self {
            ModeSession::Complaint { track, .. } => track.secret.clone().map(Secret::Complaint),
            ModeSession::AtomicSwap(track) => track.secret.clone().map(Secret::AtomicSwap),
            ModeSession::AtomicSwapVc(track) => track.secret.clone().map(Secret::AtomicSwapVc),
            ModeSession::VrfQuery { track, .. } => track.secret.clone().map(Secret::VrfQuery),
        }
    }

    pub fn claim(&self) -> Option<&Claim> {
        match self {
            ModeSession::Complaint { claim, .. } => claim.as_ref(),
            _ => None,
        }
    }

    pub fn positions(&self) -> Option<&[Vec<u64>]> {
        match self {
            ModeSession::VrfQuery { positions, .. } => positions.as_deref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Durable record of one side of a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub session_id: u64,
    pub role: Role,
    pub seller: Address,
    pub buyer: Address,
    pub mode: TradeMode,
    pub bulletin: Bulletin,
    /// Buyer side only; the seller never learns the demands.
    pub selection: Option<Selection>,
    pub unit_price: U256,
    pub price: U256,
    pub expire_at: u64,
    pub status: TxStatus,
    /// Every status the record has held, oldest first.
    #[serde(default)]
    pub history: Vec<TxStatus>,
    pub session: ModeSession,
    pub receipt_signature: Option<Vec<u8>>,
    /// Ledger transaction that revealed the secret.
    pub settlement_tx: Option<B256>,
    /// Ledger transaction that filed the claim.
    pub claim_tx: Option<B256>,
    /// Where the decrypted data was written.
    pub output: Option<PathBuf>,
    /// Human-readable cause of the last failure, if any.
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        id: TradeId,
        bulletin: Bulletin,
        selection: Option<Selection>,
        unit_price: U256,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: id.session_id,
            role: id.role,
            seller: id.seller,
            buyer: id.buyer,
            mode: bulletin.mode,
            session: ModeSession::new(bulletin.mode),
            bulletin,
            selection,
            unit_price,
            price: U256::ZERO,
            expire_at: 0,
            status: TxStatus::Start,
            history: vec![TxStatus::Start],
            receipt_signature: None,
            settlement_tx: None,
            claim_tx: None,
            output: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> TradeId {
        TradeId {
            role: self.role,
            session_id: self.session_id,
            seller: self.seller,
            buyer: self.buyer,
        }
    }

    /// Whether the flow for this record has ended. `INVALID_SECRET` ends
    /// a trade whose scheme has no claim path.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
            || (self.status == TxStatus::InvalidSecret && !self.mode.has_claim_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::receipt::VrfReceipt;

    fn bulletin(mode: TradeMode) -> Bulletin {
        Bulletin {
            mode,
            size: 10,
            s: 1,
            n: 10,
            sigma_merkle_root: B256::ZERO,
        }
    }

    fn id(role: Role) -> TradeId {
        TradeId {
            role,
            session_id: 3,
            seller: Address::repeat_byte(1),
            buyer: Address::repeat_byte(2),
        }
    }

    #[test]
    fn mode_session_matches_scheme() {
        for mode in TradeMode::ALL {
            assert_eq!(ModeSession::new(mode).scheme(), mode.scheme());
        }
    }

    #[test]
    fn foreign_receipt_rejected() {
        let mut session = ModeSession::new(TradeMode::PlainComplaint);
        let vrf = Receipt::VrfQuery(VrfReceipt {
            g_exp_r: B256::ZERO,
        });
        assert!(matches!(
            session.set_receipt(&vrf),
            Err(TradeError::SchemeMismatch { .. })
        ));
        assert!(session.receipt().is_none());
        assert!(session.set_positions(vec![]).is_err());
    }

    #[test]
    fn receipt_and_secret_recorded() {
        let mut session = ModeSession::new(TradeMode::TableOtComplaint);
        let receipt = Receipt::Complaint(ComplaintReceipt {
            seed2: B256::repeat_byte(1),
            k_root: B256::repeat_byte(2),
            count: 4,
        });
        let secret = Secret::Complaint(ComplaintSecret {
            seed0: B256::repeat_byte(3),
        });
        session.set_receipt(&receipt).unwrap();
        session.set_secret(&secret).unwrap();
        assert_eq!(session.receipt(), Some(receipt));
        assert_eq!(session.secret(), Some(secret));
    }

    #[test]
    fn ids_differ_by_role() {
        assert_ne!(id(Role::Buyer).to_key(), id(Role::Seller).to_key());
        assert_eq!(id(Role::Buyer).to_key().len(), 49);
    }

    #[test]
    fn invalid_secret_finishes_swap_but_not_complaint() {
        let mut swap = Transaction::new(id(Role::Buyer), bulletin(TradeMode::PlainAtomicSwap), None, U256::ZERO);
        swap.status = TxStatus::InvalidSecret;
        assert!(swap.is_finished());

        let mut complaint = Transaction::new(id(Role::Buyer), bulletin(TradeMode::PlainComplaint), None, U256::ZERO);
        complaint.status = TxStatus::InvalidSecret;
        assert!(!complaint.is_finished());
    }
}
