//! Trade orchestration errors.
//!
//! A flow that fails has always written a terminal status first. The
//! error returned to the caller carries that status and the underlying
//! cause, so callers never need to reload the record to learn how the
//! trade ended.

use thiserror::Error;

use crate::engine::EngineError;
use crate::ledger::LedgerError;
use crate::net::NetError;
use crate::storage::DbError;

use super::mode::Scheme;
use super::status::TxStatus;
use super::transaction::TradeId;

/// Why a trade step failed.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A local check refused to continue (price too low, expiry too
    /// close, insufficient deposit, unknown bulletin, ...).
    #[error("{0}")]
    Rejected(String),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TradeError {
    /// The flow stopped at `status`.
    #[error("trade failed with {status}: {cause}")]
    Failed {
        status: TxStatus,
        #[source]
        cause: FailureCause,
    },

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("trade {0} is already live")]
    Duplicate(TradeId),

    #[error("status cannot move from {from} to {to}")]
    StatusRegression { from: TxStatus, to: TxStatus },

    #[error("{got:?} data does not belong to a {expected:?} trade")]
    SchemeMismatch { expected: Scheme, got: Scheme },

    #[error("store error: {0}")]
    Store(#[from] DbError),
}

impl TradeError {
    pub fn failed(status: TxStatus, cause: impl Into<FailureCause>) -> Self {
        TradeError::Failed {
            status,
            cause: cause.into(),
        }
    }

    pub fn rejected(status: TxStatus, reason: impl Into<String>) -> Self {
        TradeError::Failed {
            status,
            cause: FailureCause::Rejected(reason.into()),
        }
    }

    /// The status the trade ended with, when the failure happened inside
    /// a flow.
    pub fn status(&self) -> Option<TxStatus> {
        match self {
            TradeError::Failed { status, .. } => Some(*status),
            _ => None,
        }
    }
}
