//! # Trade Module
//!
//! Everything above the wire: what is being sold, what the buyer asked
//! for, the receipts and secrets that settle it, and the two flows that
//! drive a trade from handshake to `CLOSED` (or to the status it died at).
//!
//! ## Architecture
//!
//! ```text
//! mode.rs         — TradeMode: data kind × scheme × transfer
//! bulletin.rs     — Bulletin: the seller's public description of a dataset
//! selection.rs    — what the buyer demands (row ranges or a VRF query)
//! receipt.rs      — per-scheme receipts and secrets, signed receipts
//! status.rs       — TxStatus and its forward-only ordering
//! transaction.rs  — Transaction: the durable record of one side of a trade
//! book.rs         — TradeBook: live trades, deposit locks, the store
//! cancel.rs       — cooperative cancellation
//! buyer.rs        — the buyer flow
//! seller.rs       — the seller flow and its accept loop
//! error.rs        — TradeError
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Handshake**: the buyer names the bulletin and its address, the
//!    seller allocates a session id and answers with its own address.
//! 2. **Negotiate**: OT modes only.
//! 3. **Request / response**: the engine's opaque payloads.
//! 4. **Receipt**: the buyer commits to the response and signs a price.
//! 5. **Settle**: the seller reveals the secret on the ledger; the buyer
//!    reads it back, decrypts, or files a claim.

pub mod book;
pub mod bulletin;
pub mod buyer;
pub mod cancel;
pub mod error;
pub mod mode;
pub mod receipt;
pub mod selection;
pub mod seller;
pub mod status;
pub mod transaction;

pub use book::{DepositLocks, LiveTrade, Reservation, TradeBook};
pub use bulletin::Bulletin;
pub use buyer::{BuyOrder, Buyer, BuyerConfig};
pub use cancel::{Cancellation, Canceller};
pub use error::{FailureCause, TradeError};
pub use mode::{DataKind, Scheme, TradeMode, Transfer};
pub use receipt::{
    receipt_hash, AtomicSwapReceipt, AtomicSwapSecret, AtomicSwapVcReceipt, AtomicSwapVcSecret,
    Claim, ComplaintReceipt, ComplaintSecret, Receipt, ReceiptBody, Secret, SignedReceipt,
    VrfReceipt, VrfSecret,
};
pub use selection::{Range, Selection};
pub use seller::{Seller, SellerConfig};
pub use status::TxStatus;
pub use transaction::{ModeSession, Role, TradeId, Transaction};

/// Wall-clock seconds since the Unix epoch. Receipt expiry is absolute
/// time shared with the ledger.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
