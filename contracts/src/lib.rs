//! # POD Settlement Contracts
//!
//! On-chain logic for the fair-exchange data trading protocol, modelled
//! in memory:
//!
//! - **Settlement** — bulletin registry, buyer deposits, secret reveal
//!   against a signed receipt, claims with refund, and payout after the
//!   claim window.
//!
//! [`SettlementContract`] implements the protocol's
//! [`Ledger`](pod_protocol::ledger::Ledger) boundary, so buyer and seller
//! flows can run against it unchanged.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow with `checked_add` and
//!    `checked_sub`.
//! 2. State transitions are explicit: enum variants, not boolean flags.
//! 3. Signature verification gates every payout.
//! 4. A refused call changes nothing.

pub mod settlement;

pub use settlement::{
    Listing, Settlement, SettlementContract, SettlementError, SettlementStatus, DEFAULT_CLAIM_WINDOW,
};
