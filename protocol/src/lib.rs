// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # POD Protocol — Core Library
//!
//! A fair-exchange protocol for selling data between parties who do not
//! trust each other. The seller proves what it delivered, the buyer signs
//! a receipt for it, and a settlement contract releases payment only
//! against the secret that opens the delivery. If the secret does not
//! open it, the buyer has a proof to take back to the contract.
//!
//! ## Architecture
//!
//! - **net** — Framing, wire records, and the per-connection state
//!   machines (handshake, negotiation, transaction round).
//! - **trade** — Modes, bulletins, receipts, statuses, and the buyer and
//!   seller flows.
//! - **engine** — The proof-engine boundary, plus a simulated engine.
//! - **ledger** — The settlement-chain boundary.
//! - **storage** — Durable trade records over sled.
//! - **config** — Protocol constants and defaults.
//!
//! ## Design Philosophy
//!
//! 1. A node's state only moves after the I/O it depends on succeeded.
//! 2. A trade's status only moves forward, and every move is persisted.
//! 3. The crypto is someone else's problem: flows carry opaque bytes.

pub mod config;
pub mod engine;
pub mod ledger;
pub mod net;
pub mod storage;
pub mod trade;
