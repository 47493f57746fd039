//! # Storage Module
//!
//! Durable trade records. Live flows write through the
//! [`TradeBook`](crate::trade::TradeBook); operators read the store
//! directly (`pod-node inspect`).
//!
//! Bincode for on-disk serialization: compact and deterministic. JSON is
//! for the inspect output only.

pub mod db;

pub use db::{DbError, DbResult, TxStore};
