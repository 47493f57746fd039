//! # Protocol Configuration & Constants
//!
//! Every magic number in the trading protocol lives here. If a peer on
//! the other side of the wire has to agree with us on it, it belongs in
//! this file.
//!
//! Tunables that an operator may reasonably change per deployment (unit
//! price, output directory, I/O timeout) live in
//! [`BuyerConfig`](crate::trade::BuyerConfig) and
//! [`SellerConfig`](crate::trade::SellerConfig) and default to the values
//! below.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string of the trading protocol.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Wire Format
// ---------------------------------------------------------------------------

/// Number of registered trade modes. A session request carrying a mode at
/// or above this value is refused before any state changes.
pub const MODE_MAX: u8 = 14;

/// Length of a sigma Merkle root. Always 32 bytes.
pub const MERKLE_ROOT_LENGTH: usize = 32;

/// Minimum length of an encoded session request/ack record:
/// `id (8) | mode (1) | sigma_merkle_root (32)`. Extra info is optional.
pub const SESSION_RECORD_MIN_LEN: usize = 8 + 1 + MERKLE_ROOT_LENGTH;

/// Frame header length: `type (2) | length (8)`.
pub const FRAME_HEADER_LEN: usize = 2 + 8;

/// Upper bound on a single frame payload. A ciphertext response for a big
/// table can be large, but a peer announcing more than this is either
/// broken or hostile, and we refuse to allocate for it.
pub const MAX_FRAME_PAYLOAD: u64 = 1 << 30; // 1 GiB

/// Length prefix of the combined negotiation ack+request payload.
pub const NEGO_LENGTH_PREFIX: usize = 8;

/// secp256k1 recoverable signature: `r (32) | s (32) | v (1)`.
pub const RECEIPT_SIGNATURE_LEN: usize = 65;

/// Length of an account address carried in the session extra info.
pub const ADDRESS_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Default bound on every blocking send/receive. A peer that stays silent
/// longer than this fails the trade; there is no retry at this layer.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Validity window a buyer grants the seller to settle a signed receipt.
/// 36000 seconds = 10 hours.
pub const RECEIPT_TTL: Duration = Duration::from_secs(36_000);

/// Minimum remaining validity a seller requires before submitting a
/// receipt on-chain. Submitting closer to expiry risks the transaction
/// landing after the signature is no longer accepted.
pub const SECRET_EXPIRY_MARGIN: Duration = Duration::from_secs(600);

/// How often the buyer polls the ledger for the revealed secret.
pub const SECRET_POLL_INTERVAL: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_record_min_len() {
        assert_eq!(SESSION_RECORD_MIN_LEN, 41);
    }

    #[test]
    fn test_timing_constants_sanity() {
        // A receipt that expires inside the seller's safety margin could
        // never be settled.
        assert!(SECRET_EXPIRY_MARGIN < RECEIPT_TTL);
        assert!(SECRET_POLL_INTERVAL < DEFAULT_IO_TIMEOUT);
    }

    #[test]
    fn test_wire_parameter_sizes() {
        assert_eq!(FRAME_HEADER_LEN, 10);
        assert_eq!(RECEIPT_SIGNATURE_LEN, 65);
        assert_eq!(MERKLE_ROOT_LENGTH, 32);
        assert_eq!(ADDRESS_LENGTH, 20);
    }
}
