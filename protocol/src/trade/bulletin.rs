//! Published dataset descriptors.

use alloy_primitives::{keccak256, B256};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

use super::mode::TradeMode;

/// What a seller publishes about a dataset before anyone trades it.
///
/// Read-only for the whole life of a trade. `n` is the number of blocks
/// (plain) or rows (table), `s` the block size in bytes and `size` the
/// total payload length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bulletin {
    pub mode: TradeMode,
    pub size: u64,
    pub s: u64,
    pub n: u64,
    pub sigma_merkle_root: B256,
}

impl Bulletin {
    /// Content-address key: `keccak256(abi.encodePacked(uint8 mode,
    /// uint64 size, uint64 s, uint64 n, bytes32 sigma_merkle_root))`.
    pub fn key(&self) -> B256 {
        let mut packed = Vec::with_capacity(1 + 8 * 3 + 32);
        packed.put_u8(self.mode.code());
        packed.put_u64(self.size);
        packed.put_u64(self.s);
        packed.put_u64(self.n);
        packed.put_slice(self.sigma_merkle_root.as_slice());
        keccak256(packed)
    }

    /// The same dataset offered under another mode. The key changes, the
    /// root does not.
    pub fn with_mode(&self, mode: TradeMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}
