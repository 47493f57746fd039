//! # Complaint Scheme Primitives
//!
//! Block encryption and commitments shared by the engine that delivers
//! blocks and the ledger that judges claims against them:
//!
//! - block `j` is encrypted with a Keccak keystream over
//!   `(seed0, seed2, j)`, so the ledger can decrypt it once `seed0` is
//!   revealed;
//! - `leaf_j = keccak256(block_j)` and the sigma root is the digest root
//!   of all leaves;
//! - each delivered ciphertext is committed as `keccak256(j ‖ cipher)`,
//!   and `k_root` is the digest root of those commitments in delivery
//!   order.
//!
//! A claim is accepted only when the revealed seed decrypts a committed
//! ciphertext to something whose hash is not the published leaf.

use alloy_primitives::{keccak256, B256};
use thiserror::Error;

use crate::trade::{Claim, ComplaintReceipt};

/// XOR `data` with the keystream of block `index`. Encrypts and decrypts.
pub fn encrypt_block(seed0: B256, seed2: B256, index: u64, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (chunk_no, chunk) in data.chunks(32).enumerate() {
        let pad = keccak256(
            [
                seed0.as_slice(),
                seed2.as_slice(),
                &index.to_be_bytes(),
                &(chunk_no as u64).to_be_bytes(),
            ]
            .concat(),
        );
        out.extend(chunk.iter().zip(pad.iter()).map(|(a, b)| a ^ b));
    }
    out
}

/// Commitment to the ciphertext delivered for block `index`.
pub fn cipher_digest(index: u64, cipher: &[u8]) -> B256 {
    keccak256([&index.to_be_bytes()[..], cipher].concat())
}

/// `keccak256(d_0 ‖ … ‖ d_{n-1})`.
pub fn digest_root(digests: &[B256]) -> B256 {
    let mut packed = Vec::with_capacity(digests.len() * 32);
    for digest in digests {
        packed.extend_from_slice(digest.as_slice());
    }
    keccak256(packed)
}

/// Why a claim does not prove misbehavior.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    #[error("digests do not hash to the receipt's k_root")]
    KRootMismatch,

    #[error("claim names delivered block {i}, but only {delivered} were delivered")]
    NotDelivered { i: u64, delivered: usize },

    #[error("ciphertext is not the one committed for delivered block {0}")]
    CipherMismatch(u64),

    #[error("leaves do not hash to the bulletin's sigma root")]
    SigmaRootMismatch,

    #[error("block {j} is outside the {n} published leaves")]
    NoLeaf { j: u64, n: usize },

    #[error("block {0} decrypts to its published leaf")]
    BlockMatchesLeaf(u64),
}

/// Check that `claim` proves the seller delivered a bad block.
///
/// The ciphertext must be the `i`-th one the buyer signed for (through
/// `k_root`), the leaves must be the published ones (through
/// `sigma_root`), and decrypting the ciphertext with the revealed `seed0`
/// must not reproduce leaf `j`.
pub fn verify_claim(
    claim: &Claim,
    receipt: &ComplaintReceipt,
    seed0: B256,
    sigma_root: B256,
) -> Result<(), ClaimError> {
    if digest_root(&claim.m) != receipt.k_root {
        return Err(ClaimError::KRootMismatch);
    }
    let committed = claim
        .m
        .get(claim.i as usize)
        .ok_or(ClaimError::NotDelivered {
            i: claim.i,
            delivered: claim.m.len(),
        })?;
    if cipher_digest(claim.j, &claim.cipher) != *committed {
        return Err(ClaimError::CipherMismatch(claim.i));
    }

    if digest_root(&claim.leaves) != sigma_root {
        return Err(ClaimError::SigmaRootMismatch);
    }
    let leaf = claim.leaves.get(claim.j as usize).ok_or(ClaimError::NoLeaf {
        j: claim.j,
        n: claim.leaves.len(),
    })?;

    let block = encrypt_block(seed0, receipt.seed2, claim.j, &claim.cipher);
    if keccak256(&block) == *leaf {
        return Err(ClaimError::BlockMatchesLeaf(claim.j));
    }
    Ok(())
}
