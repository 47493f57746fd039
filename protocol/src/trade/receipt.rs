//! # Receipts, Secrets and Claims
//!
//! The buyer turns the seller's response into a **receipt**: a commitment
//! naming exactly what was delivered, signed as an Ethereum personal
//! message so the settlement contract can verify it. The seller answers a
//! valid receipt by publishing the **secret** on-chain, and the payment
//! moves. A complaint-mode buyer holding a secret that does not decrypt
//! correctly files a **claim** to get the money back.
//!
//! ## Signing
//!
//! ```text
//! hash = keccak256(abi.encodePacked(
//!            uint256 session_id, address seller, address buyer,
//!            <receipt fields>,
//!            uint256 price, uint256 expire_at))
//! signature = secp256k1_sign(keccak256("\x19Ethereum Signed Message:\n32" ‖ hash))
//! ```
//!
//! ## Wire form
//!
//! ```text
//! signature (65) | bincode { price, expire_at, receipt }
//! ```

use alloy_primitives::{keccak256, Address, Signature, B256, U256};
use alloy_signer::SignerSync;
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::net::NetError;

use super::mode::Scheme;

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Complaint receipt. Commits to the delivered ciphertexts so a bad
/// block can later be proven against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintReceipt {
    /// Seller's per-trade key share, echoed from the response.
    pub seed2: B256,
    /// Digest root of the delivered ciphertext commitments, in delivery
    /// order.
    pub k_root: B256,
    /// Blocks (or rows) paid for. Equals the delivered count outside OT.
    pub count: u64,
}

/// Atomic-swap receipt. There is no claim path; the secret either opens
/// the data or the trade ends at `INVALID_SECRET`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicSwapReceipt {
    pub seed2: B256,
    /// Binds the seller's key commitment to the delivered ciphertexts.
    pub sigma_vw: B256,
    pub count: u64,
}

/// Atomic swap with a verifiable-computation digest over the key
/// commitment, the ciphertexts and `seed2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicSwapVcReceipt {
    pub seed2: B256,
    pub vw_digest: B256,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfReceipt {
    /// Seller's commitment to the blinding exponent.
    pub g_exp_r: B256,
}

/// What the buyer commits to having received. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Receipt {
    Complaint(ComplaintReceipt),
    AtomicSwap(AtomicSwapReceipt),
    AtomicSwapVc(AtomicSwapVcReceipt),
    VrfQuery(VrfReceipt),
}

impl Receipt {
    /// Settlement scheme this receipt belongs to.
    pub fn scheme(&self) -> Scheme {
        match self {
            Receipt::Complaint(_) => Scheme::Complaint,
            Receipt::AtomicSwap(_) => Scheme::AtomicSwap,
            Receipt::AtomicSwapVc(_) => Scheme::AtomicSwapVc,
            Receipt::VrfQuery(_) => Scheme::VrfQuery,
        }
    }

    /// Number of delivered items. VRF queries are priced flat and carry none.
    pub fn count(&self) -> Option<u64> {
        match self {
            Receipt::Complaint(r) => Some(r.count),
            Receipt::AtomicSwap(r) => Some(r.count),
            Receipt::AtomicSwapVc(r) => Some(r.count),
            Receipt::VrfQuery(_) => None,
        }
    }

    /// ABI-packed receipt fields, in declaration order, counts widened to
    /// `uint256`.
    fn packed_fields(&self) -> Vec<u8> {
        match self {
            Receipt::Complaint(r) => (r.seed2, r.k_root, U256::from(r.count)).abi_encode_packed(),
            Receipt::AtomicSwap(r) => {
                (r.seed2, r.sigma_vw, U256::from(r.count)).abi_encode_packed()
            }
            Receipt::AtomicSwapVc(r) => {
                (r.seed2, r.vw_digest, U256::from(r.count)).abi_encode_packed()
            }
            Receipt::VrfQuery(r) => r.g_exp_r.abi_encode_packed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Secrets & Claims
// ---------------------------------------------------------------------------

/// Seller's key share. With the receipt's `seed2` it derives every block
/// key of the trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintSecret {
    pub seed0: B256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicSwapSecret {
    pub seed0: B256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicSwapVcSecret {
    pub seed0: B256,
    /// Opening of the commitment to `seed0`.
    pub seed0_rand: B256,
}

/// Blinding exponent of a VRF query. Unblinds the matching positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfSecret {
    pub r: B256,
}

/// The value the seller reveals on-chain in exchange for payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Secret {
    Complaint(ComplaintSecret),
    AtomicSwap(AtomicSwapSecret),
    AtomicSwapVc(AtomicSwapVcSecret),
    VrfQuery(VrfSecret),
}

impl Secret {
    pub fn scheme(&self) -> Scheme {
        match self {
            Secret::Complaint(_) => Scheme::Complaint,
            Secret::AtomicSwap(_) => Scheme::AtomicSwap,
            Secret::AtomicSwapVc(_) => Scheme::AtomicSwapVc,
            Secret::VrfQuery(_) => Scheme::VrfQuery,
        }
    }
}

/// Proof that the seller delivered a bad block.
///
/// Carries everything the ledger needs to decrypt the block itself with
/// the revealed seed and compare it with the published leaf; see
/// [`verify_claim`](crate::engine::complaint::verify_claim).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Position of the bad block in delivery order.
    pub i: u64,
    /// Index of the bad block in the dataset.
    pub j: u64,
    /// Ciphertext delivered for block `j`.
    pub cipher: Vec<u8>,
    /// Commitments to every delivered ciphertext. Hash to the receipt's
    /// `k_root`.
    pub m: Vec<B256>,
    /// Every sigma leaf. Hash to the bulletin's root.
    pub leaves: Vec<B256>,
}

// ---------------------------------------------------------------------------
// Signed Receipt
// ---------------------------------------------------------------------------

/// The signed part of the receipt message, minus the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptBody {
    /// Total the buyer agrees to pay, debited from the deposit on reveal.
    pub price: U256,
    /// Unix seconds after which the seller may no longer settle.
    pub expire_at: u64,
    pub receipt: Receipt,
}

/// Hash the buyer signs for one trade.
pub fn receipt_hash(session_id: u64, seller: Address, buyer: Address, body: &ReceiptBody) -> B256 {
    let mut packed = (U256::from(session_id), seller, buyer).abi_encode_packed();
    packed.extend_from_slice(&body.receipt.packed_fields());
    packed.extend_from_slice(&(body.price, U256::from(body.expire_at)).abi_encode_packed());
    keccak256(packed)
}

/// A receipt body with the buyer's signature over [`receipt_hash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedReceipt {
    pub signature: Signature,
    pub body: ReceiptBody,
}

impl SignedReceipt {
    /// Sign `body` for the trade `(session_id, seller, buyer)`.
    pub fn sign<S: SignerSync>(
        signer: &S,
        session_id: u64,
        seller: Address,
        buyer: Address,
        body: ReceiptBody,
    ) -> Result<Self, NetError> {
        let hash = receipt_hash(session_id, seller, buyer, &body);
        let signature = signer
            .sign_message_sync(hash.as_slice())
            .map_err(|e| NetError::Signature(e.to_string()))?;
        Ok(Self { signature, body })
    }

    /// Address whose key produced the signature.
    pub fn recover(&self, session_id: u64, seller: Address, buyer: Address) -> Result<Address, NetError> {
        let hash = receipt_hash(session_id, seller, buyer, &self.body);
        self.signature
            .recover_address_from_msg(hash.as_slice())
            .map_err(|e| NetError::Signature(e.to_string()))
    }

    /// Require the signature to come from `buyer`.
    pub fn verify(&self, session_id: u64, seller: Address, buyer: Address) -> Result<(), NetError> {
        let recovered = self.recover(session_id, seller, buyer)?;
        if recovered != buyer {
            return Err(NetError::SignerMismatch {
                expected: buyer,
                recovered,
            });
        }
        Ok(())
    }

    /// `r ‖ s ‖ v`, as submitted to the ledger.
    pub fn signature_bytes(&self) -> [u8; config::RECEIPT_SIGNATURE_LEN] {
        self.signature.as_bytes()
    }

    /// Wire form: signature, then the bincode body.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        let body = bincode::serialize(&self.body).map_err(|e| NetError::Malformed {
            what: "receipt body",
            reason: e.to_string(),
        })?;
        let mut buf = Vec::with_capacity(config::RECEIPT_SIGNATURE_LEN + body.len());
        buf.extend_from_slice(&self.signature_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, NetError> {
        if raw.len() <= config::RECEIPT_SIGNATURE_LEN {
            return Err(NetError::Malformed {
                what: "signed receipt",
                reason: format!(
                    "{} bytes, need more than {}",
                    raw.len(),
                    config::RECEIPT_SIGNATURE_LEN
                ),
            });
        }
        let (sig, body) = raw.split_at(config::RECEIPT_SIGNATURE_LEN);
        let signature = Signature::from_raw(sig).map_err(|e| NetError::Malformed {
            what: "receipt signature",
            reason: e.to_string(),
        })?;
        let body = bincode::deserialize(body).map_err(|e| NetError::Malformed {
            what: "receipt body",
            reason: e.to_string(),
        })?;
        Ok(Self { signature, body })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer_local::PrivateKeySigner;

    fn body() -> ReceiptBody {
        ReceiptBody {
            price: U256::from(1_000u64),
            expire_at: 1_800_000_000,
            receipt: Receipt::Complaint(ComplaintReceipt {
                seed2: B256::repeat_byte(2),
                k_root: B256::repeat_byte(0xAA),
                count: 10,
            }),
        }
    }

    #[test]
    fn signature_recovers_buyer() {
        let buyer = PrivateKeySigner::random();
        let seller = Address::repeat_byte(0x51);
        let signed = SignedReceipt::sign(&buyer, 7, seller, buyer.address(), body()).unwrap();
        assert_eq!(signed.recover(7, seller, buyer.address()).unwrap(), buyer.address());
        signed.verify(7, seller, buyer.address()).unwrap();
    }

    #[test]
    fn wire_form_survives_transport() {
        let buyer = PrivateKeySigner::random();
        let seller = Address::repeat_byte(0x51);
        let signed = SignedReceipt::sign(&buyer, 7, seller, buyer.address(), body()).unwrap();
        let wire = signed.encode().unwrap();
        assert_eq!(&wire[..65], &signed.signature_bytes()[..]);
        let decoded = SignedReceipt::decode(&wire).unwrap();
        assert_eq!(decoded, signed);
        decoded.verify(7, seller, buyer.address()).unwrap();
    }

    #[test]
    fn tampered_price_changes_signer() {
        let buyer = PrivateKeySigner::random();
        let seller = Address::repeat_byte(0x51);
        let mut signed = SignedReceipt::sign(&buyer, 7, seller, buyer.address(), body()).unwrap();
        signed.body.price = U256::from(1u64);
        let err = signed.verify(7, seller, buyer.address()).unwrap_err();
        assert!(matches!(err, NetError::SignerMismatch { .. } | NetError::Signature(_)));
    }

    #[test]
    fn wrong_session_or_party_does_not_verify() {
        let buyer = PrivateKeySigner::random();
        let seller = Address::repeat_byte(0x51);
        let signed = SignedReceipt::sign(&buyer, 7, seller, buyer.address(), body()).unwrap();
        assert!(signed.verify(8, seller, buyer.address()).is_err());
        assert!(signed
            .verify(7, Address::repeat_byte(0x52), buyer.address())
            .is_err());
    }

    #[test]
    fn signature_only_payload_rejected() {
        assert!(SignedReceipt::decode(&[0u8; 65]).is_err());
        assert!(SignedReceipt::decode(&[]).is_err());
    }

    #[test]
    fn hash_depends_on_every_receipt_field() {
        let base = body();
        let h = receipt_hash(1, Address::ZERO, Address::ZERO, &base);
        let mut other = base.clone();
        other.expire_at += 1;
        assert_ne!(h, receipt_hash(1, Address::ZERO, Address::ZERO, &other));
        let mut other = base.clone();
        if let Receipt::Complaint(r) = &mut other.receipt {
            r.count = 11;
        }
        assert_ne!(h, receipt_hash(1, Address::ZERO, Address::ZERO, &other));
    }
}
