//! # Simulation Engine
//!
//! A deterministic, hash-based stand-in for the proof engine. It keeps
//! the shape of the real protocol without its mathematics:
//!
//! - blocks, leaves and ciphertext commitments follow
//!   [`complaint`](super::complaint);
//! - VRF positions are XOR-masked with `keccak256(r ‖ value ‖ k)` words.
//!
//! A buyer can therefore check every delivered block against the
//! published root once the seed is revealed, and build a claim the
//! settlement contract can decide on its own.
//!
//! [`SimFaults`] makes the seller misbehave, for dispute-path tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use alloy_primitives::{keccak256, B256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::trade::{
    AtomicSwapReceipt, AtomicSwapSecret, AtomicSwapVcReceipt, AtomicSwapVcSecret, Bulletin,
    Claim, ComplaintReceipt, ComplaintSecret, DataKind, Range, Receipt, Scheme, Secret,
    Selection, TradeMode, Transfer, VrfReceipt, VrfSecret,
};

use super::complaint::{cipher_digest, digest_root, encrypt_block};
use super::{BuyerProver, BuyerSessionParams, EngineError, ProofEngine, SecretCheck, SellerProver};

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// Raw seller data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dataset {
    Plain(Vec<u8>),
    /// Rows of string cells. Each row becomes one block, rendered as
    /// comma-separated cells with a trailing newline.
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

/// A dataset cut into fixed-size blocks with its leaf digests.
#[derive(Debug)]
struct Prepared {
    dataset: Dataset,
    blocks: Vec<Vec<u8>>,
    leaves: Vec<B256>,
    size: u64,
    s: u64,
}

impl Prepared {
    fn new(dataset: Dataset, block_size: u64) -> Result<Self, EngineError> {
        let (blocks, size, s) = match &dataset {
            Dataset::Plain(bytes) => {
                if bytes.is_empty() || block_size == 0 {
                    return Err(EngineError::Verification(
                        "plain dataset needs data and a non-zero block size".to_string(),
                    ));
                }
                let blocks = bytes
                    .chunks(block_size as usize)
                    .map(|chunk| {
                        let mut block = chunk.to_vec();
                        block.resize(block_size as usize, 0);
                        block
                    })
                    .collect::<Vec<_>>();
                (blocks, bytes.len() as u64, block_size)
            }
            Dataset::Table { rows, .. } => {
                if rows.is_empty() {
                    return Err(EngineError::Verification("table has no rows".to_string()));
                }
                let lines: Vec<Vec<u8>> = rows
                    .iter()
                    .map(|row| format!("{}\n", row.join(",")).into_bytes())
                    .collect();
                let size: u64 = lines.iter().map(|l| l.len() as u64).sum();
                let s = lines.iter().map(|l| l.len()).max().unwrap_or(0);
                let blocks = lines
                    .into_iter()
                    .map(|mut line| {
                        line.resize(s, 0);
                        line
                    })
                    .collect();
                (blocks, size, s as u64)
            }
        };
        let leaves = blocks.iter().map(keccak256).collect();
        Ok(Self {
            dataset,
            blocks,
            leaves,
            size,
            s,
        })
    }

    fn root(&self) -> B256 {
        digest_root(&self.leaves)
    }
}

fn random_b256() -> B256 {
    B256::from(rand::random::<[u8; 32]>())
}

fn hash_concat(parts: &[&[u8]]) -> B256 {
    keccak256(parts.concat())
}

fn mask_word(r: B256, value: &str, k: usize) -> u64 {
    let digest = hash_concat(&[r.as_slice(), value.as_bytes(), &(k as u64).to_be_bytes()]);
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(word)
}

fn expand(ranges: &[Range]) -> Vec<u64> {
    ranges.iter().flat_map(|r| r.indices()).collect()
}

fn malformed(what: &'static str) -> impl FnOnce(bincode::Error) -> EngineError {
    move |e| EngineError::Malformed {
        what,
        reason: e.to_string(),
    }
}

fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, EngineError> {
    bincode::serialize(value).map_err(malformed(what))
}

// ---------------------------------------------------------------------------
// Wire Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
enum Pick {
    Ranges(Vec<Range>),
    Values { key: String, values: Vec<String> },
}

#[derive(Debug, Serialize, Deserialize)]
struct SimRequest {
    seed2: B256,
    pick: Pick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimResponse {
    leaves: Vec<B256>,
    /// `(block index, ciphertext)` in request order.
    blocks: Vec<(u64, Vec<u8>)>,
    /// Commitment to the secret: `keccak(seed0)`, `keccak(seed0 ‖ rand)`
    /// for VC, `keccak(r)` for VRF.
    commit: B256,
    /// VRF: masked positions per queried value.
    hits: Vec<(String, Vec<u64>)>,
}

impl SimResponse {
    fn digests(&self) -> Vec<B256> {
        self.blocks.iter().map(|(j, c)| cipher_digest(*j, c)).collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Seller misbehavior to inject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimFaults {
    /// Deliver garbage in place of the first requested block.
    pub corrupt_block: bool,
    /// Reveal a secret unrelated to the delivered data.
    pub wrong_secret: bool,
}

/// The simulation engine. Holds the datasets this process sells.
#[derive(Debug, Default)]
pub struct SimEngine {
    datasets: RwLock<HashMap<B256, Arc<Prepared>>>,
    faults: SimFaults,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: SimFaults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    /// Load a dataset and describe it for `mode`. `block_size` only
    /// applies to plain data; table rows are one block each.
    pub fn publish(&self, dataset: Dataset, mode: TradeMode, block_size: u64) -> Result<Bulletin, EngineError> {
        let kind = match dataset {
            Dataset::Plain(_) => DataKind::Plain,
            Dataset::Table { .. } => DataKind::Table,
        };
        if kind != mode.data_kind() {
            return Err(EngineError::Verification(format!(
                "{mode} does not trade {kind:?} data"
            )));
        }
        let prepared = Prepared::new(dataset, block_size)?;
        let bulletin = Bulletin {
            mode,
            size: prepared.size,
            s: prepared.s,
            n: prepared.blocks.len() as u64,
            sigma_merkle_root: prepared.root(),
        };
        self.datasets
            .write()
            .insert(bulletin.sigma_merkle_root, Arc::new(prepared));
        tracing::debug!(root = %bulletin.sigma_merkle_root, n = bulletin.n, %mode, "dataset published");
        Ok(bulletin)
    }
}

impl ProofEngine for SimEngine {
    fn buyer_session(&self, params: &BuyerSessionParams) -> Result<Box<dyn BuyerProver>, EngineError> {
        if params.bulletin.mode != params.mode {
            return Err(EngineError::Verification(format!(
                "bulletin is for {}, session is {}",
                params.bulletin.mode, params.mode
            )));
        }
        Ok(Box::new(SimBuyer {
            mode: params.mode,
            bulletin: params.bulletin.clone(),
            selection: params.selection.clone(),
            seed2: random_b256(),
            nonce: None,
            negotiated: false,
            delivered: None,
            plaintext: None,
            failed_block: None,
        }))
    }

    fn seller_session(
        &self,
        session_id: u64,
        mode: TradeMode,
        bulletin: &Bulletin,
    ) -> Result<Box<dyn SellerProver>, EngineError> {
        let prepared = self
            .datasets
            .read()
            .get(&bulletin.sigma_merkle_root)
            .cloned()
            .ok_or_else(|| EngineError::UnknownDataset(bulletin.sigma_merkle_root.to_string()))?;
        if prepared.blocks.len() as u64 != bulletin.n || prepared.s != bulletin.s {
            return Err(EngineError::Verification(
                "bulletin does not describe the loaded dataset".to_string(),
            ));
        }
        tracing::trace!(session_id, %mode, "seller engine session");
        Ok(Box::new(SimSeller {
            mode,
            prepared,
            faults: self.faults,
            seed0: random_b256(),
            seed0_rand: random_b256(),
            r: random_b256(),
            nonce: None,
            negotiated: false,
            sent: None,
        }))
    }
}

fn nego_answer(nonce: &[u8]) -> B256 {
    hash_concat(&[b"pod-nego-ack", nonce])
}

// ---------------------------------------------------------------------------
// Buyer
// ---------------------------------------------------------------------------

struct SimBuyer {
    mode: TradeMode,
    bulletin: Bulletin,
    selection: Selection,
    seed2: B256,
    nonce: Option<B256>,
    negotiated: bool,
    delivered: Option<SimResponse>,
    /// Delivered blocks decrypted by a valid secret.
    plaintext: Option<HashMap<u64, Vec<u8>>>,
    /// `(i, j)` of the first delivered block that failed its leaf check.
    failed_block: Option<(u64, u64)>,
}

impl SimBuyer {
    fn check_blocks(&mut self, seed0: B256) -> SecretCheck {
        let Some(delivered) = &self.delivered else {
            return SecretCheck::Invalid("no response recorded".to_string());
        };
        let mut plain = HashMap::with_capacity(delivered.blocks.len());
        for (i, (j, cipher)) in delivered.blocks.iter().enumerate() {
            let block = encrypt_block(seed0, self.seed2, *j, cipher);
            if keccak256(&block) != delivered.leaves[*j as usize] {
                self.failed_block = Some((i as u64, *j));
                return SecretCheck::Invalid(format!("block {j} does not match its leaf"));
            }
            plain.insert(*j, block);
        }
        self.plaintext = Some(plain);
        SecretCheck::Valid
    }

    fn check_commit(&self, computed: B256) -> Option<SecretCheck> {
        match &self.delivered {
            Some(d) if d.commit == computed => None,
            _ => Some(SecretCheck::Invalid(
                "secret does not open the seller's commitment".to_string(),
            )),
        }
    }

    /// Trim a decrypted block to its payload.
    fn payload<'a>(&self, j: u64, block: &'a [u8]) -> &'a [u8] {
        match self.mode.data_kind() {
            DataKind::Plain => {
                let remaining = self.bulletin.size.saturating_sub(j * self.bulletin.s);
                &block[..block.len().min(remaining as usize)]
            }
            DataKind::Table => {
                let end = block.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
                &block[..end]
            }
        }
    }
}

impl BuyerProver for SimBuyer {
    fn nego_request(&mut self) -> Result<Vec<u8>, EngineError> {
        if !self.mode.is_ot() {
            return Err(EngineError::Unsupported("negotiation"));
        }
        let nonce = random_b256();
        self.nonce = Some(nonce);
        Ok(nonce.to_vec())
    }

    fn on_nego_request(&mut self, request: &[u8]) -> Result<Vec<u8>, EngineError> {
        if self.nonce.is_none() {
            return Err(EngineError::Verification("negotiation not started".to_string()));
        }
        self.negotiated = true;
        Ok(nego_answer(request).to_vec())
    }

    fn on_nego_response(&mut self, response: &[u8]) -> Result<(), EngineError> {
        let nonce = self
            .nonce
            .ok_or_else(|| EngineError::Verification("negotiation not started".to_string()))?;
        if response != nego_answer(nonce.as_slice()).as_slice() {
            return Err(EngineError::Verification(
                "seller's negotiation response does not answer our request".to_string(),
            ));
        }
        Ok(())
    }

    fn request(&mut self) -> Result<Vec<u8>, EngineError> {
        if self.mode.is_ot() && !self.negotiated {
            return Err(EngineError::Verification("OT request before negotiation".to_string()));
        }
        let pick = match &self.selection {
            Selection::Ranges { demands, phantoms } => {
                Pick::Ranges(if self.mode.is_ot() { phantoms } else { demands }.clone())
            }
            Selection::Query {
                key,
                values,
                phantoms,
            } => Pick::Values {
                key: key.clone(),
                values: if self.mode.is_ot() { phantoms } else { values }.clone(),
            },
        };
        encode(
            "request",
            &SimRequest {
                seed2: self.seed2,
                pick,
            },
        )
    }

    fn on_response(&mut self, response: &[u8]) -> Result<Receipt, EngineError> {
        let response: SimResponse = bincode::deserialize(response).map_err(malformed("response"))?;
        let count = self.selection.demand_count();

        let receipt = if self.mode.scheme() == Scheme::VrfQuery {
            let asked = match &self.selection {
                Selection::Query {
                    values, phantoms, ..
                } => {
                    if self.mode.is_ot() {
                        phantoms
                    } else {
                        values
                    }
                }
                Selection::Ranges { .. } => {
                    return Err(EngineError::Verification("VRF trade without a query".to_string()))
                }
            };
            let answered: Vec<&String> = response.hits.iter().map(|(v, _)| v).collect();
            if answered != asked.iter().collect::<Vec<_>>() {
                return Err(EngineError::Verification(
                    "response does not answer the queried values".to_string(),
                ));
            }
            Receipt::VrfQuery(VrfReceipt {
                g_exp_r: response.commit,
            })
        } else {
            if response.leaves.len() as u64 != self.bulletin.n
                || digest_root(&response.leaves) != self.bulletin.sigma_merkle_root
            {
                return Err(EngineError::Verification(
                    "leaves do not hash to the bulletin root".to_string(),
                ));
            }
            let expected = match &self.selection {
                Selection::Ranges { demands, phantoms } => {
                    expand(if self.mode.is_ot() { phantoms } else { demands })
                }
                Selection::Query { .. } => {
                    return Err(EngineError::Verification("range trade with a query".to_string()))
                }
            };
            let delivered: Vec<u64> = response.blocks.iter().map(|(j, _)| *j).collect();
            if delivered != expected {
                return Err(EngineError::Verification(
                    "delivered blocks differ from the requested ones".to_string(),
                ));
            }
            if response
                .blocks
                .iter()
                .any(|(_, c)| c.len() as u64 != self.bulletin.s)
            {
                return Err(EngineError::Verification("ciphertext of wrong length".to_string()));
            }
            let k_root = digest_root(&response.digests());
            match self.mode.scheme() {
                Scheme::Complaint => Receipt::Complaint(ComplaintReceipt {
                    seed2: self.seed2,
                    k_root,
                    count,
                }),
                Scheme::AtomicSwap => Receipt::AtomicSwap(AtomicSwapReceipt {
                    seed2: self.seed2,
                    sigma_vw: hash_concat(&[response.commit.as_slice(), k_root.as_slice()]),
                    count,
                }),
                _ => Receipt::AtomicSwapVc(AtomicSwapVcReceipt {
                    seed2: self.seed2,
                    vw_digest: hash_concat(&[
                        response.commit.as_slice(),
                        k_root.as_slice(),
                        self.seed2.as_slice(),
                    ]),
                    count,
                }),
            }
        };
        self.delivered = Some(response);
        Ok(receipt)
    }

    fn on_secret(&mut self, secret: &Secret) -> SecretCheck {
        match secret {
            Secret::Complaint(s) if self.mode.scheme() == Scheme::Complaint => {
                self.check_blocks(s.seed0)
            }
            Secret::AtomicSwap(s) if self.mode.scheme() == Scheme::AtomicSwap => self
                .check_commit(keccak256(s.seed0))
                .unwrap_or_else(|| self.check_blocks(s.seed0)),
            Secret::AtomicSwapVc(s) if self.mode.scheme() == Scheme::AtomicSwapVc => self
                .check_commit(hash_concat(&[s.seed0.as_slice(), s.seed0_rand.as_slice()]))
                .unwrap_or_else(|| self.check_blocks(s.seed0)),
            Secret::VrfQuery(s) if self.mode.scheme() == Scheme::VrfQuery => {
                if let Some(invalid) = self.check_commit(keccak256(s.r)) {
                    return invalid;
                }
                let (Some(delivered), Selection::Query { values, .. }) =
                    (&self.delivered, &self.selection)
                else {
                    return SecretCheck::Invalid("no query response recorded".to_string());
                };
                let mut positions = Vec::with_capacity(values.len());
                for value in values {
                    let Some((_, masked)) = delivered.hits.iter().find(|(v, _)| v == value) else {
                        return SecretCheck::Invalid(format!("no answer for {value:?}"));
                    };
                    positions.push(
                        masked
                            .iter()
                            .enumerate()
                            .map(|(k, m)| m ^ mask_word(s.r, value, k))
                            .collect(),
                    );
                }
                SecretCheck::Positions(positions)
            }
            other => SecretCheck::Invalid(format!(
                "{:?} secret for a {:?} trade",
                other.scheme(),
                self.mode.scheme()
            )),
        }
    }

    fn claim(&mut self) -> Result<Claim, EngineError> {
        let (i, j) = self
            .failed_block
            .ok_or_else(|| EngineError::Verification("no failed block to claim".to_string()))?;
        let delivered = self
            .delivered
            .as_ref()
            .ok_or_else(|| EngineError::Verification("no response recorded".to_string()))?;
        let cipher = delivered
            .blocks
            .get(i as usize)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| EngineError::Verification(format!("block {i} was not delivered")))?;
        Ok(Claim {
            i,
            j,
            cipher,
            m: delivered.digests(),
            leaves: delivered.leaves.clone(),
        })
    }

    fn decrypt(&mut self, output: &Path) -> Result<(), EngineError> {
        let plain = self
            .plaintext
            .as_ref()
            .ok_or_else(|| EngineError::Verification("nothing decrypted yet".to_string()))?;
        let Selection::Ranges { demands, .. } = &self.selection else {
            return Err(EngineError::Unsupported("decrypt"));
        };
        let mut out = Vec::new();
        for j in expand(demands) {
            let block = plain
                .get(&j)
                .ok_or_else(|| EngineError::Verification(format!("block {j} was not delivered")))?;
            out.extend_from_slice(self.payload(j, block));
        }
        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(output, out)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Seller
// ---------------------------------------------------------------------------

struct SimSeller {
    mode: TradeMode,
    prepared: Arc<Prepared>,
    faults: SimFaults,
    seed0: B256,
    seed0_rand: B256,
    r: B256,
    nonce: Option<B256>,
    negotiated: bool,
    sent: Option<Sent>,
}

/// What the seller committed to in its response.
struct Sent {
    seed2: B256,
    k_root: B256,
    commit: B256,
    delivered: u64,
}

impl SimSeller {
    fn commit(&self) -> B256 {
        match self.mode.scheme() {
            Scheme::AtomicSwapVc => hash_concat(&[self.seed0.as_slice(), self.seed0_rand.as_slice()]),
            Scheme::VrfQuery => keccak256(self.r),
            _ => keccak256(self.seed0),
        }
    }

    fn deliver_blocks(&self, seed2: B256, ranges: &[Range]) -> Result<(SimResponse, B256), EngineError> {
        let n = self.prepared.blocks.len() as u64;
        if ranges.is_empty() {
            return Err(EngineError::Verification("empty request".to_string()));
        }
        if let Some(bad) = ranges
            .iter()
            .find(|r| r.count == 0 || r.end().map_or(true, |end| end > n))
        {
            return Err(EngineError::Verification(format!(
                "range [{}, +{}) outside {n} blocks",
                bad.start, bad.count
            )));
        }
        let seed0 = self.seed0;
        let blocks: Vec<(u64, Vec<u8>)> = expand(ranges)
            .into_iter()
            .enumerate()
            .map(|(i, j)| {
                let mut block = self.prepared.blocks[j as usize].clone();
                if self.faults.corrupt_block && i == 0 {
                    block.iter_mut().for_each(|b| *b ^= 0xFF);
                }
                (j, encrypt_block(seed0, seed2, j, &block))
            })
            .collect();
        let response = SimResponse {
            leaves: self.prepared.leaves.clone(),
            blocks,
            commit: self.commit(),
            hits: Vec::new(),
        };
        let k_root = digest_root(&response.digests());
        Ok((response, k_root))
    }

    fn answer_query(&self, key: &str, values: &[String]) -> Result<SimResponse, EngineError> {
        let Dataset::Table { columns, rows } = &self.prepared.dataset else {
            return Err(EngineError::Verification("query against plain data".to_string()));
        };
        let col = columns
            .iter()
            .position(|c| c == key)
            .ok_or_else(|| EngineError::Verification(format!("unknown key column {key:?}")))?;
        let hits = values
            .iter()
            .map(|value| {
                let masked = rows
                    .iter()
                    .enumerate()
                    .filter(|(_, row)| row.get(col) == Some(value))
                    .enumerate()
                    .map(|(k, (pos, _))| pos as u64 ^ mask_word(self.r, value, k))
                    .collect();
                (value.clone(), masked)
            })
            .collect();
        Ok(SimResponse {
            leaves: Vec::new(),
            blocks: Vec::new(),
            commit: self.commit(),
            hits,
        })
    }
}

impl SellerProver for SimSeller {
    fn on_nego_request(&mut self, request: &[u8]) -> Result<Vec<u8>, EngineError> {
        if !self.mode.is_ot() {
            return Err(EngineError::Unsupported("negotiation"));
        }
        Ok(nego_answer(request).to_vec())
    }

    fn nego_request(&mut self) -> Result<Vec<u8>, EngineError> {
        let nonce = random_b256();
        self.nonce = Some(nonce);
        Ok(nonce.to_vec())
    }

    fn on_nego_response(&mut self, response: &[u8]) -> Result<(), EngineError> {
        let nonce = self
            .nonce
            .ok_or_else(|| EngineError::Verification("negotiation not started".to_string()))?;
        if response != nego_answer(nonce.as_slice()).as_slice() {
            return Err(EngineError::Verification(
                "buyer's negotiation response does not answer our request".to_string(),
            ));
        }
        self.negotiated = true;
        Ok(())
    }

    fn on_request(&mut self, request: &[u8]) -> Result<Vec<u8>, EngineError> {
        if self.mode.is_ot() && !self.negotiated {
            return Err(EngineError::Verification("OT request before negotiation".to_string()));
        }
        let request: SimRequest = bincode::deserialize(request).map_err(malformed("request"))?;
        let (response, sent) = match (&request.pick, self.mode.scheme()) {
            (Pick::Values { key, values }, Scheme::VrfQuery) => {
                let response = self.answer_query(key, values)?;
                let sent = Sent {
                    seed2: request.seed2,
                    k_root: B256::ZERO,
                    commit: response.commit,
                    delivered: values.len() as u64,
                };
                (response, sent)
            }
            (Pick::Ranges(ranges), scheme) if scheme != Scheme::VrfQuery => {
                let (response, k_root) = self.deliver_blocks(request.seed2, ranges)?;
                let sent = Sent {
                    seed2: request.seed2,
                    k_root,
                    commit: response.commit,
                    delivered: response.blocks.len() as u64,
                };
                (response, sent)
            }
            _ => {
                return Err(EngineError::Verification(format!(
                    "request shape does not fit {}",
                    self.mode
                )))
            }
        };
        self.sent = Some(sent);
        encode("response", &response)
    }

    fn on_receipt(&mut self, receipt: &Receipt) -> Result<Secret, EngineError> {
        let sent = self
            .sent
            .as_ref()
            .ok_or_else(|| EngineError::Verification("receipt before response".to_string()))?;
        // Plain transfer: the receipt pays for exactly what was sent. OT:
        // the demands are hidden among the sent phantoms.
        let count_ok = |count: u64| match self.mode.transfer() {
            Transfer::Plain => count == sent.delivered,
            Transfer::Ot => count > 0 && count <= sent.delivered,
        };
        let valid = match receipt {
            Receipt::Complaint(r) => {
                r.seed2 == sent.seed2 && r.k_root == sent.k_root && count_ok(r.count)
            }
            Receipt::AtomicSwap(r) => {
                r.seed2 == sent.seed2
                    && r.sigma_vw == hash_concat(&[sent.commit.as_slice(), sent.k_root.as_slice()])
                    && count_ok(r.count)
            }
            Receipt::AtomicSwapVc(r) => {
                r.seed2 == sent.seed2
                    && r.vw_digest
                        == hash_concat(&[
                            sent.commit.as_slice(),
                            sent.k_root.as_slice(),
                            sent.seed2.as_slice(),
                        ])
                    && count_ok(r.count)
            }
            Receipt::VrfQuery(r) => r.g_exp_r == sent.commit,
        };
        if receipt.scheme() != self.mode.scheme() || !valid {
            return Err(EngineError::Verification(
                "receipt does not commit to the delivered response".to_string(),
            ));
        }

        let seed0 = if self.faults.wrong_secret {
            random_b256()
        } else {
            self.seed0
        };
        Ok(match self.mode.scheme() {
            Scheme::Complaint => Secret::Complaint(ComplaintSecret { seed0 }),
            Scheme::AtomicSwap => Secret::AtomicSwap(AtomicSwapSecret { seed0 }),
            Scheme::AtomicSwapVc => Secret::AtomicSwapVc(AtomicSwapVcSecret {
                seed0,
                seed0_rand: self.seed0_rand,
            }),
            Scheme::VrfQuery => Secret::VrfQuery(VrfSecret {
                r: if self.faults.wrong_secret { seed0 } else { self.r },
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::complaint::{verify_claim, ClaimError};

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn table() -> Dataset {
        Dataset::Table {
            columns: vec!["name".into(), "city".into()],
            rows: vec![
                vec!["alice".into(), "lisbon".into()],
                vec!["bob".into(), "porto".into()],
                vec!["carol".into(), "lisbon".into()],
                vec!["dave".into(), "braga".into()],
            ],
        }
    }

    struct Run {
        buyer: Box<dyn BuyerProver>,
        receipt: Receipt,
        secret: Secret,
    }

    fn run(engine: &SimEngine, bulletin: &Bulletin, selection: Selection) -> Run {
        let mode = bulletin.mode;
        let mut buyer = engine
            .buyer_session(&BuyerSessionParams {
                session_id: 1,
                mode,
                bulletin: bulletin.clone(),
                selection,
            })
            .unwrap();
        let mut seller = engine.seller_session(1, mode, bulletin).unwrap();
        if mode.is_ot() {
            let req = buyer.nego_request().unwrap();
            let resp = seller.on_nego_request(&req).unwrap();
            let seller_req = seller.nego_request().unwrap();
            buyer.on_nego_response(&resp).unwrap();
            let buyer_resp = buyer.on_nego_request(&seller_req).unwrap();
            seller.on_nego_response(&buyer_resp).unwrap();
        }
        let request = buyer.request().unwrap();
        let response = seller.on_request(&request).unwrap();
        let receipt = buyer.on_response(&response).unwrap();
        let secret = seller.on_receipt(&receipt).unwrap();
        Run {
            buyer,
            receipt,
            secret,
        }
    }

    #[test]
    fn plain_complaint_decrypts_demand() {
        let engine = SimEngine::new();
        let bytes = data(1000);
        let bulletin = engine
            .publish(Dataset::Plain(bytes.clone()), TradeMode::PlainComplaint, 64)
            .unwrap();
        assert_eq!(bulletin.n, 16);

        let mut run = run(&engine, &bulletin, Selection::ranges(vec![Range::new(14, 2)]));
        assert_eq!(run.receipt.count(), Some(2));
        assert_eq!(run.buyer.on_secret(&run.secret), SecretCheck::Valid);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.bin");
        run.buyer.decrypt(&out).unwrap();
        assert_eq!(std::fs::read(out).unwrap(), &bytes[14 * 64..]);
    }

    fn complaint_parts(run: &Run) -> (&ComplaintReceipt, B256) {
        let (Receipt::Complaint(receipt), Secret::Complaint(secret)) = (&run.receipt, &run.secret)
        else {
            panic!("complaint trade expected");
        };
        (receipt, secret.seed0)
    }

    #[test]
    fn corrupt_block_yields_claim() {
        let engine = SimEngine::with_faults(SimFaults {
            corrupt_block: true,
            ..SimFaults::default()
        });
        let bulletin = engine
            .publish(Dataset::Plain(data(640)), TradeMode::PlainComplaint, 64)
            .unwrap();
        let mut run = run(&engine, &bulletin, Selection::ranges(vec![Range::new(3, 4)]));
        assert!(matches!(run.buyer.on_secret(&run.secret), SecretCheck::Invalid(_)));

        let claim = run.buyer.claim().unwrap();
        assert_eq!((claim.i, claim.j), (0, 3));
        assert_eq!(claim.m.len(), 4);
        let (receipt, seed0) = complaint_parts(&run);
        assert_eq!(
            verify_claim(&claim, receipt, seed0, bulletin.sigma_merkle_root),
            Ok(())
        );
    }

    #[test]
    fn honest_delivery_leaves_nothing_to_claim() {
        let engine = SimEngine::new();
        let bulletin = engine
            .publish(Dataset::Plain(data(640)), TradeMode::PlainComplaint, 64)
            .unwrap();
        let mut run = run(&engine, &bulletin, Selection::ranges(vec![Range::new(3, 4)]));
        assert_eq!(run.buyer.on_secret(&run.secret), SecretCheck::Valid);
        assert!(run.buyer.claim().is_err());

        // A buyer rebuilding a claim from what it received gets nowhere.
        let blocks = data(640);
        let (receipt, seed0) = complaint_parts(&run);
        let ciphers: Vec<(u64, Vec<u8>)> = (3..7u64)
            .map(|j| {
                let block = &blocks[j as usize * 64..(j as usize + 1) * 64];
                (j, encrypt_block(seed0, receipt.seed2, j, block))
            })
            .collect();
        let leaves: Vec<B256> = blocks.chunks(64).map(keccak256).collect();
        let claim = Claim {
            i: 0,
            j: 3,
            cipher: ciphers[0].1.clone(),
            m: ciphers.iter().map(|(j, c)| cipher_digest(*j, c)).collect(),
            leaves,
        };
        assert_eq!(
            verify_claim(&claim, receipt, seed0, bulletin.sigma_merkle_root),
            Err(ClaimError::BlockMatchesLeaf(3))
        );
    }

    #[test]
    fn plain_receipt_must_pay_for_every_sent_block() {
        let engine = SimEngine::new();
        let bulletin = engine
            .publish(Dataset::Plain(data(640)), TradeMode::PlainAtomicSwap, 64)
            .unwrap();
        let mut buyer = engine
            .buyer_session(&BuyerSessionParams {
                session_id: 1,
                mode: bulletin.mode,
                bulletin: bulletin.clone(),
                selection: Selection::ranges(vec![Range::new(0, 10)]),
            })
            .unwrap();
        let mut seller = engine.seller_session(1, bulletin.mode, &bulletin).unwrap();
        let response = seller.on_request(&buyer.request().unwrap()).unwrap();
        let Receipt::AtomicSwap(mut receipt) = buyer.on_response(&response).unwrap() else {
            panic!("atomic swap receipt expected");
        };
        assert_eq!(receipt.count, 10);

        receipt.count = 1;
        assert!(seller.on_receipt(&Receipt::AtomicSwap(receipt.clone())).is_err());
        receipt.count = 11;
        assert!(seller.on_receipt(&Receipt::AtomicSwap(receipt.clone())).is_err());
        receipt.count = 10;
        assert!(seller.on_receipt(&Receipt::AtomicSwap(receipt)).is_ok());
    }

    #[test]
    fn wrong_secret_fails_atomic_swap_commitment() {
        let engine = SimEngine::with_faults(SimFaults {
            wrong_secret: true,
            ..SimFaults::default()
        });
        let bulletin = engine
            .publish(Dataset::Plain(data(256)), TradeMode::PlainAtomicSwapVc, 32)
            .unwrap();
        let mut run = run(&engine, &bulletin, Selection::ranges(vec![Range::new(0, 8)]));
        assert!(matches!(run.buyer.on_secret(&run.secret), SecretCheck::Invalid(_)));
    }

    #[test]
    fn ot_table_rows_hidden_in_phantoms() {
        let engine = SimEngine::new();
        let bulletin = engine.publish(table(), TradeMode::TableOtComplaint, 0).unwrap();
        let selection = Selection::Ranges {
            demands: vec![Range::new(1, 1)],
            phantoms: vec![Range::new(0, 3)],
        };
        let mut run = run(&engine, &bulletin, selection);
        assert_eq!(run.receipt.count(), Some(1));
        assert_eq!(run.buyer.on_secret(&run.secret), SecretCheck::Valid);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rows.csv");
        run.buyer.decrypt(&out).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "bob,porto\n");
    }

    #[test]
    fn vrf_query_unblinds_positions() {
        let engine = SimEngine::new();
        let bulletin = engine.publish(table(), TradeMode::TableOtVrfQuery, 0).unwrap();
        let selection = Selection::Query {
            key: "city".into(),
            values: vec!["lisbon".into()],
            phantoms: vec!["braga".into(), "lisbon".into()],
        };
        let mut run = run(&engine, &bulletin, selection);
        assert_eq!(run.receipt.count(), None);
        assert_eq!(
            run.buyer.on_secret(&run.secret),
            SecretCheck::Positions(vec![vec![0, 2]])
        );
    }

    #[test]
    fn ot_request_requires_negotiation() {
        let engine = SimEngine::new();
        let bulletin = engine
            .publish(Dataset::Plain(data(64)), TradeMode::PlainOtAtomicSwap, 16)
            .unwrap();
        let mut buyer = engine
            .buyer_session(&BuyerSessionParams {
                session_id: 1,
                mode: bulletin.mode,
                bulletin: bulletin.clone(),
                selection: Selection::Ranges {
                    demands: vec![Range::new(0, 1)],
                    phantoms: vec![Range::new(0, 2)],
                },
            })
            .unwrap();
        assert!(buyer.request().is_err());
    }

    #[test]
    fn seller_rejects_foreign_receipt() {
        let engine = SimEngine::new();
        let bulletin = engine
            .publish(Dataset::Plain(data(128)), TradeMode::PlainComplaint, 32)
            .unwrap();
        let mut buyer = engine
            .buyer_session(&BuyerSessionParams {
                session_id: 1,
                mode: bulletin.mode,
                bulletin: bulletin.clone(),
                selection: Selection::ranges(vec![Range::new(0, 2)]),
            })
            .unwrap();
        let mut seller = engine.seller_session(1, bulletin.mode, &bulletin).unwrap();
        let response = seller.on_request(&buyer.request().unwrap()).unwrap();
        let Receipt::Complaint(mut receipt) = buyer.on_response(&response).unwrap() else {
            panic!("complaint receipt expected");
        };
        receipt.k_root = B256::repeat_byte(0xEE);
        assert!(seller.on_receipt(&Receipt::Complaint(receipt)).is_err());
    }

    #[test]
    fn unknown_dataset_refused() {
        let engine = SimEngine::new();
        let bulletin = Bulletin {
            mode: TradeMode::PlainComplaint,
            size: 1,
            s: 1,
            n: 1,
            sigma_merkle_root: B256::repeat_byte(1),
        };
        assert!(matches!(
            engine.seller_session(1, bulletin.mode, &bulletin),
            Err(EngineError::UnknownDataset(_))
        ));
    }
}
