//! # TxStore — Durable Trade Records
//!
//! Persistence for [`Transaction`] records, built on sled's embedded
//! key-value store. Every status change of a live trade lands here, so
//! an operator can audit exactly where each trade stopped.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                              | Value                  |
//! |----------------|----------------------------------|------------------------|
//! | `transactions` | `TradeId::to_key()` (49 bytes)   | `bincode(Transaction)` |
//!
//! Keys start with the role byte followed by the big-endian session id,
//! so a prefix scan walks one side's trades in session order.

use sled::{Db, Tree};
use std::path::Path;

use crate::trade::{Role, TradeId, Transaction};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// TxStore
// ---------------------------------------------------------------------------

/// Durable store of trade records.
///
/// # Thread Safety
///
/// sled trees support concurrent reads and serialized writes, so a
/// `TxStore` is cloned into every flow without external locking.
#[derive(Debug, Clone)]
pub struct TxStore {
    db: Db,
    transactions: Tree,
}

impl TxStore {
    /// Open or create a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary store that is removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let transactions = db.open_tree("transactions")?;
        Ok(Self { db, transactions })
    }

    /// Insert or overwrite the record for `tx.id()`.
    pub fn put(&self, tx: &Transaction) -> DbResult<()> {
        let bytes = bincode::serialize(tx).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.transactions.insert(tx.id().to_key(), bytes)?;
        Ok(())
    }

    pub fn get(&self, id: &TradeId) -> DbResult<Option<Transaction>> {
        match self.transactions.get(id.to_key())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every record, buyer side first, each side in session order.
    pub fn list(&self) -> DbResult<Vec<Transaction>> {
        self.transactions
            .iter()
            .map(|entry| {
                let (_key, value) = entry?;
                decode(&value)
            })
            .collect()
    }

    /// Records of one side only.
    pub fn list_role(&self, role: Role) -> DbResult<Vec<Transaction>> {
        let prefix = [match role {
            Role::Buyer => 0u8,
            Role::Seller => 1u8,
        }];
        self.transactions
            .scan_prefix(prefix)
            .map(|entry| {
                let (_key, value) = entry?;
                decode(&value)
            })
            .collect()
    }

    /// Records whose flow never reached an end, e.g. because the process
    /// died mid-trade.
    pub fn unfinished(&self) -> DbResult<Vec<Transaction>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|tx| !tx.is_finished())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> DbResult<Transaction> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{
        Bulletin, ComplaintReceipt, Range, Receipt, Selection, TradeMode, TxStatus,
    };
    use alloy_primitives::{Address, B256, U256};

    fn record(role: Role, session_id: u64, status: TxStatus) -> Transaction {
        let id = TradeId {
            role,
            session_id,
            seller: Address::repeat_byte(0x5E),
            buyer: Address::repeat_byte(0xB0),
        };
        let bulletin = Bulletin {
            mode: TradeMode::PlainComplaint,
            size: 640,
            s: 64,
            n: 10,
            sigma_merkle_root: B256::repeat_byte(9),
        };
        let mut tx = Transaction::new(
            id,
            bulletin,
            Some(Selection::ranges(vec![Range::new(0, 10)])),
            U256::from(5u64),
        );
        tx.status = status;
        tx
    }

    #[test]
    fn open_temporary_store() {
        let store = TxStore::open_temporary().expect("should create temp store");
        assert!(store.is_empty());
    }

    #[test]
    fn put_and_get_round_trip() {
        let store = TxStore::open_temporary().unwrap();
        let mut tx = record(Role::Buyer, 1, TxStatus::ReceiptSent);
        tx.session
            .set_receipt(&Receipt::Complaint(ComplaintReceipt {
                seed2: B256::repeat_byte(1),
                k_root: B256::repeat_byte(2),
                count: 10,
            }))
            .unwrap();
        tx.price = U256::from(50u64);
        store.put(&tx).unwrap();

        let loaded = store.get(&tx.id()).unwrap().expect("record should exist");
        assert_eq!(loaded, tx);
    }

    #[test]
    fn put_overwrites() {
        let store = TxStore::open_temporary().unwrap();
        let mut tx = record(Role::Seller, 4, TxStatus::Start);
        store.put(&tx).unwrap();
        tx.status = TxStatus::Closed;
        store.put(&tx).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&tx.id()).unwrap().unwrap().status, TxStatus::Closed);
    }

    #[test]
    fn unfinished_filters_terminal_records() {
        let store = TxStore::open_temporary().unwrap();
        store.put(&record(Role::Buyer, 1, TxStatus::Closed)).unwrap();
        store.put(&record(Role::Buyer, 2, TxStatus::ReceiptSent)).unwrap();
        store.put(&record(Role::Seller, 3, TxStatus::SendSecretTerminated)).unwrap();
        store.put(&record(Role::Seller, 4, TxStatus::RequestSent)).unwrap();

        let mut open: Vec<_> = store
            .unfinished()
            .unwrap()
            .into_iter()
            .map(|tx| tx.session_id)
            .collect();
        open.sort();
        assert_eq!(open, vec![2, 4]);
    }

    #[test]
    fn list_role_scans_one_side() {
        let store = TxStore::open_temporary().unwrap();
        store.put(&record(Role::Seller, 2, TxStatus::Closed)).unwrap();
        store.put(&record(Role::Buyer, 9, TxStatus::Closed)).unwrap();
        store.put(&record(Role::Seller, 1, TxStatus::Closed)).unwrap();

        let sellers: Vec<_> = store
            .list_role(Role::Seller)
            .unwrap()
            .into_iter()
            .map(|tx| tx.session_id)
            .collect();
        assert_eq!(sellers, vec![1, 2]);
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tx = record(Role::Buyer, 11, TxStatus::SecretReceived);
        {
            let store = TxStore::open(dir.path()).expect("should open store");
            store.put(&tx).unwrap();
            store.flush().unwrap();
        }
        let store = TxStore::open(dir.path()).expect("should reopen store");
        assert_eq!(store.get(&tx.id()).unwrap(), Some(tx));
    }
}
