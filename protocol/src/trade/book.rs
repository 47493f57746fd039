//! # Trade Book
//!
//! The shared state of every flow in the process:
//!
//! - the **live map**: one entry per running trade, keyed by
//!   [`TradeId`]. Opening a trade whose id is already live fails;
//! - the **deposit locks**: per `(seller, buyer)`, the sum of receipt
//!   prices a seller is currently settling, so concurrent trades with
//!   the same buyer cannot each spend the same deposit;
//! - the durable [`TxStore`].
//!
//! Critical sections are a single map operation; nothing is held across a
//! network or ledger call.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::storage::TxStore;

use super::error::{FailureCause, TradeError};
use super::status::TxStatus;
use super::transaction::{TradeId, Transaction};

// ---------------------------------------------------------------------------
// Trade Book
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TradeBook {
    live: DashMap<TradeId, TxStatus>,
    deposits: DepositLocks,
    store: TxStore,
}

impl TradeBook {
    pub fn new(store: TxStore) -> Arc<Self> {
        Arc::new(Self {
            live: DashMap::new(),
            deposits: DepositLocks::default(),
            store,
        })
    }

    /// Register a new live trade and persist its first record.
    pub fn open(self: &Arc<Self>, tx: Transaction) -> Result<LiveTrade, TradeError> {
        let id = tx.id();
        match self.live.entry(id) {
            Entry::Occupied(_) => return Err(TradeError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx.status);
            }
        }
        if let Err(e) = self.store.put(&tx) {
            self.live.remove(&id);
            return Err(e.into());
        }
        tracing::debug!(trade = %id, "trade opened");
        Ok(LiveTrade {
            book: Arc::clone(self),
            tx,
        })
    }

    pub fn is_live(&self, id: &TradeId) -> bool {
        self.live.contains_key(id)
    }

    /// Current status of a live trade.
    pub fn live_status(&self, id: &TradeId) -> Option<TxStatus> {
        self.live.get(id).map(|status| *status)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn deposits(&self) -> &DepositLocks {
        &self.deposits
    }

    pub fn store(&self) -> &TxStore {
        &self.store
    }
}

// ---------------------------------------------------------------------------
// Live Trade
// ---------------------------------------------------------------------------

/// Exclusive handle on one live trade.
///
/// Every status change is checked against the current status, persisted,
/// and mirrored into the live map. Dropping the handle persists the final
/// record and evicts the trade from the live map, whatever path the flow
/// took to get there.
#[derive(Debug)]
pub struct LiveTrade {
    book: Arc<TradeBook>,
    tx: Transaction,
}

impl LiveTrade {
    pub fn id(&self) -> TradeId {
        self.tx.id()
    }

    pub fn status(&self) -> TxStatus {
        self.tx.status
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Edit record fields other than the status. Persisted with the next
    /// status change.
    pub fn record(&mut self, edit: impl FnOnce(&mut Transaction)) {
        let status = self.tx.status;
        let history = std::mem::take(&mut self.tx.history);
        edit(&mut self.tx);
        self.tx.status = status;
        self.tx.history = history;
    }

    /// Same as [`record`](Self::record) for edits that can fail.
    pub fn try_record(
        &mut self,
        edit: impl FnOnce(&mut Transaction) -> Result<(), TradeError>,
    ) -> Result<(), TradeError> {
        let status = self.tx.status;
        let history = std::mem::take(&mut self.tx.history);
        let result = edit(&mut self.tx);
        self.tx.status = status;
        self.tx.history = history;
        result
    }

    /// Move to `next` and persist.
    pub fn set_status(&mut self, next: TxStatus) -> Result<(), TradeError> {
        let current = self.tx.status;
        if self.tx.is_finished() || !current.can_advance_to(next) {
            return Err(TradeError::StatusRegression {
                from: current,
                to: next,
            });
        }
        self.tx.status = next;
        self.tx.history.push(next);
        self.tx.updated_at = Utc::now();
        self.book.live.insert(self.tx.id(), next);
        self.book.store.put(&self.tx)?;
        tracing::info!(
            session_id = self.tx.session_id,
            role = ?self.tx.role,
            mode = %self.tx.mode,
            status = %next,
            "trade status"
        );
        Ok(())
    }

    /// Record a failure at `status` and build the error to return.
    ///
    /// A trade already at `status` keeps it; a status that cannot be
    /// entered any more is logged and the record keeps its current one.
    pub fn fail(&mut self, status: TxStatus, cause: impl Into<FailureCause>) -> TradeError {
        let cause = cause.into();
        self.tx.failure = Some(cause.to_string());
        if self.tx.status != status {
            if let Err(e) = self.set_status(status) {
                tracing::warn!(trade = %self.id(), error = %e, "could not record failure status");
            }
        } else if let Err(e) = self.book.store.put(&self.tx) {
            tracing::warn!(trade = %self.id(), error = %e, "could not persist failure");
        }
        tracing::warn!(
            session_id = self.tx.session_id,
            role = ?self.tx.role,
            status = %status,
            cause = %cause,
            "trade failed"
        );
        TradeError::Failed { status, cause }
    }

    /// A copy of the current record.
    pub fn snapshot(&self) -> Transaction {
        self.tx.clone()
    }
}

impl Drop for LiveTrade {
    fn drop(&mut self) {
        let id = self.tx.id();
        if let Err(e) = self.book.store.put(&self.tx) {
            tracing::error!(trade = %id, error = %e, "failed to persist trade on close");
        }
        self.book.live.remove(&id);
        tracing::debug!(trade = %id, status = %self.tx.status, "trade evicted");
    }
}

// ---------------------------------------------------------------------------
// Deposit Locks
// ---------------------------------------------------------------------------

/// Receipt prices reserved against each buyer's deposit with a seller.
#[derive(Debug, Default)]
pub struct DepositLocks {
    locked: Mutex<HashMap<(Address, Address), U256>>,
}

impl DepositLocks {
    /// Reserve `price` and return the reservation with the total now
    /// locked for the pair, this reservation included.
    pub fn reserve(&self, seller: Address, buyer: Address, price: U256) -> Reservation<'_> {
        let mut locked = self.locked.lock();
        let entry = locked.entry((seller, buyer)).or_insert(U256::ZERO);
        *entry = entry.saturating_add(price);
        let total = *entry;
        Reservation {
            locks: self,
            seller,
            buyer,
            price,
            total,
        }
    }

    /// Currently locked amount for a pair.
    pub fn locked(&self, seller: Address, buyer: Address) -> U256 {
        self.locked
            .lock()
            .get(&(seller, buyer))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn release(&self, seller: Address, buyer: Address, price: U256) {
        let mut locked = self.locked.lock();
        if let Some(entry) = locked.get_mut(&(seller, buyer)) {
            *entry = entry.saturating_sub(price);
            if entry.is_zero() {
                locked.remove(&(seller, buyer));
            }
        }
    }
}

/// A live reservation. Released on drop, once the secret is settled (the
/// ledger has debited the deposit) or the settlement was abandoned.
#[derive(Debug)]
pub struct Reservation<'a> {
    locks: &'a DepositLocks,
    seller: Address,
    buyer: Address,
    price: U256,
    total: U256,
}

impl Reservation<'_> {
    /// Locked total for the pair at reservation time.
    pub fn total(&self) -> U256 {
        self.total
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.locks.release(self.seller, self.buyer, self.price);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::{Bulletin, Role, TradeMode};
    use alloy_primitives::B256;

    fn tx(session_id: u64) -> Transaction {
        let id = TradeId {
            role: Role::Seller,
            session_id,
            seller: Address::repeat_byte(1),
            buyer: Address::repeat_byte(2),
        };
        let bulletin = Bulletin {
            mode: TradeMode::PlainComplaint,
            size: 64,
            s: 64,
            n: 1,
            sigma_merkle_root: B256::ZERO,
        };
        Transaction::new(id, bulletin, None, U256::from(1u64))
    }

    fn book() -> Arc<TradeBook> {
        TradeBook::new(TxStore::open_temporary().unwrap())
    }

    #[test]
    fn duplicate_trade_id_refused() {
        let book = book();
        let first = book.open(tx(1)).unwrap();
        assert!(matches!(book.open(tx(1)), Err(TradeError::Duplicate(_))));
        assert!(book.open(tx(2)).is_ok());
        drop(first);
        assert!(book.open(tx(1)).is_ok());
    }

    #[test]
    fn status_changes_are_persisted() {
        let book = book();
        let mut trade = book.open(tx(5)).unwrap();
        let id = trade.id();
        trade.set_status(TxStatus::ResponseSent).unwrap();
        assert_eq!(book.live_status(&id), Some(TxStatus::ResponseSent));
        assert_eq!(
            book.store().get(&id).unwrap().unwrap().status,
            TxStatus::ResponseSent
        );
    }

    #[test]
    fn history_keeps_every_status() {
        let book = book();
        let mut trade = book.open(tx(6)).unwrap();
        let id = trade.id();
        trade.set_status(TxStatus::ResponseSent).unwrap();
        trade.record(|tx| tx.history.clear());
        let _ = trade.fail(TxStatus::InvalidReceipt, FailureCause::Rejected("count".into()));
        drop(trade);
        assert_eq!(
            book.store().get(&id).unwrap().unwrap().history,
            [TxStatus::Start, TxStatus::ResponseSent, TxStatus::InvalidReceipt]
        );
    }

    #[test]
    fn status_never_moves_backwards() {
        let book = book();
        let mut trade = book.open(tx(5)).unwrap();
        trade.set_status(TxStatus::ReceiptReceived).unwrap();
        assert!(matches!(
            trade.set_status(TxStatus::ResponseSent),
            Err(TradeError::StatusRegression { .. })
        ));
        trade.set_status(TxStatus::Closed).unwrap();
        assert!(trade.set_status(TxStatus::Cancelled).is_err());
        assert_eq!(trade.status(), TxStatus::Closed);
    }

    #[test]
    fn drop_evicts_and_persists() {
        let book = book();
        let mut trade = book.open(tx(9)).unwrap();
        let id = trade.id();
        trade.record(|tx| tx.price = U256::from(42u64));
        assert!(book.is_live(&id));
        drop(trade);
        assert!(!book.is_live(&id));
        assert_eq!(book.live_count(), 0);
        assert_eq!(book.store().get(&id).unwrap().unwrap().price, U256::from(42u64));
    }

    #[test]
    fn fail_records_status_and_cause() {
        let book = book();
        let mut trade = book.open(tx(3)).unwrap();
        let err = trade.fail(TxStatus::SendSecretTerminated, FailureCause::Rejected("deposit".into()));
        assert_eq!(err.status(), Some(TxStatus::SendSecretTerminated));
        let stored = book.store().get(&trade.id()).unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::SendSecretTerminated);
        assert_eq!(stored.failure.as_deref(), Some("deposit"));
    }

    #[test]
    fn record_cannot_touch_status() {
        let book = book();
        let mut trade = book.open(tx(4)).unwrap();
        trade.record(|tx| tx.status = TxStatus::Closed);
        assert_eq!(trade.status(), TxStatus::Start);
    }

    #[test]
    fn reservations_accumulate_and_release() {
        let locks = DepositLocks::default();
        let (s, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        let first = locks.reserve(s, b, U256::from(10u64));
        assert_eq!(first.total(), U256::from(10u64));
        {
            let second = locks.reserve(s, b, U256::from(5u64));
            assert_eq!(second.total(), U256::from(15u64));
        }
        assert_eq!(locks.locked(s, b), U256::from(10u64));
        assert_eq!(locks.locked(s, Address::repeat_byte(3)), U256::ZERO);
        drop(first);
        assert_eq!(locks.locked(s, b), U256::ZERO);
    }
}
