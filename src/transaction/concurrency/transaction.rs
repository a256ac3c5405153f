use std::collections::{HashMap, HashSet};
use parking_lot::{Mutex, MutexGuard};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Every lock a transaction holds, recorded in exactly one per-mode set.
/// Row locks are keyed by their table so table unlock can verify that no
/// row locks remain underneath.
#[derive(Debug, Default)]
pub struct TransactionLockSets {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl TransactionLockSets {
    fn table_set(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }
}

/// An active database transaction: its 2PL state and lock bookkeeping.
/// The lock manager blocks the owning thread; the deadlock detector may
/// flip the state to `Aborted` from its own thread.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    lock_sets: Mutex<TransactionLockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            lock_sets: Mutex::new(TransactionLockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn lock_sets(&self) -> MutexGuard<'_, TransactionLockSets> {
        self.lock_sets.lock()
    }

    pub(crate) fn add_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.lock_sets.lock().table_set(mode).insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.lock_sets.lock().table_set(mode).remove(&oid);
    }

    pub(crate) fn add_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut sets = self.lock_sets.lock();
        let rows = match mode {
            LockMode::Shared => &mut sets.shared_rows,
            LockMode::Exclusive => &mut sets.exclusive_rows,
            _ => unreachable!("intention lock recorded on a row"),
        };
        rows.entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut sets = self.lock_sets.lock();
        let rows = match mode {
            LockMode::Shared => &mut sets.shared_rows,
            LockMode::Exclusive => &mut sets.exclusive_rows,
            _ => unreachable!("intention lock recorded on a row"),
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
            if set.is_empty() {
                rows.remove(&oid);
            }
        }
    }

    /// Whether this transaction holds a lock on the table in any of the
    /// given modes
    pub fn holds_table_lock(&self, oid: TableOid, modes: &[LockMode]) -> bool {
        let sets = self.lock_sets.lock();
        modes.iter().any(|mode| match mode {
            LockMode::Shared => sets.shared_tables.contains(&oid),
            LockMode::Exclusive => sets.exclusive_tables.contains(&oid),
            LockMode::IntentionShared => sets.intention_shared_tables.contains(&oid),
            LockMode::IntentionExclusive => sets.intention_exclusive_tables.contains(&oid),
            LockMode::SharedIntentionExclusive => {
                sets.shared_intention_exclusive_tables.contains(&oid)
            }
        })
    }

    /// Whether any row of the table is still locked by this transaction
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
            || sets.exclusive_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);

        txn.add_table_lock(LockMode::IntentionExclusive, 7);
        assert!(txn.holds_table_lock(7, &[LockMode::IntentionExclusive]));
        assert!(!txn.holds_table_lock(7, &[LockMode::Exclusive, LockMode::Shared]));

        txn.add_row_lock(LockMode::Exclusive, 7, 100);
        assert!(txn.holds_row_locks_on(7));
        assert!(!txn.holds_row_locks_on(8));

        txn.remove_row_lock(LockMode::Exclusive, 7, 100);
        assert!(!txn.holds_row_locks_on(7));

        txn.remove_table_lock(LockMode::IntentionExclusive, 7);
        assert!(!txn.holds_table_lock(7, &[LockMode::IntentionExclusive]));
    }

    #[test]
    fn test_state_transitions_visible_across_threads() {
        use std::sync::Arc;
        let txn = Arc::new(Transaction::new(3, IsolationLevel::RepeatableRead));
        let other = txn.clone();

        let handle = std::thread::spawn(move || {
            other.set_state(TransactionState::Aborted);
        });
        handle.join().unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
