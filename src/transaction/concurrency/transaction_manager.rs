use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, TransactionError};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Hands out transaction ids, tracks the active transactions, and reaps
/// them on commit/abort by releasing every lock they still hold.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Start a transaction; ids are allocated monotonically, so a later
    /// transaction is always the newer one
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, isolation_level));
        self.active.lock().insert(id, txn.clone());
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active.lock().get(&txn_id).cloned()
    }

    /// Commit: release all held locks and retire the transaction
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::InvalidState(txn.id()));
        }
        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Committed);
        self.active.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: release all held locks, mark the transaction aborted, and
    /// retire it. Safe to call on a deadlock victim that is already
    /// marked aborted.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.active.lock().remove(&txn.id());
    }
}
