use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::deadlock::WaitsForGraph;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Multi-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    const ALL: [LockMode; 5] = [
        LockMode::IntentionShared,
        LockMode::IntentionExclusive,
        LockMode::Shared,
        LockMode::SharedIntentionExclusive,
        LockMode::Exclusive,
    ];

    /// Standard multi-granularity compatibility matrix
    pub fn compatible_with(self, held: LockMode) -> bool {
        use LockMode::*;
        match (held, self) {
            (IntentionShared, Exclusive) | (Exclusive, _) => false,
            (IntentionShared, _) => true,
            (IntentionExclusive, IntentionShared) | (IntentionExclusive, IntentionExclusive) => {
                true
            }
            (IntentionExclusive, _) => false,
            (Shared, IntentionShared) | (Shared, Shared) => true,
            (Shared, _) => false,
            (SharedIntentionExclusive, IntentionShared) => true,
            (SharedIntentionExclusive, _) => false,
        }
    }

    /// Legal lock upgrades: IS -> {S, X, IX, SIX}, S -> {X, SIX},
    /// IX -> {X, SIX}, SIX -> {X}
    pub fn upgradable_to(self, requested: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => matches!(
                requested,
                Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive
            ),
            Shared | IntentionExclusive => {
                matches!(requested, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => requested == Exclusive,
            Exclusive => false,
        }
    }

    /// Rows only take S or X; intention modes stay on tables
    pub fn allowed_on_row(self) -> bool {
        matches!(self, LockMode::Shared | LockMode::Exclusive)
    }
}

/// Why a transaction was aborted by the lock manager
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    #[error("LOCK_ON_SHRINKING")]
    LockOnShrinking,
    #[error("LOCK_SHARED_ON_READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,
    #[error("ATTEMPTED_INTENTION_LOCK_ON_ROW")]
    AttemptedIntentionLockOnRow,
    #[error("TABLE_LOCK_NOT_PRESENT")]
    TableLockNotPresent,
    #[error("ATTEMPTED_UNLOCK_BUT_NO_LOCK_HELD")]
    AttemptedUnlockButNoLockHeld,
    #[error("TABLE_UNLOCKED_BEFORE_UNLOCKING_ROWS")]
    TableUnlockedBeforeUnlockingRows,
    #[error("INCOMPATIBLE_UPGRADE")]
    IncompatibleUpgrade,
    #[error("UPGRADE_CONFLICT")]
    UpgradeConflict,
    #[error("DEADLOCK")]
    Deadlock,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {0} aborted: {1}")]
    Abort(TxnId, AbortReason),

    #[error("transaction {0} is already committed or aborted")]
    InvalidState(TxnId),
}

struct LockRequest {
    txn: Arc<Transaction>,
    mode: LockMode,
    oid: TableOid,
    rid: Option<Rid>,
    granted: bool,
}

#[derive(Default)]
struct QueueInner {
    requests: VecDeque<LockRequest>,
    /// At most one upgrade may be in flight per resource
    upgrading: Option<TxnId>,
}

/// Per-resource FIFO request queue
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            cv: Condvar::new(),
        }
    }
}

/// Two-phase multi-granularity lock manager with FIFO grant order and
/// background deadlock detection.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    waits_for: Mutex<WaitsForGraph>,
    enable_cycle_detection: Arc<AtomicBool>,
    cycle_detection_interval: Duration,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub const DEFAULT_CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(cycle_detection_interval: Duration) -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(WaitsForGraph::new()),
            enable_cycle_detection: Arc::new(AtomicBool::new(false)),
            cycle_detection_interval,
            detector: Mutex::new(None),
        }
    }

    /// Acquire a table lock, blocking until it is granted or the
    /// transaction is aborted.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<(), TransactionError> {
        self.check_live(txn)?;
        self.validate_request(txn, mode)?;

        let queue = self.table_queue(oid);
        self.enqueue_and_wait(txn, &queue, mode, oid, None)
    }

    /// Acquire a row lock. The transaction must already hold an appropriate
    /// table lock.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        self.check_live(txn)?;

        if !mode.allowed_on_row() {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        // The table-level lock must already be there; this check runs
        // before the isolation rules
        let table_modes: &[LockMode] = if mode == LockMode::Exclusive {
            &[
                LockMode::Exclusive,
                LockMode::IntentionExclusive,
                LockMode::SharedIntentionExclusive,
            ]
        } else {
            &LockMode::ALL
        };
        if !txn.holds_table_lock(oid, table_modes) {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        self.validate_request(txn, mode)?;

        let queue = self.row_queue(rid);
        self.enqueue_and_wait(txn, &queue, mode, oid, Some(rid))
    }

    /// Release a table lock. Fails when no lock is held or rows of the
    /// table are still locked. Unlocking S or X moves the transaction into
    /// its shrinking phase, depending on the isolation level.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> Result<(), TransactionError> {
        let queue = {
            let map = self.table_lock_map.lock();
            map.get(&oid).cloned()
        };
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mut inner = queue.inner.lock();
        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted)
        else {
            drop(inner);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = inner.requests[pos].mode;
        Self::apply_unlock_transition(txn, mode);
        let _ = inner.requests.remove(pos);
        txn.remove_table_lock(mode, oid);
        queue.cv.notify_all();
        Ok(())
    }

    /// Release a row lock, with the same phase transition rules as
    /// [`Self::unlock_table`]
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), TransactionError> {
        let queue = {
            let map = self.row_lock_map.lock();
            map.get(&rid).cloned()
        };
        let Some(queue) = queue else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mut inner = queue.inner.lock();
        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted && r.rid == Some(rid))
        else {
            drop(inner);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = inner.requests[pos].mode;
        Self::apply_unlock_transition(txn, mode);
        let _ = inner.requests.remove(pos);
        txn.remove_row_lock(mode, oid, rid);
        queue.cv.notify_all();
        Ok(())
    }

    /// Release everything a transaction still holds, rows before tables,
    /// without phase transitions. The transaction manager calls this on
    /// commit and abort.
    pub fn unlock_all(&self, txn: &Arc<Transaction>) {
        let (row_locks, table_locks) = {
            let sets = txn.lock_sets();
            let mut rows: Vec<(TableOid, Rid, LockMode)> = Vec::new();
            for (&oid, rids) in &sets.shared_rows {
                rows.extend(rids.iter().map(|&rid| (oid, rid, LockMode::Shared)));
            }
            for (&oid, rids) in &sets.exclusive_rows {
                rows.extend(rids.iter().map(|&rid| (oid, rid, LockMode::Exclusive)));
            }
            let mut tables: Vec<(TableOid, LockMode)> = Vec::new();
            tables.extend(sets.shared_tables.iter().map(|&o| (o, LockMode::Shared)));
            tables.extend(sets.exclusive_tables.iter().map(|&o| (o, LockMode::Exclusive)));
            tables.extend(
                sets.intention_shared_tables
                    .iter()
                    .map(|&o| (o, LockMode::IntentionShared)),
            );
            tables.extend(
                sets.intention_exclusive_tables
                    .iter()
                    .map(|&o| (o, LockMode::IntentionExclusive)),
            );
            tables.extend(
                sets.shared_intention_exclusive_tables
                    .iter()
                    .map(|&o| (o, LockMode::SharedIntentionExclusive)),
            );
            (rows, tables)
        };

        for (oid, rid, mode) in row_locks {
            let queue = {
                let map = self.row_lock_map.lock();
                map.get(&rid).cloned()
            };
            if let Some(queue) = queue {
                Self::withdraw(&queue, txn.id());
            }
            txn.remove_row_lock(mode, oid, rid);
        }
        for (oid, mode) in table_locks {
            let queue = {
                let map = self.table_lock_map.lock();
                map.get(&oid).cloned()
            };
            if let Some(queue) = queue {
                Self::withdraw(&queue, txn.id());
            }
            txn.remove_table_lock(mode, oid);
        }
    }

    /// Drop every request a transaction has on a queue and wake the waiters
    fn withdraw(queue: &LockRequestQueue, txn_id: TxnId) {
        let mut inner = queue.inner.lock();
        inner.requests.retain(|r| r.txn.id() != txn_id);
        if inner.upgrading == Some(txn_id) {
            inner.upgrading = None;
        }
        queue.cv.notify_all();
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        map.entry(oid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        map.entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn check_live(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Committed | TransactionState::Aborted => {
                Err(TransactionError::InvalidState(txn.id()))
            }
            _ => Ok(()),
        }
    }

    /// Isolation-level admission rules; violations abort the transaction
    fn validate_request(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionError> {
        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if !matches!(mode, LockMode::IntentionExclusive | LockMode::Exclusive) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        TransactionError::Abort(txn.id(), reason)
    }

    /// Queue the request (or turn it into an upgrade) and wait until the
    /// FIFO grant rule lets it through or the transaction is aborted.
    fn enqueue_and_wait(
        &self,
        txn: &Arc<Transaction>,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
    ) -> Result<(), TransactionError> {
        let mut inner = queue.inner.lock();

        let held = inner
            .requests
            .iter()
            .position(|r| r.txn.id() == txn.id() && r.granted);
        if let Some(pos) = held {
            // Re-requesting the held mode is a no-op; anything else is an
            // upgrade
            let held_mode = inner.requests[pos].mode;
            if held_mode == mode {
                return Ok(());
            }
            if inner.upgrading.is_some() {
                drop(inner);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !held_mode.upgradable_to(mode) {
                drop(inner);
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }

            // The old lock is given up and the upgrade request jumps to the
            // front of the wait region
            let _ = inner.requests.remove(pos);
            match rid {
                Some(rid) => txn.remove_row_lock(held_mode, oid, rid),
                None => txn.remove_table_lock(held_mode, oid),
            }
            let wait_front = inner
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(inner.requests.len());
            inner.requests.insert(
                wait_front,
                LockRequest {
                    txn: txn.clone(),
                    mode,
                    oid,
                    rid,
                    granted: false,
                },
            );
            inner.upgrading = Some(txn.id());
        } else {
            inner.requests.push_back(LockRequest {
                txn: txn.clone(),
                mode,
                oid,
                rid,
                granted: false,
            });
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                // Deadlock victim (or externally aborted): withdraw and
                // let the queue move on
                if let Some(pos) = inner
                    .requests
                    .iter()
                    .position(|r| r.txn.id() == txn.id() && !r.granted)
                {
                    let _ = inner.requests.remove(pos);
                }
                if inner.upgrading == Some(txn.id()) {
                    inner.upgrading = None;
                }
                queue.cv.notify_all();
                return Err(TransactionError::Abort(txn.id(), AbortReason::Deadlock));
            }

            if Self::can_grant(&inner, txn.id()) {
                let pos = inner
                    .requests
                    .iter()
                    .position(|r| r.txn.id() == txn.id() && !r.granted)
                    .expect("request disappeared while waiting");
                inner.requests[pos].granted = true;
                if inner.upgrading == Some(txn.id()) {
                    inner.upgrading = None;
                }
                match rid {
                    Some(rid) => txn.add_row_lock(mode, oid, rid),
                    None => txn.add_table_lock(mode, oid),
                }
                debug!(
                    "txn {} granted {:?} on table {} rid {:?}",
                    txn.id(),
                    mode,
                    oid,
                    rid
                );
                // Requests behind this one may be compatible too
                queue.cv.notify_all();
                return Ok(());
            }

            queue.cv.wait(&mut inner);
        }
    }

    /// Strict-FIFO grant rule: walk the pending requests in order,
    /// shrinking the compatible-mode set past each one that could be
    /// granted, and stop at the first that could not.
    fn can_grant(inner: &QueueInner, txn_id: TxnId) -> bool {
        let mut compatible: Vec<LockMode> = LockMode::ALL.to_vec();
        for request in inner.requests.iter().filter(|r| r.granted) {
            compatible.retain(|mode| mode.compatible_with(request.mode));
        }

        for request in inner.requests.iter().filter(|r| !r.granted) {
            if compatible.contains(&request.mode) {
                if request.txn.id() == txn_id {
                    return true;
                }
                // Treat the earlier waiter as granted to preserve FIFO
                compatible.retain(|mode| mode.compatible_with(request.mode));
            } else {
                return false;
            }
        }
        false
    }

    fn apply_unlock_transition(txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    // ---- wait-for graph API ----

    pub fn add_edge(&self, from: TxnId, to: TxnId) {
        self.waits_for.lock().add_edge(from, to);
    }

    pub fn remove_edge(&self, from: TxnId, to: TxnId) {
        self.waits_for.lock().remove_edge(from, to);
    }

    pub fn has_cycle(&self) -> Option<TxnId> {
        self.waits_for.lock().has_cycle()
    }

    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        self.waits_for.lock().edge_list()
    }

    // ---- deadlock detection ----

    /// Spawn the background cycle-detection task. It sleeps for the
    /// configured interval, rebuilds the wait-for graph, and aborts the
    /// newest transaction of every cycle it finds. The task shuts down
    /// cooperatively when the manager is dropped.
    pub fn start_cycle_detection(self: &Arc<Self>) {
        let flag = self.enable_cycle_detection.clone();
        if flag.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.cycle_detection_interval;

        let handle = std::thread::Builder::new()
            .name("cycle-detection".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    std::thread::sleep(interval);
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    manager.run_detection_pass();
                }
            })
            .expect("failed to spawn the cycle-detection thread");
        *self.detector.lock() = Some(handle);
    }

    /// One detector pass: rebuild the graph from the queues, then abort and
    /// prune cycle victims until no cycle remains.
    fn run_detection_pass(&self) {
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();
        let queues: Vec<Arc<LockRequestQueue>> = table_map
            .values()
            .chain(row_map.values())
            .cloned()
            .collect();

        let mut waiters: HashMap<TxnId, Arc<Transaction>> = HashMap::new();
        {
            let mut graph = self.waits_for.lock();
            graph.clear();
            for queue in &queues {
                let inner = queue.inner.lock();
                let holders: Vec<TxnId> = inner
                    .requests
                    .iter()
                    .filter(|r| r.granted)
                    .map(|r| r.txn.id())
                    .collect();
                for request in inner.requests.iter().filter(|r| !r.granted) {
                    waiters.insert(request.txn.id(), request.txn.clone());
                    for &holder in &holders {
                        graph.add_edge(request.txn.id(), holder);
                    }
                }
            }
        }

        let mut aborted_any = false;
        loop {
            let victim = self.waits_for.lock().has_cycle();
            let Some(victim) = victim else {
                break;
            };
            info!("deadlock detected; aborting transaction {}", victim);
            if let Some(txn) = waiters.get(&victim) {
                txn.set_state(TransactionState::Aborted);
            }
            self.waits_for.lock().remove_txn(victim);
            aborted_any = true;
        }

        if aborted_any {
            for queue in &queues {
                queue.cv.notify_all();
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CYCLE_DETECTION_INTERVAL)
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.get_mut().take() {
            // The detector may hold the last Arc and run this drop itself
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
