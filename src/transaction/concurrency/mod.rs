pub mod deadlock;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use deadlock::WaitsForGraph;
pub use lock_manager::{AbortReason, LockManager, LockMode, TransactionError};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use transaction_manager::TransactionManager;
