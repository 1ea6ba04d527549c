pub mod coordinator;
pub mod transaction;

pub use coordinator::{CommittedSession, Coordinator};
pub use transaction::{Transaction, TransactionState};
