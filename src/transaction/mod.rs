// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Serialized transactions over the in-memory storage: a transaction holds
// the exclusive write lock for its whole lifetime, applies statements in
// place and keeps an undo journal for rollback.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};
