// ============================================================================
// Transaction State Management
// ============================================================================
//
// A transaction owns the storage write lock from `begin` until it reaches a
// terminal state. Statements are applied in place and journaled; rollback
// replays the journal backwards.
//
// State transitions:
//   Active ──commit──> Committed
//     │
//     └──rollback / failed commit / drop──> Aborted
//
// ============================================================================

use super::Change;
use crate::core::{DbError, Result};
use crate::result::QueryResult;
use crate::statement::{SelectStatement, Statement};
use crate::storage::{ExecResult, InMemoryStorage};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{Level, event};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A single-handle database transaction.
///
/// Not safe for concurrent statement issuance: `execute` takes `&mut self`,
/// so callers sharing one transaction must serialize access themselves.
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    storage: Option<OwnedRwLockWriteGuard<InMemoryStorage>>,
    changes: Vec<Change>,
    statements: usize,
    start_time: Instant,
}

impl Transaction {
    pub(crate) fn new(storage: OwnedRwLockWriteGuard<InMemoryStorage>) -> Self {
        let id = TransactionId::new();
        event!(Level::DEBUG, txn = %id, "transaction begin");
        Self {
            id,
            state: TransactionState::Active,
            storage: Some(storage),
            changes: Vec::new(),
            statements: 0,
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn statement_count(&self) -> usize {
        self.statements
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Executes one statement. A failing statement leaves no trace; the
    /// transaction stays active and the caller decides whether to roll back.
    pub fn execute(&mut self, stmt: &Statement) -> Result<ExecResult> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(self.id.to_string()));
        }
        let Some(storage) = self.storage.as_mut() else {
            return Err(DbError::TransactionClosed(self.id.to_string()));
        };

        self.statements += 1;
        event!(Level::DEBUG, txn = %self.id, statement = %stmt, "execute");
        let mark = self.changes.len();
        match storage.execute(stmt, &mut self.changes) {
            Ok(result) => Ok(result),
            Err(err) => {
                undo_until(storage, &mut self.changes, mark);
                Err(err)
            }
        }
    }

    /// Reads through the transaction, seeing its own uncommitted writes.
    pub fn query(&self, stmt: &SelectStatement) -> Result<QueryResult> {
        match (&self.storage, self.state) {
            (Some(storage), TransactionState::Active) => storage.select(stmt),
            _ => Err(DbError::TransactionClosed(self.id.to_string())),
        }
    }

    /// Commits after checking deferred constraints. On failure the
    /// transaction is rolled back before the error is returned.
    pub fn commit(mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(self.id.to_string()));
        }
        let deferred = match self.storage.as_ref() {
            Some(storage) => storage.check_deferred(&touched_rows(&self.changes)),
            None => Err(DbError::TransactionClosed(self.id.to_string())),
        };
        if let Err(err) = deferred {
            event!(Level::WARN, txn = %self.id, error = %err, "commit rejected, rolling back");
            self.abort();
            return Err(err);
        }

        self.changes.clear();
        self.state = TransactionState::Committed;
        self.storage = None;
        event!(Level::DEBUG, txn = %self.id, statements = self.statements, "transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionClosed(self.id.to_string()));
        }
        self.abort();
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(storage) = self.storage.as_mut() {
            undo_until(storage, &mut self.changes, 0);
        }
        self.state = TransactionState::Aborted;
        self.storage = None;
        event!(Level::DEBUG, txn = %self.id, "transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .finish()
    }
}

/// Rows this transaction inserted or rewrote, by table. Deletes cannot
/// introduce a duplicate, so they are left out.
fn touched_rows(changes: &[Change]) -> BTreeMap<String, BTreeSet<i64>> {
    let mut touched: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    for change in changes {
        if matches!(change, Change::DeleteRow { .. }) {
            continue;
        }
        touched
            .entry(change.table_name().to_string())
            .or_default()
            .insert(change.row_id());
    }
    touched
}

fn undo_until(storage: &mut InMemoryStorage, changes: &mut Vec<Change>, mark: usize) {
    while changes.len() > mark {
        let Some(change) = changes.pop() else {
            break;
        };
        if let Err(err) = storage.undo(change) {
            event!(Level::ERROR, error = %err, "undo failed");
        }
    }
}
