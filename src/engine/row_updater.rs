use crate::error::{Error, ErrorKind, Result};
use crate::merge::PartialPatch;
use crate::model::{FieldPatch, ProjectPatch};
use crate::schema::{field, project};
use crate::statement::{Filter, Statement, UpdateStatement};
use crate::transaction::Transaction;
use std::fmt;
use tracing::{Level, event};

/// Identity of the single row one update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    Project(i64),
    Field(i64),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project(id) => write!(f, "project {}", id),
            Self::Field(id) => write!(f, "field {}", id),
        }
    }
}

/// A parameterized coalesce update for exactly one row.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedUpdate {
    key: RowKey,
    statement: Statement,
}

impl PreparedUpdate {
    /// Parent row, filtered by identity and by owner so another principal's
    /// row can never match.
    pub fn parent(project_id: i64, owner_id: i64, patch: &ProjectPatch) -> Self {
        let filter = Filter::new()
            .eq(project::ID, project_id)
            .eq(project::USER_ID, owner_id);
        Self {
            key: RowKey::Project(project_id),
            statement: UpdateStatement::new(project::TABLE, patch.assignments(), filter).into(),
        }
    }

    /// Child row, filtered by identity and by its parent.
    pub fn child(project_id: i64, patch: &FieldPatch) -> Self {
        let filter = Filter::new()
            .eq(field::ID, patch.id)
            .eq(field::PROJECT_ID, project_id);
        Self {
            key: RowKey::Field(patch.id),
            statement: UpdateStatement::new(field::TABLE, patch.assignments(), filter).into(),
        }
    }

    pub fn key(&self) -> RowKey {
        self.key
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }
}

/// Executes one prepared update inside `tx`.
///
/// Never commits or rolls back. A driver failure and a zero-row match are both
/// `RowUpdateFailed`; only the former carries a `DbError` source.
pub fn update_row(tx: &mut Transaction, update: &PreparedUpdate) -> Result<u64> {
    match tx.execute(&update.statement) {
        Ok(result) if result.rows_affected == 0 => {
            event!(Level::WARN, row = %update.key, "no row matched");
            Err(Error::new(
                ErrorKind::RowUpdateFailed,
                format!("{} not found", update.key),
            ))
        }
        Ok(result) => Ok(result.rows_affected),
        Err(err) => {
            event!(Level::WARN, row = %update.key, error = %err, "row update failed");
            Err(Error::with_source(
                ErrorKind::RowUpdateFailed,
                format!("{} rejected", update.key),
                err,
            ))
        }
    }
}
