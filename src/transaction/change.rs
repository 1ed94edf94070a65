// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Undo log entries. Writes are applied to storage immediately; each one
// records what it replaced so rollback can restore it in reverse order.
//
// ============================================================================

use crate::core::Row;

#[derive(Debug, Clone)]
pub enum Change {
    /// A row was inserted; undo removes it.
    InsertRow { table: String, id: i64 },

    /// A row was overwritten; undo restores `old_row`.
    UpdateRow { table: String, id: i64, old_row: Row },

    /// A row was deleted; undo restores `old_row`.
    DeleteRow { table: String, id: i64, old_row: Row },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn row_id(&self) -> i64 {
        match self {
            Change::InsertRow { id, .. }
            | Change::UpdateRow { id, .. }
            | Change::DeleteRow { id, .. } => *id,
        }
    }
}
