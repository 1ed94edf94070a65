use crate::core::Result;
use crate::result::QueryResult;
use crate::schema;
use crate::statement::{Filter, SelectStatement, Statement};
use crate::storage::{ExecResult, InMemoryStorage, TableSchema};
use crate::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to one in-memory database.
///
/// Cloning is cheap; all clones see the same tables. Transactions are
/// serialized: `begin` waits for the exclusive write lock and holds it until
/// the transaction commits, rolls back or is dropped.
#[derive(Clone, Default)]
pub struct Database {
    storage: Arc<RwLock<InMemoryStorage>>,
}

impl Database {
    /// Empty database without any tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Database with the user/project/field layout installed.
    pub async fn open() -> Result<Self> {
        let db = Self::new();
        db.install_schema().await?;
        Ok(db)
    }

    pub async fn install_schema(&self) -> Result<()> {
        let mut storage = self.storage.write().await;
        for table in schema::tables() {
            if !storage.table_exists(table.name()) {
                storage.create_table(table)?;
            }
        }
        Ok(())
    }

    pub async fn create_table(&self, table: TableSchema) -> Result<()> {
        self.storage.write().await.create_table(table)
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.storage.read().await.table_exists(name)
    }

    pub async fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.storage).write_owned().await)
    }

    pub async fn query(&self, stmt: &SelectStatement) -> Result<QueryResult> {
        self.storage.read().await.select(stmt)
    }

    /// Runs a single statement in its own transaction.
    pub async fn execute(&self, stmt: impl Into<Statement>) -> Result<ExecResult> {
        let mut tx = self.begin().await;
        let result = tx.execute(&stmt.into())?;
        tx.commit()?;
        Ok(result)
    }

    pub async fn count(&self, table: &str, filter: &Filter) -> Result<usize> {
        self.storage.read().await.count(table, filter)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, DbError, Value};
    use crate::merge::Assignment;
    use crate::statement::{InsertStatement, UpdateStatement};
    use crate::storage::UniqueConstraint;
    use crate::transaction::TransactionState;

    async fn db() -> Database {
        let db = Database::new();
        db.create_table(
            TableSchema::new(
                "item",
                vec![
                    Column::new("name", DataType::Text).not_null(),
                    Column::new("slot", DataType::Integer),
                ],
            )
            .unique(UniqueConstraint::new("item_slot_key", &["slot"]).deferred()),
        )
        .await
        .unwrap();
        db
    }

    fn insert(name: &str, slot: i64) -> Statement {
        InsertStatement::new("item")
            .value("name", name)
            .value("slot", slot)
            .into()
    }

    fn set_slot(id: i64, slot: i64) -> Statement {
        UpdateStatement::new(
            "item",
            vec![Assignment::new("slot", Some(slot))],
            Filter::new().eq("id", id),
        )
        .into()
    }

    #[tokio::test]
    async fn test_install_schema_is_idempotent() {
        let db = Database::open().await.unwrap();
        db.install_schema().await.unwrap();
        assert!(db.table_exists(schema::project::TABLE).await);
        assert!(db.table_exists(schema::field::TABLE).await);
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let db = db().await;
        let mut tx = db.begin().await;
        tx.execute(&insert("a", 1)).unwrap();
        tx.execute(&insert("b", 2)).unwrap();
        assert_eq!(tx.change_count(), 2);
        tx.commit().unwrap();

        assert_eq!(db.count("item", &Filter::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rollback_restores_everything() {
        let db = db().await;
        db.execute(insert("a", 1)).await.unwrap();

        let mut tx = db.begin().await;
        tx.execute(&insert("b", 2)).unwrap();
        tx.execute(&set_slot(1, 9)).unwrap();
        tx.rollback().unwrap();

        let rows = db.query(&SelectStatement::new("item")).await.unwrap();
        assert_eq!(rows.row_count(), 1);
        assert_eq!(rows.rows[0][2], Value::Integer(1));
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let db = db().await;
        {
            let mut tx = db.begin().await;
            tx.execute(&insert("a", 1)).unwrap();
            assert_eq!(tx.state(), TransactionState::Active);
        }
        assert_eq!(db.count("item", &Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_statement_leaves_transaction_usable() {
        let db = db().await;
        let mut tx = db.begin().await;
        let err = tx.execute(&InsertStatement::new("item").value("slot", 1i64).into());
        assert!(matches!(err, Err(DbError::ConstraintViolation { .. })));
        assert_eq!(tx.change_count(), 0);
        tx.execute(&insert("a", 1)).unwrap();
        tx.commit().unwrap();
        assert_eq!(db.count("item", &Filter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deferred_unique_allows_swap_and_rejects_duplicates_at_commit() {
        let db = db().await;
        db.execute(insert("a", 1)).await.unwrap();
        db.execute(insert("b", 2)).await.unwrap();

        let mut tx = db.begin().await;
        tx.execute(&set_slot(1, 2)).unwrap();
        tx.execute(&set_slot(2, 1)).unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin().await;
        tx.execute(&set_slot(1, 1)).unwrap();
        let err = tx.commit().unwrap_err();
        assert_eq!(err.constraint_name(), Some("item_slot_key"));

        let rows = db
            .query(&SelectStatement::new("item").filter(Filter::new().eq("id", 1i64)))
            .await
            .unwrap();
        assert_eq!(rows.rows[0][2], Value::Integer(2));
    }

    #[tokio::test]
    async fn test_transaction_sees_own_writes() {
        let db = db().await;
        let mut tx = db.begin().await;
        tx.execute(&insert("a", 1)).unwrap();
        let rows = tx.query(&SelectStatement::new("item")).unwrap();
        assert_eq!(rows.row_count(), 1);
    }
}
