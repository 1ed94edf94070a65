use super::{Table, TableSchema};
use crate::core::{DbError, Result, Value};
use crate::merge::merge_row;
use crate::result::QueryResult;
use crate::statement::{
    DeleteStatement, Filter, InsertStatement, SelectStatement, Statement, UpdateStatement,
};
use crate::transaction::Change;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Outcome of one data-modifying statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub generated_id: Option<i64>,
}

/// All tables of one database. Callers synchronize access; every mutating
/// method appends what it changed to the supplied journal.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: HashMap<String, Table>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(DbError::TableExists(name));
        }
        for fk in &schema.foreign_keys {
            schema.column_index(&fk.column)?;
            if fk.references != name && !self.tables.contains_key(&fk.references) {
                return Err(DbError::TableNotFound(fk.references.clone()));
            }
        }
        self.tables.insert(name, Table::new(schema));
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn execute(&mut self, stmt: &Statement, journal: &mut Vec<Change>) -> Result<ExecResult> {
        match stmt {
            Statement::Insert(insert) => self.insert(insert, journal),
            Statement::Update(update) => self.update(update, journal),
            Statement::Delete(delete) => self.delete(delete, journal),
        }
    }

    pub fn select(&self, stmt: &SelectStatement) -> Result<QueryResult> {
        let table = self.get_table(&stmt.table)?;
        let rows = table.scan(&stmt.filter, stmt.limit)?;
        Ok(QueryResult::new(table.schema().schema().column_names(), rows))
    }

    fn insert(&mut self, stmt: &InsertStatement, journal: &mut Vec<Change>) -> Result<ExecResult> {
        let schema = self.get_table(&stmt.table)?.schema().clone();
        for fk in &schema.foreign_keys {
            if let Some((_, value)) = stmt.values.iter().find(|(c, _)| *c == fk.column) {
                self.check_reference(&fk.references, &fk.column, value)?;
            }
        }

        let (id, _) = self.get_table_mut(&stmt.table)?.insert(&stmt.values)?;
        journal.push(Change::InsertRow {
            table: stmt.table.clone(),
            id,
        });
        Ok(ExecResult {
            rows_affected: 1,
            generated_id: Some(id),
        })
    }

    /// Applies the coalesce merge to every matching row in place.
    fn update(&mut self, stmt: &UpdateStatement, journal: &mut Vec<Change>) -> Result<ExecResult> {
        let table = self.get_table(&stmt.table)?;
        let resolved = table.resolve_assignments(&stmt.assignments)?;
        let ids = table.matching_ids(&stmt.filter)?;
        let foreign_keys = table.schema().foreign_keys.clone();

        let mut affected = 0;
        for id in ids {
            let table = self.get_table(&stmt.table)?;
            let Some(stored) = table.get(id) else {
                continue;
            };
            let effective = merge_row(stored, &resolved);

            for fk in &foreign_keys {
                let idx = table.schema().column_index(&fk.column)?;
                if effective[idx] != stored[idx] {
                    self.check_reference(&fk.references, &fk.column, &effective[idx])?;
                }
            }

            let old_row = self.get_table_mut(&stmt.table)?.replace(id, effective)?;
            journal.push(Change::UpdateRow {
                table: stmt.table.clone(),
                id,
                old_row,
            });
            affected += 1;
        }

        Ok(ExecResult {
            rows_affected: affected,
            generated_id: None,
        })
    }

    fn delete(&mut self, stmt: &DeleteStatement, journal: &mut Vec<Change>) -> Result<ExecResult> {
        let ids = self.get_table(&stmt.table)?.matching_ids(&stmt.filter)?;
        let mut affected = 0;
        for id in ids {
            self.delete_cascading(&stmt.table, id, journal)?;
            affected += 1;
        }
        Ok(ExecResult {
            rows_affected: affected,
            generated_id: None,
        })
    }

    fn delete_cascading(&mut self, table: &str, id: i64, journal: &mut Vec<Change>) -> Result<()> {
        let dependents: Vec<(String, String, bool)> = self
            .tables
            .values()
            .flat_map(|t| {
                t.schema()
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.references == table)
                    .map(|fk| (t.name().to_string(), fk.column.clone(), fk.on_delete_cascade))
            })
            .collect();

        for (child_table, column, cascade) in dependents {
            let child_ids = self.get_table(&child_table)?.ids_referencing(&column, id)?;
            if child_ids.is_empty() {
                continue;
            }
            if !cascade {
                return Err(DbError::constraint(
                    format!("{}_{}_fkey", child_table, column),
                    format!("row {} of '{}' is still referenced from '{}'", id, table, child_table),
                ));
            }
            for child_id in child_ids {
                self.delete_cascading(&child_table, child_id, journal)?;
            }
        }

        if let Some(old_row) = self.get_table_mut(table)?.remove(id) {
            journal.push(Change::DeleteRow {
                table: table.to_string(),
                id,
                old_row,
            });
        }
        Ok(())
    }

    fn check_reference(&self, parent: &str, column: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        let exists = value
            .as_i64()
            .map(|id| self.get_table(parent).map(|t| t.get(id).is_some()))
            .transpose()?
            .unwrap_or(false);
        if !exists {
            return Err(DbError::constraint(
                format!("{}_fkey", column),
                format!("key ({}) = ({}) is not present in '{}'", column, value, parent),
            ));
        }
        Ok(())
    }

    /// Checks deferred constraints for the given rows, keyed by table.
    /// Tables with no entry are not scanned.
    pub fn check_deferred(&self, touched: &BTreeMap<String, BTreeSet<i64>>) -> Result<()> {
        for (table, ids) in touched {
            self.get_table(table)?.check_deferred(ids)?;
        }
        Ok(())
    }

    /// Reverts one journal entry.
    pub(crate) fn undo(&mut self, change: Change) -> Result<()> {
        match change {
            Change::InsertRow { table, id } => {
                self.get_table_mut(&table)?.remove(id);
            }
            Change::UpdateRow { table, id, old_row } | Change::DeleteRow { table, id, old_row } => {
                self.get_table_mut(&table)?.restore(id, old_row);
            }
        }
        Ok(())
    }

    /// Number of rows matching `filter`, for diagnostics and tests.
    pub fn count(&self, table: &str, filter: &Filter) -> Result<usize> {
        Ok(self.get_table(table)?.matching_ids(filter)?.len())
    }
}
