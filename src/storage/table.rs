use crate::core::{Column, DataType, DbError, Result, Row, Schema, Value};
use crate::merge::{Assignment, ResolvedAssignment};
use crate::statement::Filter;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const PRIMARY_KEY: &str = "id";

/// Row predicate evaluated after every write. NULL operands pass, as in SQL.
#[derive(Debug, Clone)]
pub enum CheckExpr {
    /// `column >= min`
    AtLeast { column: String, min: Value },
    /// `lower <= upper`
    Ordered { lower: String, upper: String },
    /// `column IN (allowed...)`
    OneOf { column: String, allowed: Vec<Value> },
}

#[derive(Debug, Clone)]
pub struct CheckConstraint {
    pub name: String,
    pub expr: CheckExpr,
}

impl CheckConstraint {
    pub fn new(name: impl Into<String>, expr: CheckExpr) -> Self {
        Self {
            name: name.into(),
            expr,
        }
    }

    fn holds(&self, schema: &Schema, row: &Row) -> bool {
        let value = |column: &str| {
            schema
                .find_column_index(column)
                .and_then(|idx| row.get(idx))
                .unwrap_or(&Value::Null)
        };
        match &self.expr {
            CheckExpr::AtLeast { column, min } => {
                let v = value(column);
                v.is_null() || v == min || v.greater_than(min)
            }
            CheckExpr::Ordered { lower, upper } => {
                let (lo, hi) = (value(lower), value(upper));
                lo.is_null() || hi.is_null() || !lo.greater_than(hi)
            }
            CheckExpr::OneOf { column, allowed } => {
                let v = value(column);
                v.is_null() || allowed.contains(v)
            }
        }
    }
}

/// Column set whose non-NULL combinations must be unique.
///
/// A deferred constraint is only checked when the owning transaction
/// commits, so rows may pass through conflicting states mid-transaction.
#[derive(Debug, Clone)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
    pub deferred: bool,
}

impl UniqueConstraint {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            deferred: false,
        }
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub column: String,
    pub references: String,
    pub on_delete_cascade: bool,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: Schema,
    pub checks: Vec<CheckConstraint>,
    pub uniques: Vec<UniqueConstraint>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Column 0 is always the generated `id` primary key.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let mut all = Vec::with_capacity(columns.len() + 1);
        all.push(Column::new(PRIMARY_KEY, DataType::Integer).not_null());
        all.extend(columns);
        Self {
            name: name.into(),
            schema: Schema::new(all),
            checks: Vec::new(),
            uniques: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn check(mut self, constraint: CheckConstraint) -> Self {
        self.checks.push(constraint);
        self
    }

    pub fn unique(mut self, constraint: UniqueConstraint) -> Self {
        self.uniques.push(constraint);
        self
    }

    pub fn references(mut self, column: &str, table: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references: table.to_string(),
            on_delete_cascade: true,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.schema
            .find_column_index(column)
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), self.name.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<i64, Row>,
    next_id: i64,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, id: i64) -> Option<&Row> {
        self.rows.get(&id)
    }

    /// Builds, validates and stores a new row. Ids come from a sequence that
    /// never rolls back.
    pub fn insert(&mut self, values: &[(String, Value)]) -> Result<(i64, Row)> {
        let mut row = vec![Value::Null; self.schema.schema().column_count()];
        for (column, value) in values {
            let idx = self.schema.column_index(column)?;
            if idx == 0 {
                return Err(DbError::ExecutionError(format!(
                    "Column '{}' of '{}' is generated",
                    PRIMARY_KEY,
                    self.name()
                )));
            }
            row[idx] = value.clone();
        }

        let id = self.next_id;
        self.next_id += 1;
        row[0] = Value::Integer(id);

        self.validate_row(&row)?;
        self.check_unique(&row, None, false)?;
        self.rows.insert(id, row.clone());
        Ok((id, row))
    }

    /// Validates `row` and stores it in place of `id`, returning the old row.
    pub fn replace(&mut self, id: i64, row: Row) -> Result<Row> {
        self.validate_row(&row)?;
        self.check_unique(&row, Some(id), false)?;
        let slot = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| {
                DbError::ExecutionError(format!("Row {} vanished from '{}'", id, self.schema.name))
            })?;
        Ok(std::mem::replace(slot, row))
    }

    pub fn remove(&mut self, id: i64) -> Option<Row> {
        self.rows.remove(&id)
    }

    /// Puts a row back exactly as it was. Used by rollback only.
    pub(crate) fn restore(&mut self, id: i64, row: Row) {
        self.rows.insert(id, row);
    }

    pub fn resolve_assignments(
        &self,
        assignments: &[Assignment],
    ) -> Result<Vec<ResolvedAssignment>> {
        assignments
            .iter()
            .map(|a| {
                let index = self.schema.column_index(&a.column)?;
                if index == 0 {
                    return Err(DbError::ExecutionError(format!(
                        "Primary key of '{}' is immutable",
                        self.name()
                    )));
                }
                Ok(ResolvedAssignment {
                    index,
                    value: a.value.clone(),
                })
            })
            .collect()
    }

    pub fn matching_ids(&self, filter: &Filter) -> Result<Vec<i64>> {
        let resolved = filter
            .conditions()
            .iter()
            .map(|c| Ok((self.schema.column_index(c.column())?, c)))
            .collect::<Result<Vec<_>>>()?;

        // Fast path for primary key lookups.
        let pk_lookup = resolved
            .iter()
            .find(|(idx, c)| *idx == 0 && matches!(c, crate::statement::Condition::Eq(..)));
        if let Some((_, condition)) = pk_lookup {
            let Some(id) = condition.value().as_i64() else {
                return Ok(Vec::new());
            };
            return Ok(self
                .rows
                .get(&id)
                .filter(|row| resolved.iter().all(|(idx, c)| c.matches(&row[*idx])))
                .map(|_| vec![id])
                .unwrap_or_default());
        }

        Ok(self
            .rows
            .iter()
            .filter(|(_, row)| resolved.iter().all(|(idx, c)| c.matches(&row[*idx])))
            .map(|(id, _)| *id)
            .collect())
    }

    pub fn scan(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<Row>> {
        let ids = self.matching_ids(filter)?;
        Ok(ids
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|id| self.rows.get(&id).cloned())
            .collect())
    }

    /// Ids of rows whose `column` equals `value`.
    pub fn ids_referencing(&self, column: &str, value: i64) -> Result<Vec<i64>> {
        self.matching_ids(&Filter::new().eq(column, value))
    }

    /// Re-checks deferred unique constraints for the rows in `touched`.
    ///
    /// Each constraint costs one pass over the table, and a table with no
    /// live touched rows is not scanned at all. Ids that no longer exist
    /// (deleted later in the same transaction) are ignored.
    pub fn check_deferred(&self, touched: &BTreeSet<i64>) -> Result<()> {
        let live: Vec<(i64, &Row)> = touched
            .iter()
            .filter_map(|id| self.rows.get(id).map(|row| (*id, row)))
            .collect();
        if live.is_empty() {
            return Ok(());
        }

        for constraint in self.schema.uniques.iter().filter(|u| u.deferred) {
            let indexes = self.unique_indexes(constraint)?;
            let mut wanted: HashMap<String, i64> = HashMap::with_capacity(live.len());
            for (id, row) in &live {
                if let Some(key) = key_token(row, &indexes) {
                    wanted.entry(key).or_insert(*id);
                }
            }
            if wanted.is_empty() {
                continue;
            }

            for (id, row) in &self.rows {
                let Some(key) = key_token(row, &indexes) else {
                    continue;
                };
                let Some(owner) = wanted.get(&key) else {
                    continue;
                };
                let same_key = self
                    .rows
                    .get(owner)
                    .is_some_and(|first| indexes.iter().all(|idx| first[*idx] == row[*idx]));
                if *owner != *id && same_key {
                    return Err(duplicate_key(constraint, row, &indexes));
                }
            }
        }
        Ok(())
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        for check in &self.schema.checks {
            if !check.holds(self.schema.schema(), row) {
                return Err(DbError::constraint(
                    check.name.clone(),
                    format!("row violates check on '{}'", self.schema.name),
                ));
            }
        }
        Ok(())
    }

    fn check_unique(&self, row: &Row, ignore_id: Option<i64>, deferred: bool) -> Result<()> {
        for constraint in self.schema.uniques.iter().filter(|u| u.deferred == deferred) {
            let indexes = self.unique_indexes(constraint)?;
            if indexes.iter().any(|idx| row[*idx].is_null()) {
                continue;
            }

            let conflict = self.rows.iter().any(|(id, other)| {
                Some(*id) != ignore_id && indexes.iter().all(|idx| other[*idx] == row[*idx])
            });
            if conflict {
                return Err(duplicate_key(constraint, row, &indexes));
            }
        }
        Ok(())
    }

    fn unique_indexes(&self, constraint: &UniqueConstraint) -> Result<Vec<usize>> {
        constraint
            .columns
            .iter()
            .map(|c| self.schema.column_index(c))
            .collect()
    }
}

/// Hashable rendering of a unique key, or `None` if any part is NULL.
/// Whole floats render like integers so `1` and `1.0` collide, matching
/// `Value` equality.
fn key_token(row: &Row, indexes: &[usize]) -> Option<String> {
    let mut token = String::new();
    for idx in indexes {
        match &row[*idx] {
            Value::Null => return None,
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                token.push_str(&(*f as i64).to_string())
            }
            other => token.push_str(&other.to_string()),
        }
        token.push('\u{1f}');
    }
    Some(token)
}

fn duplicate_key(constraint: &UniqueConstraint, row: &Row, indexes: &[usize]) -> DbError {
    let rendered: Vec<String> = indexes.iter().map(|idx| row[*idx].to_string()).collect();
    DbError::constraint(
        constraint.name.clone(),
        format!(
            "duplicate key ({}) = ({})",
            constraint.columns.join(", "),
            rendered.join(", ")
        ),
    )
}
