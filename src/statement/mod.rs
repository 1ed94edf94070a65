// ============================================================================
// Typed parameterized statements
// ============================================================================
//
// Statements are built as values rather than parsed from text. Their
// `Display` output is the equivalent parameterized SQL, which is what shows
// up in debug logs.
//
// ============================================================================

use crate::core::Value;
use crate::merge::Assignment;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Gt(String, Value),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Self::Eq(column, _) | Self::Gt(column, _) => column,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Eq(_, value) | Self::Gt(_, value) => value,
        }
    }

    pub fn matches(&self, candidate: &Value) -> bool {
        match self {
            Self::Eq(_, expected) => !candidate.is_null() && candidate == expected,
            Self::Gt(_, bound) => candidate.greater_than(bound),
        }
    }
}

/// Conjunction of conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.into(), value.into()));
        self
    }

    pub fn gt(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Gt(column.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn write_sql(&self, f: &mut fmt::Formatter<'_>, first_param: usize) -> fmt::Result {
        if self.conditions.is_empty() {
            return Ok(());
        }
        write!(f, " WHERE ")?;
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            let op = match condition {
                Condition::Eq(..) => "=",
                Condition::Gt(..) => ">",
            };
            write!(f, "{} {} ${}", condition.column(), op, first_param + i)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub values: Vec<(String, Value)>,
}

impl InsertStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), value.into()));
        self
    }
}

/// `UPDATE table SET col = COALESCE($n, col), ... WHERE filter`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub filter: Filter,
}

impl UpdateStatement {
    pub fn new(table: impl Into<String>, assignments: Vec<Assignment>, filter: Filter) -> Self {
        Self {
            table: table.into(),
            assignments,
            filter,
        }
    }

    /// Bound parameters in placeholder order; absent values bind as NULL.
    pub fn params(&self) -> Vec<Value> {
        self.assignments
            .iter()
            .map(|a| a.value.clone().unwrap_or(Value::Null))
            .chain(self.filter.conditions().iter().map(|c| c.value().clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub filter: Filter,
}

impl DeleteStatement {
    pub fn new(table: impl Into<String>, filter: Filter) -> Self {
        Self {
            table: table.into(),
            filter,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table: String,
    pub filter: Filter,
    pub limit: Option<usize>,
}

impl SelectStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl From<InsertStatement> for Statement {
    fn from(stmt: InsertStatement) -> Self {
        Self::Insert(stmt)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(stmt: UpdateStatement) -> Self {
        Self::Update(stmt)
    }
}

impl From<DeleteStatement> for Statement {
    fn from(stmt: DeleteStatement) -> Self {
        Self::Delete(stmt)
    }
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<&str> = self.values.iter().map(|(c, _)| c.as_str()).collect();
        let params: Vec<String> = (1..=self.values.len()).map(|i| format!("${}", i)).collect();
        write!(
            f,
            "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
            self.table,
            columns.join(", "),
            params.join(", ")
        )
    }
}

impl fmt::Display for UpdateStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {} SET ", self.table)?;
        for (i, assignment) in self.assignments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{col} = COALESCE(${n}, {col})",
                col = assignment.column,
                n = i + 1
            )?;
        }
        self.filter.write_sql(f, self.assignments.len() + 1)
    }
}

impl fmt::Display for DeleteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", self.table)?;
        self.filter.write_sql(f, 1)
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.table)?;
        self.filter.write_sql(f, 1)?;
        write!(f, " ORDER BY id")?;
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert(stmt) => stmt.fmt(f),
            Self::Update(stmt) => stmt.fmt(f),
            Self::Delete(stmt) => stmt.fmt(f),
        }
    }
}
