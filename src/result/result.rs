use crate::core::{DbError, Result, Row, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Arc<Vec<String>>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Arc::new(Vec::new()),
            rows: Vec::new(),
        }
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(|row| Record {
            columns: &self.columns,
            row,
        })
    }

    pub fn first(&self) -> Option<Record<'_>> {
        self.records().next()
    }
}

/// A row viewed through its column names.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    row: &'a Row,
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Result<&'a Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.row.get(idx))
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), "<result>".to_string()))
    }

    pub fn i64(&self, column: &str) -> Result<i64> {
        let value = self.get(column)?;
        value.as_i64().ok_or_else(|| mismatch(column, "INTEGER", value))
    }

    pub fn f64(&self, column: &str) -> Result<f64> {
        let value = self.get(column)?;
        value.as_f64().ok_or_else(|| mismatch(column, "NUMERIC", value))
    }

    pub fn bool(&self, column: &str) -> Result<bool> {
        let value = self.get(column)?;
        value.as_bool().ok_or_else(|| mismatch(column, "BOOLEAN", value))
    }

    pub fn text(&self, column: &str) -> Result<String> {
        let value = self.get(column)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(column, "TEXT", value))
    }

    pub fn opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.get(column)? {
            Value::Null => Ok(None),
            _ => self.text(column).map(Some),
        }
    }

    pub fn timestamp(&self, column: &str) -> Result<chrono::DateTime<chrono::Utc>> {
        let value = self.get(column)?;
        value
            .as_timestamp()
            .ok_or_else(|| mismatch(column, "TIMESTAMPTZ", value))
    }

    pub fn opt_timestamp(&self, column: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        match self.get(column)? {
            Value::Null => Ok(None),
            _ => self.timestamp(column).map(Some),
        }
    }
}

fn mismatch(column: &str, expected: &str, got: &Value) -> DbError {
    DbError::TypeMismatch(format!(
        "Column '{}' expected {}, got {}",
        column,
        expected,
        got.type_name()
    ))
}
