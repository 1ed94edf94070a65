// ============================================================================
// Merge Resolver
// ============================================================================
//
// Coalesce-on-write: every mutable column is assigned `COALESCE($n, column)`.
// A present patch value replaces the stored one, an absent value keeps it.
// The resolver is applied by the storage layer inside the same call that
// writes the row, so there is no separate read step to race against.
//
// ============================================================================

use crate::core::{Row, Value};

/// `column = COALESCE(value, column)`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Option<Value>,
}

impl Assignment {
    pub fn new(column: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        Self {
            column: column.into(),
            value: value.map(Into::into),
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// An assignment whose column name has been resolved against a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAssignment {
    pub index: usize,
    pub value: Option<Value>,
}

/// Computes the effective row for `stored` under `assignments`.
///
/// Pure projection: no I/O, cannot fail. Columns without an assignment, and
/// assignments without a value, keep the stored value.
pub fn merge_row(stored: &Row, assignments: &[ResolvedAssignment]) -> Row {
    let mut effective = stored.clone();
    for assignment in assignments {
        if let Some(value) = &assignment.value
            && let Some(slot) = effective.get_mut(assignment.index)
        {
            *slot = value.clone();
        }
    }
    effective
}

/// A per-request structure where every attribute is optionally present.
pub trait PartialPatch {
    /// One coalesce assignment per mutable column, present or not.
    fn assignments(&self) -> Vec<Assignment>;

    fn is_empty(&self) -> bool {
        self.assignments().iter().all(|a| !a.is_present())
    }
}
