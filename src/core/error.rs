use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint '{constraint}' violated: {detail}")]
    ConstraintViolation { constraint: String, detail: String },

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Transaction {0} is no longer active")]
    TransactionClosed(String),
}

impl DbError {
    pub fn constraint(constraint: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            constraint: constraint.into(),
            detail: detail.into(),
        }
    }

    /// Name of the violated constraint, if this is a constraint error.
    pub fn constraint_name(&self) -> Option<&str> {
        match self {
            Self::ConstraintViolation { constraint, .. } => Some(constraint),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
