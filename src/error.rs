use crate::core::DbError;
use crate::engine::UpdateTally;
use std::fmt;
use thiserror::Error;

/// Closed set of failure kinds surfaced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Identity does not resolve, or belongs to another principal.
    NotFound,
    /// The request is structurally invalid; nothing was written.
    ValidationFailed,
    /// One row statement failed; the whole update was rolled back.
    RowUpdateFailed,
    /// Every row succeeded but the commit was rejected; rolled back.
    CommitFailed,
    /// The caller's cancellation or deadline fired first.
    Cancelled,
    /// Credentials did not match.
    Unauthorized,
    /// Any other storage failure outside the update engine.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::ValidationFailed => "validation_failed",
            Self::RowUpdateFailed => "row_update_failed",
            Self::CommitFailed => "commit_failed",
            Self::Cancelled => "cancelled",
            Self::Unauthorized => "unauthorized",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {context}")]
pub struct Error {
    kind: ErrorKind,
    context: String,
    #[source]
    source: Option<DbError>,
    tally: Option<UpdateTally>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
            source: None,
            tally: None,
        }
    }

    pub fn with_source(kind: ErrorKind, context: impl Into<String>, source: DbError) -> Self {
        Self {
            kind,
            context: context.into(),
            source: Some(source),
            tally: None,
        }
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, context)
    }

    pub fn validation(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, context)
    }

    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, context)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Underlying storage error, if any.
    pub fn db_error(&self) -> Option<&DbError> {
        self.source.as_ref()
    }

    /// Attaches the task counts of the aggregate update that failed.
    pub fn with_tally(mut self, tally: UpdateTally) -> Self {
        self.tally = Some(tally);
        self
    }

    /// How far a failed aggregate update got before it was rolled back.
    /// `None` for errors raised outside the coordinator.
    pub fn tally(&self) -> Option<UpdateTally> {
        self.tally
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Self::with_source(ErrorKind::Storage, "storage failure", err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
