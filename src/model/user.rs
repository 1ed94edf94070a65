use crate::core::DbError;
use crate::result::Record;
use crate::schema::usr as col;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated identity a request acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub email: String,
}

impl Principal {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

/// Stored user account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub(crate) password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal::new(self.id, self.email.clone())
    }
}

impl TryFrom<Record<'_>> for User {
    type Error = DbError;

    fn try_from(record: Record<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.i64(col::ID)?,
            email: record.text(col::EMAIL)?,
            name: record.text(col::NAME)?,
            password_hash: record.text(col::PASSWORD_HASH)?,
            created_at: record.timestamp(col::CREATED_AT)?,
        })
    }
}
