use crate::core::DbError;
use crate::error::{Error, ErrorKind, Result};
use crate::facade::Database;
use crate::model::{Principal, User};
use crate::schema::usr;
use crate::statement::{Filter, InsertStatement, SelectStatement};
use chrono::Utc;
use tracing::{Level, event};

const MIN_PASSWORD_LEN: usize = 8;
const MAX_NAME_LEN: usize = 50;

/// Registers users and resolves credentials to a [`Principal`].
///
/// Passwords are stored as bcrypt hashes; the plain text never reaches the
/// database.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    db: Database,
    cost: u32,
}

impl UserDirectory {
    pub fn new(db: Database, cost: u32) -> Self {
        Self { db, cost }
    }

    /// Hashes a password using bcrypt with the configured cost.
    fn hash_password(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| Error::new(ErrorKind::Storage, format!("password hashing failed: {}", e)))
    }

    /// Verifies password against bcrypt hash. A malformed hash never matches.
    fn verify_password(password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or(false)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<Principal> {
        Self::validate_name(name)?;
        Self::validate_email(email)?;
        Self::validate_password(password)?; // before hashing

        let hash = self.hash_password(password)?;
        let insert = InsertStatement::new(usr::TABLE)
            .value(usr::EMAIL, email)
            .value(usr::NAME, name)
            .value(usr::PASSWORD_HASH, hash)
            .value(usr::CREATED_AT, Utc::now());

        match self.db.execute(insert).await {
            Ok(result) => {
                let id = result.generated_id.ok_or_else(|| {
                    Error::new(ErrorKind::Storage, "insert did not return an id")
                })?;
                event!(Level::INFO, user = id, "user registered");
                Ok(Principal::new(id, email))
            }
            Err(err @ DbError::ConstraintViolation { .. })
                if err.constraint_name() == Some("usr_email_key") =>
            {
                Err(Error::with_source(
                    ErrorKind::ValidationFailed,
                    format!("email '{}' is already registered", email),
                    err,
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Unknown email and wrong password are reported identically.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Principal> {
        let user = self.find_by_email(email).await?;
        match user {
            Some(user) if Self::verify_password(password, &user.password_hash) => {
                Ok(user.principal())
            }
            _ => {
                event!(Level::DEBUG, "authentication failed");
                Err(Error::new(ErrorKind::Unauthorized, "invalid email or password"))
            }
        }
    }

    pub async fn principal(&self, id: i64) -> Result<Principal> {
        let rows = self
            .db
            .query(&SelectStatement::new(usr::TABLE).filter(Filter::new().eq(usr::ID, id)))
            .await?;
        match rows.first() {
            Some(record) => Ok(User::try_from(record)?.principal()),
            None => Err(Error::not_found(format!("user {}", id))),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let rows = self
            .db
            .query(&SelectStatement::new(usr::TABLE).filter(Filter::new().eq(usr::EMAIL, email)))
            .await?;
        Ok(rows.first().map(User::try_from).transpose()?)
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::validation("name cannot be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::validation(format!(
                "name too long (max {} characters)",
                MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    fn validate_email(email: &str) -> Result<()> {
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(Error::validation(format!("'{}' is not an email address", email))),
        }
    }

    fn validate_password(password: &str) -> Result<()> {
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "password must be at least {} characters long",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}
