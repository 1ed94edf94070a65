// ============================================================================
// Docfield Library
// ============================================================================

pub mod auth;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod facade;
pub mod merge;
pub mod model;
pub mod result;
pub mod schema;
pub mod statement;
pub mod storage;
pub mod store;
pub mod transaction;

// Re-export main types for convenience
pub use auth::UserDirectory;
pub use config::StoreConfig;
pub use engine::{
    AggregateReader, AggregateUpdateService, CallContext, CancellationToken,
    TransactionCoordinator, UpdateTally,
};
pub use error::{Error, ErrorKind, Result};
pub use facade::Database;
pub use model::{
    Field, FieldPatch, FieldType, NewField, NewProject, Principal, Project, ProjectDetail,
    ProjectPatch,
};
pub use store::{DatabaseReader, ProjectPage, ProjectStore};

// ============================================================================
// High-level Client API
// ============================================================================

/// One database with its user directory and project store wired together.
///
/// # Examples
///
/// ```ignore
/// use docfield::{CallContext, Docfield, NewProject, ProjectPatch, StoreConfig};
///
/// let app = Docfield::open(StoreConfig::default()).await?;
/// let alice = app.users().register("Alice", "alice@example.com", "s3cret-pass").await?;
/// let lease = app.projects().create(&alice, NewProject::new("Lease")).await?;
///
/// let patch = ProjectPatch::new().title("Lease v2");
/// app.projects()
///     .update(&CallContext::new(), &alice, lease.project.uuid, &patch)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Docfield {
    db: Database,
    users: UserDirectory,
    projects: ProjectStore,
}

impl Docfield {
    /// Opens a fresh in-memory database with the table layout installed.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(invalid_config)?;
        let db = Database::open().await?;
        Ok(Self {
            users: UserDirectory::new(db.clone(), config.bcrypt_cost),
            projects: ProjectStore::new(db.clone(), &config),
            db,
        })
    }

    /// Like [`Docfield::open`], reading the configuration from `DOCFIELD_*`.
    pub async fn from_env() -> Result<Self> {
        let config = StoreConfig::from_env().map_err(invalid_config)?;
        Self::open(config).await
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }
}

fn invalid_config(msg: String) -> Error {
    Error::validation(format!("invalid config: {}", msg))
}
