//! Project CRUD on top of the update engine.
//!
//! Every read, update and delete is scoped to the calling principal; a
//! project owned by someone else answers exactly like a missing one.

use crate::config::{MAX_LIST_LIMIT, StoreConfig};
use crate::core::DbError;
use crate::engine::{AggregateReader, AggregateUpdateService, CallContext, TransactionCoordinator};
use crate::error::{Error, ErrorKind, Result};
use crate::facade::Database;
use crate::model::{Field, NewField, NewProject, Principal, Project, ProjectDetail, ProjectPatch};
use crate::result::QueryResult;
use crate::schema::{field, project};
use crate::statement::{DeleteStatement, Filter, InsertStatement, SelectStatement};
use crate::transaction::Transaction;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Level, event};
use uuid::Uuid;

/// One page of a principal's projects, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectPage {
    pub projects: Vec<Project>,
    /// Pass back to `list` for the following page; `None` on the last one.
    pub next_cursor: Option<String>,
}

/// Loads stored aggregates straight from the database, regardless of owner.
#[derive(Debug, Clone)]
pub struct DatabaseReader {
    db: Database,
}

impl DatabaseReader {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AggregateReader for DatabaseReader {
    async fn fetch_aggregate(&self, uuid: Uuid) -> Result<Option<ProjectDetail>> {
        let projects = self.db.query(&by_uuid(uuid)).await?;
        let Some(project) = first_project(&projects)? else {
            return Ok(None);
        };
        let fields = self.db.query(&fields_of(project.id)).await?;
        Ok(Some(ProjectDetail {
            fields: collect_fields(&fields)?,
            project,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct ProjectStore {
    db: Database,
    reader: DatabaseReader,
    updates: AggregateUpdateService,
    list_limit: usize,
}

impl ProjectStore {
    pub fn new(db: Database, config: &StoreConfig) -> Self {
        let reader = DatabaseReader::new(db.clone());
        let coordinator =
            TransactionCoordinator::new(db.clone()).with_max_fanout(config.max_fanout);
        let updates = AggregateUpdateService::new(Arc::new(reader.clone()), coordinator)
            .with_timeout(config.update_timeout);
        Self {
            db,
            reader,
            updates,
            list_limit: config.list_limit,
        }
    }

    pub fn updates(&self) -> &AggregateUpdateService {
        &self.updates
    }

    /// Inserts the project and its initial fields in one transaction.
    pub async fn create(&self, principal: &Principal, new: NewProject) -> Result<ProjectDetail> {
        if new.title.trim().is_empty() {
            return Err(Error::validation("title must not be blank"));
        }
        if let Some(bad) = new.fields.iter().find(|f| !coordinates_finite(f)) {
            return Err(Error::validation(format!(
                "field '{}': coordinates must be finite numbers",
                bad.field_id
            )));
        }

        let uuid = Uuid::new_v4();
        let mut tx = self.db.begin().await;
        let detail = insert_aggregate(&mut tx, principal, uuid, &new).map_err(rejected_input)?;
        tx.commit().map_err(rejected_input)?;

        event!(
            Level::INFO,
            %uuid,
            principal = principal.id,
            fields = detail.fields.len(),
            "project created"
        );
        Ok(detail)
    }

    /// The project row without its fields.
    pub async fn overview(&self, principal: &Principal, uuid: Uuid) -> Result<Project> {
        let projects = self.db.query(&by_uuid(uuid)).await?;
        match first_project(&projects)? {
            Some(project) if project.user_id == principal.id => Ok(project),
            _ => Err(not_found(uuid)),
        }
    }

    pub async fn detail(&self, principal: &Principal, uuid: Uuid) -> Result<ProjectDetail> {
        match self.reader.fetch_aggregate(uuid).await? {
            Some(detail) if detail.project.user_id == principal.id => Ok(detail),
            _ => Err(not_found(uuid)),
        }
    }

    /// Keyset pagination over the principal's projects.
    ///
    /// `limit` defaults to the configured page size and is clamped to
    /// `1..=100`. The cursor is opaque to callers.
    pub async fn list(
        &self,
        principal: &Principal,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<ProjectPage> {
        let limit = limit.unwrap_or(self.list_limit).clamp(1, MAX_LIST_LIMIT);
        let mut filter = Filter::new().eq(project::USER_ID, principal.id);
        if let Some(cursor) = cursor {
            let after: i64 = cursor
                .parse()
                .map_err(|_| Error::validation(format!("malformed cursor '{}'", cursor)))?;
            filter = filter.gt(project::ID, after);
        }

        // One extra row tells whether another page exists.
        let rows = self
            .db
            .query(&SelectStatement::new(project::TABLE).filter(filter).limit(limit + 1))
            .await?;
        let mut projects = rows
            .records()
            .map(Project::try_from)
            .collect::<std::result::Result<Vec<_>, DbError>>()?;

        let next_cursor = if projects.len() > limit {
            projects.truncate(limit);
            projects.last().map(|p| p.id.to_string())
        } else {
            None
        };
        Ok(ProjectPage {
            projects,
            next_cursor,
        })
    }

    /// Applies a partial patch atomically and returns the stored result.
    pub async fn update(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        uuid: Uuid,
        patch: &ProjectPatch,
    ) -> Result<ProjectDetail> {
        self.updates.update(ctx, principal, uuid, patch).await?;
        self.detail(principal, uuid).await
    }

    /// Stamps `visited_at` through the same update path as any other patch.
    pub async fn visit(&self, ctx: &CallContext, principal: &Principal, uuid: Uuid) -> Result<()> {
        let patch = ProjectPatch::new().visited_at(Utc::now());
        self.updates.update(ctx, principal, uuid, &patch).await?;
        Ok(())
    }

    /// Removes the project; its fields go with it.
    pub async fn delete(&self, principal: &Principal, uuid: Uuid) -> Result<()> {
        let filter = Filter::new()
            .eq(project::UUID, uuid.to_string())
            .eq(project::USER_ID, principal.id);
        let result = self
            .db
            .execute(DeleteStatement::new(project::TABLE, filter))
            .await?;
        if result.rows_affected == 0 {
            return Err(not_found(uuid));
        }
        event!(Level::INFO, %uuid, principal = principal.id, "project deleted");
        Ok(())
    }
}

fn insert_aggregate(
    tx: &mut Transaction,
    principal: &Principal,
    uuid: Uuid,
    new: &NewProject,
) -> std::result::Result<ProjectDetail, DbError> {
    let insert = InsertStatement::new(project::TABLE)
        .value(project::UUID, uuid.to_string())
        .value(project::USER_ID, principal.id)
        .value(project::TITLE, new.title.as_str())
        .value(project::DESCRIPTION, new.description.as_str())
        .value(project::DOCUMENT_URL, new.document_url.as_str())
        .value(project::ROUTE, new.route.clone())
        .value(project::TOKEN, new.token.clone())
        .value(project::ARCHIVED, false)
        .value(project::CREATED_AT, Utc::now());
    let project_id = tx
        .execute(&insert.into())?
        .generated_id
        .ok_or_else(|| DbError::ExecutionError("project insert returned no id".into()))?;

    for new_field in &new.fields {
        tx.execute(&insert_field(project_id, new_field).into())?;
    }

    let projects = tx.query(&by_uuid(uuid))?;
    let project = first_project(&projects)?
        .ok_or_else(|| DbError::ExecutionError(format!("project {} vanished", uuid)))?;
    let fields = tx.query(&fields_of(project_id))?;
    Ok(ProjectDetail {
        project,
        fields: collect_fields(&fields)?,
    })
}

fn insert_field(project_id: i64, new: &NewField) -> InsertStatement {
    InsertStatement::new(field::TABLE)
        .value(field::PROJECT_ID, project_id)
        .value(field::X1, new.x1)
        .value(field::Y1, new.y1)
        .value(field::X2, new.x2)
        .value(field::Y2, new.y2)
        .value(field::PAGE, new.page)
        .value(field::TYPE, new.field_type.as_str())
        .value(field::FIELD_ID, new.field_id.as_str())
        .value(field::VALUE, new.value.as_str())
}

fn coordinates_finite(f: &NewField) -> bool {
    [f.x1, f.y1, f.x2, f.y2].iter().all(|v| v.is_finite())
}

fn by_uuid(uuid: Uuid) -> SelectStatement {
    SelectStatement::new(project::TABLE).filter(Filter::new().eq(project::UUID, uuid.to_string()))
}

fn fields_of(project_id: i64) -> SelectStatement {
    SelectStatement::new(field::TABLE).filter(Filter::new().eq(field::PROJECT_ID, project_id))
}

fn first_project(rows: &QueryResult) -> std::result::Result<Option<Project>, DbError> {
    rows.first().map(Project::try_from).transpose()
}

fn collect_fields(rows: &QueryResult) -> std::result::Result<Vec<Field>, DbError> {
    rows.records().map(Field::try_from).collect()
}

fn not_found(uuid: Uuid) -> Error {
    Error::not_found(format!("project {}", uuid))
}

/// Constraint violations on create are the caller's data, not a storage fault.
fn rejected_input(err: DbError) -> Error {
    match err {
        DbError::ConstraintViolation { .. } => {
            Error::with_source(ErrorKind::ValidationFailed, "project rejected", err)
        }
        other => other.into(),
    }
}
