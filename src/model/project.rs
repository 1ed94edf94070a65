use super::field::{Field, FieldPatch, NewField};
use crate::core::DbError;
use crate::merge::{Assignment, PartialPatch};
use crate::result::Record;
use crate::schema::project as col;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate root: a document with its positioned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(skip)]
    pub id: i64,
    pub uuid: Uuid,
    #[serde(skip)]
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub document_url: String,
    pub route: Option<String>,
    pub token: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub visited_at: Option<DateTime<Utc>>,
}

impl TryFrom<Record<'_>> for Project {
    type Error = DbError;

    fn try_from(record: Record<'_>) -> Result<Self, Self::Error> {
        let uuid = record.text(col::UUID)?;
        Ok(Self {
            id: record.i64(col::ID)?,
            uuid: Uuid::parse_str(&uuid)
                .map_err(|e| DbError::TypeMismatch(format!("invalid uuid '{}': {}", uuid, e)))?,
            user_id: record.i64(col::USER_ID)?,
            title: record.text(col::TITLE)?,
            description: record.text(col::DESCRIPTION)?,
            document_url: record.text(col::DOCUMENT_URL)?,
            route: record.opt_text(col::ROUTE)?,
            token: record.opt_text(col::TOKEN)?,
            archived: record.bool(col::ARCHIVED)?,
            created_at: record.timestamp(col::CREATED_AT)?,
            visited_at: record.opt_timestamp(col::VISITED_AT)?,
        })
    }
}

/// A project together with all of its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub fields: Vec<Field>,
}

impl ProjectDetail {
    pub fn field(&self, id: i64) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// Creation payload for a project and its initial fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub document_url: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub fields: Vec<NewField>,
}

impl NewProject {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, field: NewField) -> Self {
        self.fields.push(field);
        self
    }
}

/// Partial update of a project and, optionally, some of its fields.
///
/// Each attribute is `None` unless the caller supplied it. Child patches are
/// keyed by the field's internal id and must name fields of this project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldPatch>>,
}

impl ProjectPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn document_url(mut self, url: impl Into<String>) -> Self {
        self.document_url = Some(url.into());
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn archived(mut self, archived: bool) -> Self {
        self.archived = Some(archived);
        self
    }

    pub fn visited_at(mut self, at: DateTime<Utc>) -> Self {
        self.visited_at = Some(at);
        self
    }

    pub fn field(mut self, patch: FieldPatch) -> Self {
        self.fields.get_or_insert_with(Vec::new).push(patch);
        self
    }

    pub fn field_patches(&self) -> &[FieldPatch] {
        self.fields.as_deref().unwrap_or_default()
    }
}

impl PartialPatch for ProjectPatch {
    /// Parent columns only; child patches are separate rows.
    fn assignments(&self) -> Vec<Assignment> {
        vec![
            Assignment::new(col::TITLE, self.title.clone()),
            Assignment::new(col::DESCRIPTION, self.description.clone()),
            Assignment::new(col::DOCUMENT_URL, self.document_url.clone()),
            Assignment::new(col::ROUTE, self.route.clone()),
            Assignment::new(col::TOKEN, self.token.clone()),
            Assignment::new(col::ARCHIVED, self.archived),
            Assignment::new(col::VISITED_AT, self.visited_at),
        ]
    }
}
