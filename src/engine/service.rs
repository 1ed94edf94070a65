use super::context::CallContext;
use super::coordinator::{TransactionCoordinator, UpdateTally};
use crate::error::{Error, Result};
use crate::model::{Principal, ProjectDetail, ProjectPatch};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, event};
use uuid::Uuid;

/// Read access to stored aggregates, consumed before any write.
#[async_trait]
pub trait AggregateReader: Send + Sync {
    /// The project and all of its fields, or `None` if the uuid is unknown.
    async fn fetch_aggregate(&self, uuid: Uuid) -> Result<Option<ProjectDetail>>;
}

/// Entry point for partial aggregate updates.
///
/// Ownership and structure are checked against the stored aggregate before
/// a transaction is opened; the write itself is delegated to the
/// [`TransactionCoordinator`].
#[derive(Clone)]
pub struct AggregateUpdateService {
    reader: Arc<dyn AggregateReader>,
    coordinator: TransactionCoordinator,
    timeout: Option<Duration>,
}

impl AggregateUpdateService {
    pub fn new(reader: Arc<dyn AggregateReader>, coordinator: TransactionCoordinator) -> Self {
        Self {
            reader,
            coordinator,
            timeout: None,
        }
    }

    /// Deadline applied to every call on top of the caller's own.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub async fn update(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        uuid: Uuid,
        patch: &ProjectPatch,
    ) -> Result<UpdateTally> {
        let ctx = match self.timeout {
            Some(timeout) => ctx.clone().with_timeout(timeout),
            None => ctx.clone(),
        };
        if ctx.is_done() {
            return Err(Error::cancelled(ctx.reason()));
        }

        let stored = tokio::select! {
            biased;
            _ = ctx.done() => return Err(Error::cancelled(ctx.reason())),
            stored = self.reader.fetch_aggregate(uuid) => stored?,
        };
        // Another principal's project is indistinguishable from a missing one.
        let stored = match stored {
            Some(detail) if detail.project.user_id == principal.id => detail,
            _ => {
                event!(Level::DEBUG, %uuid, principal = principal.id, "project not visible");
                return Err(Error::not_found(format!("project {}", uuid)));
            }
        };

        validate_patch(&stored, patch)?;
        self.coordinator
            .update_aggregate(&ctx, principal, stored.project.id, patch)
            .await
    }
}

impl std::fmt::Debug for AggregateUpdateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateUpdateService")
            .field("coordinator", &self.coordinator)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Structural checks that need no database round trip.
///
/// Value constraints (ordering, page range, type) are left to the table
/// checks so they surface as row failures.
pub fn validate_patch(stored: &ProjectDetail, patch: &ProjectPatch) -> Result<()> {
    let known: HashSet<i64> = stored.fields.iter().map(|f| f.id).collect();
    let mut seen = HashSet::new();

    for child in patch.field_patches() {
        if !known.contains(&child.id) {
            return Err(Error::validation(format!(
                "field {} does not belong to project {}",
                child.id, stored.project.uuid
            )));
        }
        if !seen.insert(child.id) {
            return Err(Error::validation(format!("field {} patched twice", child.id)));
        }
        for (column, value) in child.coordinates() {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(Error::validation(format!(
                    "field {}: {} must be a finite number",
                    child.id, column
                )));
            }
        }
        if child.field_id.as_deref().is_some_and(str::is_empty) {
            return Err(Error::validation(format!(
                "field {}: field_id must not be empty",
                child.id
            )));
        }
    }

    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(Error::validation("title must not be blank"));
    }
    Ok(())
}
