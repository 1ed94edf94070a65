// ============================================================================
// Transaction Coordinator
// ============================================================================
//
// One aggregate update = one transaction. The parent row and every child row
// become independent tasks on a JoinSet. Tasks prepare their statement on
// their own, then pass through a single mutex that owns the transaction, so
// the transaction sees a strictly serialized statement stream.
//
//   Open ──> Executing ──all applied──> Committing ──> Committed
//                │                          │
//                └──failure / cancel──> Aborting <──commit rejected
//                                           │
//                                           └──> Aborted
//
// The first failure wins the error slot and cancels the remaining tasks.
// Nothing returns before every spawned task has been joined. Tasks never
// dispatched are counted as skipped.
//
// ============================================================================

use super::context::{CallContext, CancellationToken};
use super::row_updater::{self, PreparedUpdate};
use crate::error::{Error, ErrorKind, Result};
use crate::facade::Database;
use crate::model::{FieldPatch, Principal, ProjectPatch};
use crate::transaction::Transaction;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{Instrument, Level, event, info_span};

pub const DEFAULT_MAX_FANOUT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Open,
    Executing,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl UpdatePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Executing => "executing",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborting => "aborting",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One unit of work: a single row to patch.
#[derive(Debug, Clone)]
enum RowTask {
    Parent {
        project_id: i64,
        owner_id: i64,
        patch: ProjectPatch,
    },
    Child {
        project_id: i64,
        patch: FieldPatch,
    },
}

impl RowTask {
    /// Parent first, then one task per child patch.
    fn plan(project_id: i64, owner_id: i64, patch: &ProjectPatch) -> Vec<RowTask> {
        let parent = ProjectPatch {
            fields: None,
            ..patch.clone()
        };
        let mut tasks = Vec::with_capacity(1 + patch.field_patches().len());
        tasks.push(RowTask::Parent {
            project_id,
            owner_id,
            patch: parent,
        });
        tasks.extend(patch.field_patches().iter().map(|child| RowTask::Child {
            project_id,
            patch: child.clone(),
        }));
        tasks
    }

    fn prepare(&self) -> PreparedUpdate {
        match self {
            Self::Parent {
                project_id,
                owner_id,
                patch,
            } => PreparedUpdate::parent(*project_id, *owner_id, patch),
            Self::Child { project_id, patch } => PreparedUpdate::child(*project_id, patch),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Applied,
    Skipped,
    Failed,
}

/// Terminal counts for one call. Each joined task lands in exactly one bucket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateTally {
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl UpdateTally {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Applied => self.applied += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.failed + self.skipped
    }
}

/// Shared state for the tasks of one call.
struct Rendezvous {
    gate: Mutex<Transaction>,
    token: CancellationToken,
    first_error: OnceLock<Error>,
}

impl Rendezvous {
    /// Only the first failure is kept; later ones are dropped.
    fn fail(&self, err: Error) {
        if let Err(discarded) = self.first_error.set(err) {
            event!(Level::DEBUG, error = %discarded, "discarding later failure");
        }
        self.token.cancel();
    }
}

/// Applies an aggregate patch as one all-or-nothing transaction.
#[derive(Clone, Debug)]
pub struct TransactionCoordinator {
    db: Database,
    max_fanout: usize,
}

impl TransactionCoordinator {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_fanout: DEFAULT_MAX_FANOUT,
        }
    }

    /// Caps the number of row tasks in flight. Zero is treated as one.
    pub fn with_max_fanout(mut self, max_fanout: usize) -> Self {
        self.max_fanout = max_fanout.max(1);
        self
    }

    pub fn max_fanout(&self) -> usize {
        self.max_fanout
    }

    /// Updates the parent row and every patched child in one transaction.
    ///
    /// `project_id` is the parent's internal id; the parent statement is
    /// additionally filtered by `principal`. Returns the first failure, or
    /// `CommitFailed` if every row applied but the commit was rejected.
    /// Errors raised after `begin` carry the task tally ([`Error::tally`]).
    pub async fn update_aggregate(
        &self,
        ctx: &CallContext,
        principal: &Principal,
        project_id: i64,
        patch: &ProjectPatch,
    ) -> Result<UpdateTally> {
        let span = info_span!(
            "aggregate.update",
            project = project_id,
            principal = principal.id,
            children = patch.field_patches().len()
        );
        self.run(ctx, principal.id, project_id, patch)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        ctx: &CallContext,
        owner_id: i64,
        project_id: i64,
        patch: &ProjectPatch,
    ) -> Result<UpdateTally> {
        let tx = tokio::select! {
            biased;
            _ = ctx.done() => {
                event!(Level::WARN, reason = ctx.reason(), "cancelled before begin");
                return Err(Error::cancelled(ctx.reason()));
            }
            tx = self.db.begin() => tx,
        };
        let mut phase = UpdatePhase::Open;
        event!(Level::DEBUG, txn = %tx.id(), %phase, "transaction open");

        let tasks = RowTask::plan(project_id, owner_id, patch);
        let planned = tasks.len();
        let shared = Arc::new(Rendezvous {
            gate: Mutex::new(tx),
            token: CancellationToken::new(),
            first_error: OnceLock::new(),
        });

        phase = UpdatePhase::Executing;
        event!(Level::DEBUG, %phase, tasks = planned, "dispatching row tasks");

        let mut tally = UpdateTally::default();
        let mut pending = tasks.into_iter();
        let mut in_flight = JoinSet::new();
        let mut caller_done = false;

        loop {
            while in_flight.len() < self.max_fanout && !shared.token.is_cancelled() {
                let Some(task) = pending.next() else {
                    break;
                };
                in_flight.spawn(run_task(task, Arc::clone(&shared)));
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = ctx.done(), if !caller_done => {
                    caller_done = true;
                    event!(
                        Level::WARN,
                        reason = ctx.reason(),
                        "caller gave up, cancelling row tasks"
                    );
                    shared.fail(Error::cancelled(ctx.reason()));
                }
                joined = in_flight.join_next() => match joined {
                    Some(Ok(outcome)) => tally.record(outcome),
                    Some(Err(join_err)) => {
                        event!(Level::ERROR, error = %join_err, "row task did not finish");
                        tally.record(TaskOutcome::Failed);
                        shared.fail(Error::new(
                            ErrorKind::RowUpdateFailed,
                            format!("row task aborted: {}", join_err),
                        ));
                    }
                    None => break,
                },
            }
        }

        // Never dispatched because a failure came first.
        tally.skipped += pending.count();
        debug_assert_eq!(tally.total(), planned);

        let Ok(shared) = Arc::try_unwrap(shared) else {
            // Unreachable once every task has been joined; the last clone
            // rolls the transaction back on drop.
            return Err(Error::new(
                ErrorKind::Storage,
                "transaction still shared after rendezvous",
            )
            .with_tally(tally));
        };
        let tx = shared.gate.into_inner();

        if let Some(err) = shared.first_error.into_inner() {
            phase = UpdatePhase::Aborting;
            event!(
                Level::WARN,
                %phase,
                error = %err,
                applied = tally.applied,
                skipped = tally.skipped,
                "rolling back"
            );
            if let Err(rollback_err) = tx.rollback() {
                event!(Level::ERROR, error = %rollback_err, "rollback failed");
            }
            phase = UpdatePhase::Aborted;
            event!(Level::INFO, %phase, "aggregate update rolled back");
            return Err(err.with_tally(tally));
        }

        phase = UpdatePhase::Committing;
        event!(Level::DEBUG, %phase, rows = tally.applied, "all rows applied");
        match tx.commit() {
            Ok(()) => {
                phase = UpdatePhase::Committed;
                event!(Level::INFO, %phase, rows = tally.applied, "aggregate update committed");
                Ok(tally)
            }
            Err(err) => {
                phase = UpdatePhase::Aborted;
                event!(Level::WARN, %phase, error = %err, "commit rejected");
                Err(Error::with_source(
                    ErrorKind::CommitFailed,
                    format!("project {}", project_id),
                    err,
                )
                .with_tally(tally))
            }
        }
    }
}

async fn run_task(task: RowTask, shared: Arc<Rendezvous>) -> TaskOutcome {
    if shared.token.is_cancelled() {
        return TaskOutcome::Skipped;
    }
    let update = task.prepare();

    let mut tx = tokio::select! {
        biased;
        _ = shared.token.cancelled() => return TaskOutcome::Skipped,
        guard = shared.gate.lock() => guard,
    };
    // Cancellation may have landed while queued on the gate.
    if shared.token.is_cancelled() {
        return TaskOutcome::Skipped;
    }

    match row_updater::update_row(&mut tx, &update) {
        Ok(_) => TaskOutcome::Applied,
        Err(err) => {
            shared.fail(err);
            TaskOutcome::Failed
        }
    }
}
