//! Partial-update transaction engine.
//!
//! [`AggregateUpdateService`] validates a patch against the stored aggregate,
//! then hands it to the [`TransactionCoordinator`], which fans the row
//! updates out over one transaction and commits or rolls back as a whole.

pub mod context;
pub mod coordinator;
pub mod row_updater;
pub mod service;

pub use context::{CallContext, CancellationToken};
pub use coordinator::{DEFAULT_MAX_FANOUT, TransactionCoordinator, UpdatePhase, UpdateTally};
pub use row_updater::{PreparedUpdate, RowKey, update_row};
pub use service::{AggregateReader, AggregateUpdateService, validate_patch};
