pub mod memory;
pub mod table;

pub use memory::{ExecResult, InMemoryStorage};
pub use table::{CheckConstraint, CheckExpr, ForeignKey, Table, TableSchema, UniqueConstraint};
