pub mod field;
pub mod project;
pub mod user;

pub use field::{Field, FieldPatch, FieldType, NewField};
pub use project::{NewProject, Project, ProjectDetail, ProjectPatch};
pub use user::{Principal, User};
