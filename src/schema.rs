//! Table layout for users, projects and fields.

use crate::core::{Column, DataType, Value};
use crate::storage::{CheckConstraint, CheckExpr, TableSchema, UniqueConstraint};

pub mod usr {
    pub const TABLE: &str = "usr";
    pub const ID: &str = "id";
    pub const EMAIL: &str = "email";
    pub const NAME: &str = "name";
    pub const PASSWORD_HASH: &str = "password_hash";
    pub const CREATED_AT: &str = "created_at";
}

pub mod project {
    pub const TABLE: &str = "project";
    pub const ID: &str = "id";
    pub const UUID: &str = "uuid";
    pub const USER_ID: &str = "user_id";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const DOCUMENT_URL: &str = "document_url";
    pub const ROUTE: &str = "route";
    pub const TOKEN: &str = "token";
    pub const ARCHIVED: &str = "archived";
    pub const CREATED_AT: &str = "created_at";
    pub const VISITED_AT: &str = "visited_at";
}

pub mod field {
    pub const TABLE: &str = "field";
    pub const ID: &str = "id";
    pub const PROJECT_ID: &str = "project_id";
    pub const X1: &str = "x1";
    pub const Y1: &str = "y1";
    pub const X2: &str = "x2";
    pub const Y2: &str = "y2";
    pub const PAGE: &str = "page";
    pub const TYPE: &str = "type";
    pub const FIELD_ID: &str = "field_id";
    pub const VALUE: &str = "value";
}

pub fn usr_table() -> TableSchema {
    TableSchema::new(
        usr::TABLE,
        vec![
            Column::new(usr::EMAIL, DataType::Text).not_null(),
            Column::new(usr::NAME, DataType::Text).not_null(),
            Column::new(usr::PASSWORD_HASH, DataType::Text).not_null(),
            Column::new(usr::CREATED_AT, DataType::Timestamp).not_null(),
        ],
    )
    .unique(UniqueConstraint::new("usr_email_key", &[usr::EMAIL]))
}

pub fn project_table() -> TableSchema {
    TableSchema::new(
        project::TABLE,
        vec![
            Column::new(project::UUID, DataType::Text).not_null(),
            Column::new(project::USER_ID, DataType::Integer).not_null(),
            Column::new(project::TITLE, DataType::Text).not_null(),
            Column::new(project::DESCRIPTION, DataType::Text).not_null(),
            Column::new(project::DOCUMENT_URL, DataType::Text).not_null(),
            Column::new(project::ROUTE, DataType::Text),
            Column::new(project::TOKEN, DataType::Text),
            Column::new(project::ARCHIVED, DataType::Boolean).not_null(),
            Column::new(project::CREATED_AT, DataType::Timestamp).not_null(),
            Column::new(project::VISITED_AT, DataType::Timestamp),
        ],
    )
    .unique(UniqueConstraint::new("project_uuid_key", &[project::UUID]))
    .unique(UniqueConstraint::new("project_route_key", &[project::ROUTE]))
    .references(project::USER_ID, usr::TABLE)
}

pub fn field_table() -> TableSchema {
    let non_negative = |column: &str| {
        CheckConstraint::new(
            format!("field_{}_non_negative", column),
            CheckExpr::AtLeast {
                column: column.to_string(),
                min: Value::Float(0.0),
            },
        )
    };

    TableSchema::new(
        field::TABLE,
        vec![
            Column::new(field::PROJECT_ID, DataType::Integer).not_null(),
            Column::new(field::X1, DataType::Float).not_null(),
            Column::new(field::Y1, DataType::Float).not_null(),
            Column::new(field::X2, DataType::Float).not_null(),
            Column::new(field::Y2, DataType::Float).not_null(),
            Column::new(field::PAGE, DataType::Integer).not_null(),
            Column::new(field::TYPE, DataType::Text).not_null(),
            Column::new(field::FIELD_ID, DataType::Text).not_null(),
            Column::new(field::VALUE, DataType::Text).not_null(),
        ],
    )
    .check(non_negative(field::X1))
    .check(non_negative(field::Y1))
    .check(non_negative(field::X2))
    .check(non_negative(field::Y2))
    .check(CheckConstraint::new(
        "field_x_ordered",
        CheckExpr::Ordered {
            lower: field::X1.to_string(),
            upper: field::X2.to_string(),
        },
    ))
    .check(CheckConstraint::new(
        "field_y_ordered",
        CheckExpr::Ordered {
            lower: field::Y1.to_string(),
            upper: field::Y2.to_string(),
        },
    ))
    .check(CheckConstraint::new(
        "field_page_positive",
        CheckExpr::AtLeast {
            column: field::PAGE.to_string(),
            min: Value::Integer(1),
        },
    ))
    .check(CheckConstraint::new(
        "field_type_check",
        CheckExpr::OneOf {
            column: field::TYPE.to_string(),
            allowed: vec!["TEXT".into(), "NUMBER".into(), "IMAGE".into()],
        },
    ))
    // Deferred so two fields can swap identifiers inside one transaction.
    .unique(
        UniqueConstraint::new(
            "field_project_field_id_key",
            &[field::PROJECT_ID, field::FIELD_ID],
        )
        .deferred(),
    )
    .references(field::PROJECT_ID, project::TABLE)
}

/// Creation order respects foreign keys.
pub fn tables() -> Vec<TableSchema> {
    vec![usr_table(), project_table(), field_table()]
}
