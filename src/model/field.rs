use crate::core::DbError;
use crate::merge::{Assignment, PartialPatch};
use crate::result::Record;
use crate::schema::field as col;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Text,
    Number,
    Image,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Number => "NUMBER",
            Self::Image => "IMAGE",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(Self::Text),
            "NUMBER" => Ok(Self::Number),
            "IMAGE" => Ok(Self::Image),
            other => Err(DbError::TypeMismatch(format!("unknown field type '{}'", other))),
        }
    }
}

/// A positioned region on a document page.
///
/// `project_id` is a plain back-reference to the owning project's internal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: i64,
    pub project_id: i64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub page: u32,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub field_id: String,
    pub value: String,
}

impl TryFrom<Record<'_>> for Field {
    type Error = DbError;

    fn try_from(record: Record<'_>) -> Result<Self, Self::Error> {
        let page = record.i64(col::PAGE)?;
        Ok(Self {
            id: record.i64(col::ID)?,
            project_id: record.i64(col::PROJECT_ID)?,
            x1: record.f64(col::X1)?,
            y1: record.f64(col::Y1)?,
            x2: record.f64(col::X2)?,
            y2: record.f64(col::Y2)?,
            page: u32::try_from(page)
                .map_err(|_| DbError::TypeMismatch(format!("page {} out of range", page)))?,
            field_type: record.text(col::TYPE)?.parse()?,
            field_id: record.text(col::FIELD_ID)?,
            value: record.text(col::VALUE)?,
        })
    }
}

/// Creation payload for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewField {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub page: u32,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub field_id: String,
    #[serde(default)]
    pub value: String,
}

/// Partial update for one stored field, keyed by its internal id.
///
/// `None` means "leave as stored"; `Some(0.0)` or `Some("")` are real updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FieldPatch {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn x1(mut self, x1: f64) -> Self {
        self.x1 = Some(x1);
        self
    }

    pub fn y1(mut self, y1: f64) -> Self {
        self.y1 = Some(y1);
        self
    }

    pub fn x2(mut self, x2: f64) -> Self {
        self.x2 = Some(x2);
        self
    }

    pub fn y2(mut self, y2: f64) -> Self {
        self.y2 = Some(y2);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn field_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn field_id(mut self, field_id: impl Into<String>) -> Self {
        self.field_id = Some(field_id.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Coordinates present in the patch, by column name.
    pub fn coordinates(&self) -> [(&'static str, Option<f64>); 4] {
        [
            (col::X1, self.x1),
            (col::Y1, self.y1),
            (col::X2, self.x2),
            (col::Y2, self.y2),
        ]
    }
}

impl PartialPatch for FieldPatch {
    fn assignments(&self) -> Vec<Assignment> {
        vec![
            Assignment::new(col::X1, self.x1),
            Assignment::new(col::Y1, self.y1),
            Assignment::new(col::X2, self.x2),
            Assignment::new(col::Y2, self.y2),
            Assignment::new(col::PAGE, self.page),
            Assignment::new(col::TYPE, self.field_type.map(|t| t.as_str())),
            Assignment::new(col::FIELD_ID, self.field_id.clone()),
            Assignment::new(col::VALUE, self.value.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    #[test]
    fn test_field_type_wire_names() {
        assert_eq!(serde_json::to_string(&FieldType::Image).unwrap(), "\"IMAGE\"");
        assert_eq!("NUMBER".parse::<FieldType>().unwrap(), FieldType::Number);
        assert!("DATE".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_patch_assignments_carry_presence() {
        let patch = FieldPatch::new(3).x1(0.0).value("");
        let assignments = patch.assignments();
        assert_eq!(assignments.len(), 8);
        assert_eq!(assignments[0].value, Some(Value::Float(0.0)));
        assert_eq!(assignments[1].value, None);
        assert_eq!(assignments[7].value, Some(Value::from("")));
        assert!(!patch.is_empty());
        assert!(FieldPatch::new(3).is_empty());
    }

    #[test]
    fn test_patch_deserializes_absent_attributes_as_none() {
        let patch: FieldPatch =
            serde_json::from_str(r#"{"id": 7, "page": 2, "type": "TEXT"}"#).unwrap();
        assert_eq!(patch.id, 7);
        assert_eq!(patch.page, Some(2));
        assert_eq!(patch.field_type, Some(FieldType::Text));
        assert_eq!(patch.x1, None);
        assert_eq!(patch.value, None);
    }
}
