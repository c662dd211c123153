//! Domain records: templates, boxes, fields and fill requests

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coords::Rect;
use crate::error::FormFillError;

pub type TemplateId = i64;
pub type BoxId = i64;
pub type FieldId = i64;

/// Font size used when a field is created without one
pub const DEFAULT_FONT_SIZE: f64 = 10.0;

/// Uploaded source document. Root lifetime owner of its boxes and fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub filename: String,
    pub file_path: PathBuf,
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: Option<String>,
    pub filename: String,
    pub file_path: PathBuf,
    pub page_count: u32,
}

/// A user-drawn region on one page, in document-space units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub id: BoxId,
    pub template_id: TemplateId,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Geometry for a box that does not exist yet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxPlacement {
    pub page: u32,
    pub rect: Rect,
}

impl BoxPlacement {
    pub fn new(page: u32, rect: Rect) -> Self {
        Self { page, rect }
    }
}

/// Partial geometry change. Unset values keep the box's current ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct BoxUpdate {
    pub x: Option<f64>,
    pub y: Option<f64>,
    #[serde(alias = "w")]
    pub width: Option<f64>,
    #[serde(alias = "h")]
    pub height: Option<f64>,
}

impl BoxUpdate {
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.width.is_none() && self.height.is_none()
    }

    pub fn apply_to(&self, current: Rect) -> Rect {
        Rect::new(
            self.x.unwrap_or(current.x),
            self.y.unwrap_or(current.y),
            self.width.unwrap_or(current.width),
            self.height.unwrap_or(current.height),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Text,
    Number,
    Email,
    Date,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Text => write!(f, "text"),
            ValueType::Number => write!(f, "number"),
            ValueType::Email => write!(f, "email"),
            ValueType::Date => write!(f, "date"),
        }
    }
}

impl FromStr for ValueType {
    type Err = FormFillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(ValueType::Text),
            "number" => Ok(ValueType::Number),
            "email" => Ok(ValueType::Email),
            "date" => Ok(ValueType::Date),
            other => Err(FormFillError::Validation(format!(
                "unknown value type '{}', expected text, number, email or date",
                other
            ))),
        }
    }
}

/// Named, typed value mapped onto one or more boxes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    pub template_id: TemplateId,
    pub name: String,
    pub label: String,
    pub value_type: ValueType,
    pub font_size: f64,
    /// Ordered set: no duplicates, insertion order kept for display
    pub box_ids: Vec<BoxId>,
}

#[derive(Debug, Clone)]
pub struct NewField {
    pub name: String,
    pub label: String,
    pub value_type: ValueType,
    pub font_size: Option<f64>,
    pub box_ids: Vec<BoxId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldUpdate {
    pub label: Option<String>,
    pub value_type: Option<ValueType>,
    pub font_size: Option<f64>,
}

/// Box geometry as seen through the field that owns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBox {
    pub id: BoxId,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl From<&BoundingBox> for ResolvedBox {
    fn from(b: &BoundingBox) -> Self {
        Self {
            id: b.id,
            page: b.page,
            x: b.x,
            y: b.y,
            width: b.width,
            height: b.height,
        }
    }
}

/// A field expanded with the full geometry of every box it references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedField {
    pub id: FieldId,
    pub name: String,
    pub label: String,
    pub value_type: ValueType,
    pub font_size: f64,
    /// Ordered by `(page, id)`
    pub boxes: Vec<ResolvedBox>,
}

/// Transient per-export input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequest {
    pub template_id: TemplateId,
    #[serde(alias = "fieldData")]
    pub values: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_parse() {
        assert_eq!("Email".parse::<ValueType>().unwrap(), ValueType::Email);
        assert_eq!(" date ".parse::<ValueType>().unwrap(), ValueType::Date);
        assert!("phone".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_value_type_serde_lowercase() {
        let json = serde_json::to_string(&ValueType::Number).unwrap();
        assert_eq!(json, "\"number\"");
        assert_eq!(ValueType::Number.to_string(), "number");
    }

    #[test]
    fn test_fill_request_accepts_field_data_alias() {
        let req: FillRequest =
            serde_json::from_str(r#"{"templateId":3,"fieldData":{"name":"Bob"}}"#).unwrap();
        assert_eq!(req.template_id, 3);
        assert_eq!(req.values.get("name").map(String::as_str), Some("Bob"));
    }
}
