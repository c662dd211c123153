use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormFillError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Document error: {0}")]
    Document(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),
}

/// Machine-discriminable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Document,
    Conversion,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Document => "DOCUMENT_ERROR",
            ErrorKind::Conversion => "CONVERSION_ERROR",
        }
    }
}

impl FormFillError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FormFillError::Validation(_) => ErrorKind::Validation,
            FormFillError::Conflict(_) => ErrorKind::Conflict,
            FormFillError::NotFound { .. } => ErrorKind::NotFound,
            FormFillError::Document(_) => ErrorKind::Document,
            FormFillError::Conversion(_) => ErrorKind::Conversion,
        }
    }

    pub(crate) fn template_not_found(id: i64) -> Self {
        FormFillError::NotFound {
            entity: "Template",
            id,
        }
    }

    pub(crate) fn box_not_found(id: i64) -> Self {
        FormFillError::NotFound { entity: "Box", id }
    }

    pub(crate) fn field_not_found(id: i64) -> Self {
        FormFillError::NotFound { entity: "Field", id }
    }
}

impl From<lopdf::Error> for FormFillError {
    fn from(err: lopdf::Error) -> Self {
        FormFillError::Document(err.to_string())
    }
}
