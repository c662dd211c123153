//! Request and response bodies for the form-fill API

use axum::extract::FromRequest;
use chrono::{DateTime, Utc};
use formfill_core::{
    BoundingBox, BoxId, BoxPlacement, ExportFormat, Field, Rect, ResolvedField, Template,
    TemplateId,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// JSON body extractor whose rejections use the API error body
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Request to upload a template PDF
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTemplateRequest {
    pub filename: String,
    #[serde(default)]
    pub name: Option<String>,
    pub pdf_base64: String,
}

/// Template as returned to clients. The storage path stays server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateResponse {
    pub id: TemplateId,
    pub name: String,
    pub filename: String,
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
    pub uniform_height: Option<f64>,
}

impl TemplateResponse {
    pub fn new(template: Template, uniform_height: Option<f64>) -> Self {
        Self {
            id: template.id,
            name: template.name,
            filename: template.filename,
            page_count: template.page_count,
            created_at: template.created_at,
            uniform_height,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateListResponse {
    pub success: bool,
    pub templates: Vec<TemplateResponse>,
    pub count: usize,
}

/// One box in a create request. Accepts `w`/`h` as short keys.
#[derive(Debug, Clone, Deserialize)]
pub struct BoxInput {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    #[serde(alias = "w")]
    pub width: f64,
    /// Omitted when the template's uniform height decides it
    #[serde(default, alias = "h")]
    pub height: Option<f64>,
}

impl From<&BoxInput> for BoxPlacement {
    fn from(input: &BoxInput) -> Self {
        BoxPlacement::new(
            input.page,
            Rect::new(
                input.x,
                input.y,
                input.width,
                input.height.unwrap_or_default(),
            ),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkBoxesRequest {
    pub boxes: Vec<BoxInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoxListResponse {
    pub success: bool,
    pub boxes: Vec<BoundingBox>,
    pub count: usize,
}

impl BoxListResponse {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self {
            success: true,
            count: boxes.len(),
            boxes,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoxListQuery {
    pub page: Option<u32>,
}

/// `null` clears the template's uniform height
#[derive(Debug, Clone, Deserialize)]
pub struct UniformHeightRequest {
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformHeightResponse {
    pub success: bool,
    pub template_id: TemplateId,
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFieldRequest {
    #[serde(alias = "fieldName")]
    pub name: String,
    #[serde(default, alias = "fieldLabel")]
    pub label: Option<String>,
    #[serde(default, alias = "fieldType")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub font_size: Option<f64>,
    pub box_ids: Vec<BoxId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldListResponse {
    pub success: bool,
    pub fields: Vec<Field>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedFieldsResponse {
    pub success: bool,
    pub fields: Vec<ResolvedField>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    pub format: ExportFormat,
    pub endpoint: String,
    pub method: &'static str,
    pub mime_type: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportInfoResponse {
    pub success: bool,
    pub formats: Vec<FormatInfo>,
}

impl ExportInfoResponse {
    pub fn new() -> Self {
        Self {
            success: true,
            formats: ExportFormat::ALL
                .iter()
                .map(|format| FormatInfo {
                    format: *format,
                    endpoint: format!("/api/export/{}", format),
                    method: "POST",
                    mime_type: format.mime_type(),
                    description: format.description(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub id: i64,
}
