//! HTTP handlers for the form-fill API
//!
//! - Templates: upload, list, fetch, delete, serve the stored PDF
//! - Boxes: create (single and bulk), list per page, move/resize, delete
//! - Fields: create from selected boxes, update, delete, resolve
//! - Export: fill a template and download it as PDF or DOCX

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use formfill_core::{
    export_filename, export_filled, pdf, BoundingBox, BoxId, BoxPlacement, BoxUpdate, ExportFormat,
    Field, FieldId, FieldUpdate, FillRequest, FormFillError, NewField, NewTemplate, TemplateId,
    ValueType,
};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;
use crate::models::*;
use crate::state::{remove_file_best_effort, AppState};

type SharedState = Arc<AppState>;

/// Build the router with every endpoint
pub fn router(state: SharedState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Templates
        .route("/api/templates", get(list_templates))
        .route("/api/templates/upload", post(upload_template))
        .route(
            "/api/templates/:id",
            get(get_template).delete(delete_template),
        )
        .route("/api/templates/:id/pdf", get(serve_pdf))
        // Boxes
        .route(
            "/api/templates/:id/boxes",
            get(list_boxes).post(create_box),
        )
        .route("/api/templates/:id/boxes/bulk", post(bulk_create_boxes))
        .route("/api/templates/:id/uniform-height", put(set_uniform_height))
        .route(
            "/api/templates/:id/uniform-height/apply",
            post(apply_uniform_height),
        )
        .route(
            "/api/boxes/:id",
            get(get_box).patch(update_box).delete(delete_box),
        )
        .route("/api/boxes/:id/select", post(select_box))
        // Fields
        .route(
            "/api/templates/:id/fields",
            get(list_fields).post(create_field),
        )
        .route("/api/templates/:id/fields/resolved", get(resolved_fields))
        .route(
            "/api/fields/:id",
            get(get_field).patch(update_field).delete(delete_field),
        )
        // Export
        .route("/api/export/info", get(export_info))
        .route("/api/export/:format", post(export))
        .with_state(state)
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "formfill-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn template_response(state: &AppState, id: TemplateId) -> Result<TemplateResponse, ApiError> {
    let template = state.store.get_template(id)?;
    let uniform_height = state.store.uniform_height(id)?;
    Ok(TemplateResponse::new(template, uniform_height))
}

/// Handler: POST /api/templates/upload
pub async fn upload_template(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<UploadTemplateRequest>,
) -> Result<(StatusCode, Json<TemplateResponse>), ApiError> {
    let bytes = BASE64
        .decode(req.pdf_base64.trim())
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid PDF base64: {}", e)))?;
    let page_count = pdf::page_count(&bytes)?;

    let file_path = state.new_upload_path();
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("storing upload: {}", e)))?;

    let template = match state.store.create_template(NewTemplate {
        name: req.name,
        filename: req.filename,
        file_path: file_path.clone(),
        page_count,
    }) {
        Ok(template) => template,
        Err(e) => {
            remove_file_best_effort(&file_path).await;
            return Err(e.into());
        }
    };
    state.persist_new(template.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(TemplateResponse::new(template, None)),
    ))
}

/// Handler: GET /api/templates
pub async fn list_templates(State(state): State<SharedState>) -> Json<TemplateListResponse> {
    let templates: Vec<TemplateResponse> = state
        .store
        .list_templates()
        .into_iter()
        .map(|t| {
            let height = state.store.uniform_height(t.id).ok().flatten();
            TemplateResponse::new(t, height)
        })
        .collect();

    Json(TemplateListResponse {
        success: true,
        count: templates.len(),
        templates,
    })
}

/// Handler: GET /api/templates/:id
pub async fn get_template(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
) -> Result<Json<TemplateResponse>, ApiError> {
    Ok(Json(template_response(&state, id)?))
}

/// Handler: DELETE /api/templates/:id
pub async fn delete_template(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.remove_template(id).await?;
    Ok(Json(DeleteResponse { success: true, id }))
}

async fn read_source(state: &AppState, id: TemplateId) -> Result<Vec<u8>, ApiError> {
    let template = state.store.get_template(id)?;
    tokio::fs::read(&template.file_path).await.map_err(|e| {
        FormFillError::Document(format!(
            "stored document for template {} is unavailable: {}",
            id, e
        ))
        .into()
    })
}

/// Handler: GET /api/templates/:id/pdf
pub async fn serve_pdf(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
) -> Result<Response, ApiError> {
    let template = state.store.get_template(id)?;
    let bytes = read_source(&state, id).await?;
    let disposition = format!("inline; filename=\"{}\"", template.filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Handler: GET /api/templates/:id/boxes?page=
pub async fn list_boxes(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
    query: Result<Query<BoxListQuery>, QueryRejection>,
) -> Result<Json<BoxListResponse>, ApiError> {
    let Query(query) = query?;
    let boxes = match query.page {
        Some(page) => state.store.list_boxes_on_page(id, page)?,
        None => state.store.list_boxes(id)?,
    };
    Ok(Json(BoxListResponse::new(boxes)))
}

/// Handler: POST /api/templates/:id/boxes
pub async fn create_box(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
    ApiJson(input): ApiJson<BoxInput>,
) -> Result<(StatusCode, Json<BoundingBox>), ApiError> {
    let created = state.store.create_box(id, BoxPlacement::from(&input))?;
    state.persist(id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Handler: POST /api/templates/:id/boxes/bulk
pub async fn bulk_create_boxes(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
    ApiJson(req): ApiJson<BulkBoxesRequest>,
) -> Result<(StatusCode, Json<BoxListResponse>), ApiError> {
    let placements: Vec<BoxPlacement> = req.boxes.iter().map(BoxPlacement::from).collect();
    let created = state.store.bulk_create_boxes(id, &placements)?;
    state.persist(id).await?;
    Ok((StatusCode::CREATED, Json(BoxListResponse::new(created))))
}

/// Handler: PUT /api/templates/:id/uniform-height
pub async fn set_uniform_height(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
    ApiJson(req): ApiJson<UniformHeightRequest>,
) -> Result<Json<UniformHeightResponse>, ApiError> {
    state.store.set_uniform_height(id, req.height)?;
    state.persist(id).await?;
    Ok(Json(UniformHeightResponse {
        success: true,
        template_id: id,
        height: state.store.uniform_height(id)?,
    }))
}

/// Handler: POST /api/templates/:id/uniform-height/apply
pub async fn apply_uniform_height(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
) -> Result<Json<BoxListResponse>, ApiError> {
    let updated = state.store.apply_uniform_height(id)?;
    state.persist(id).await?;
    Ok(Json(BoxListResponse::new(updated)))
}

/// Handler: GET /api/boxes/:id
pub async fn get_box(
    State(state): State<SharedState>,
    Path(id): Path<BoxId>,
) -> Result<Json<BoundingBox>, ApiError> {
    Ok(Json(state.store.get_box(id)?))
}

/// Handler: PATCH /api/boxes/:id
pub async fn update_box(
    State(state): State<SharedState>,
    Path(id): Path<BoxId>,
    ApiJson(update): ApiJson<BoxUpdate>,
) -> Result<Json<BoundingBox>, ApiError> {
    let updated = state.store.update_box_geometry(id, update)?;
    state.persist(updated.template_id).await?;
    Ok(Json(updated))
}

/// Handler: DELETE /api/boxes/:id
pub async fn delete_box(
    State(state): State<SharedState>,
    Path(id): Path<BoxId>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let removed = state.store.delete_box(id)?;
    state.persist(removed.template_id).await?;
    Ok(Json(DeleteResponse { success: true, id }))
}

/// Handler: POST /api/boxes/:id/select
///
/// Checks that a box can join a new field. Mapped boxes are rejected.
pub async fn select_box(
    State(state): State<SharedState>,
    Path(id): Path<BoxId>,
) -> Result<Json<BoundingBox>, ApiError> {
    Ok(Json(state.store.select_for_field(id)?))
}

/// Handler: GET /api/templates/:id/fields
pub async fn list_fields(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
) -> Result<Json<FieldListResponse>, ApiError> {
    let fields = state.store.list_fields(id)?;
    Ok(Json(FieldListResponse {
        success: true,
        count: fields.len(),
        fields,
    }))
}

/// Handler: POST /api/templates/:id/fields
pub async fn create_field(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
    ApiJson(req): ApiJson<CreateFieldRequest>,
) -> Result<(StatusCode, Json<Field>), ApiError> {
    let value_type = req
        .value_type
        .as_deref()
        .map(str::parse::<ValueType>)
        .transpose()?
        .unwrap_or_default();

    let field = state.store.create_field(
        id,
        NewField {
            name: req.name,
            label: req.label.unwrap_or_default(),
            value_type,
            font_size: req.font_size,
            box_ids: req.box_ids,
        },
    )?;
    state.persist(id).await?;
    Ok((StatusCode::CREATED, Json(field)))
}

/// Handler: GET /api/templates/:id/fields/resolved
pub async fn resolved_fields(
    State(state): State<SharedState>,
    Path(id): Path<TemplateId>,
) -> Result<Json<ResolvedFieldsResponse>, ApiError> {
    let fields = state.store.resolve(id)?;
    Ok(Json(ResolvedFieldsResponse {
        success: true,
        count: fields.len(),
        fields,
    }))
}

/// Handler: GET /api/fields/:id
pub async fn get_field(
    State(state): State<SharedState>,
    Path(id): Path<FieldId>,
) -> Result<Json<Field>, ApiError> {
    Ok(Json(state.store.get_field(id)?))
}

/// Handler: PATCH /api/fields/:id
pub async fn update_field(
    State(state): State<SharedState>,
    Path(id): Path<FieldId>,
    ApiJson(update): ApiJson<FieldUpdate>,
) -> Result<Json<Field>, ApiError> {
    let field = state.store.update_field(id, update)?;
    state.persist(field.template_id).await?;
    Ok(Json(field))
}

/// Handler: DELETE /api/fields/:id
pub async fn delete_field(
    State(state): State<SharedState>,
    Path(id): Path<FieldId>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let removed = state.store.delete_field(id)?;
    state.persist(removed.template_id).await?;
    Ok(Json(DeleteResponse { success: true, id }))
}

/// Handler: GET /api/export/info
pub async fn export_info() -> Json<ExportInfoResponse> {
    Json(ExportInfoResponse::new())
}

/// Handler: POST /api/export/:format
///
/// Responds with the whole filled document or an error, never a partial file.
pub async fn export(
    State(state): State<SharedState>,
    Path(format): Path<String>,
    ApiJson(request): ApiJson<FillRequest>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = format.parse()?;
    let template_id = request.template_id;
    let source = read_source(&state, template_id).await?;

    let worker = Arc::clone(&state);
    let filled = tokio::task::spawn_blocking(move || {
        export_filled(
            &worker.store,
            &source,
            &request,
            format,
            worker.converter.as_ref(),
        )
    })
    .await??;

    let filename = export_filename(format, Utc::now());
    info!(
        "Export of template {} ready as {} ({} bytes)",
        template_id,
        filename,
        filled.bytes.len()
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.mime_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        filled.bytes,
    )
        .into_response())
}
