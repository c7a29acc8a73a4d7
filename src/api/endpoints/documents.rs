//! Document endpoints — upload, status polling, listing, reclassification.
//!
//! `POST /api/documents` accepts the PDF as multipart form data, persists
//! the file and the document row, then dispatches the pipeline to a
//! blocking worker and returns immediately. Clients poll the status
//! endpoint to follow the run.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::db::repository;
use crate::models::enums::{ProcessingStage, ProcessingStatus};
use crate::models::Document;
use crate::pipeline::runner::{classify_document, run_pipeline};
use crate::storage;

/// Upload size limit (10 MiB).
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Serialize)]
pub struct UploadResponse {
    pub document_id: Uuid,
    pub status: &'static str,
}

/// `POST /api/documents` — multipart upload.
///
/// Expected parts: `file` (the PDF), `provider_id`, `clinic_id`, and an
/// optional `created_by`.
pub async fn upload(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_filename = String::from("document.pdf");
    let mut mime_type = String::new();
    let mut provider_id: Option<Uuid> = None;
    let mut clinic_id: Option<Uuid> = None;
    let mut created_by: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                if let Some(name) = field.file_name() {
                    original_filename = storage::sanitize_filename(name);
                }
                mime_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {e}")))?;
                file_bytes = Some(bytes.to_vec());
            }
            "provider_id" => provider_id = Some(parse_uuid_field(field, "provider_id").await?),
            "clinic_id" => clinic_id = Some(parse_uuid_field(field, "clinic_id").await?),
            "created_by" => created_by = Some(parse_uuid_field(field, "created_by").await?),
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| ApiError::BadRequest("Missing file part".into()))?;
    let provider_id =
        provider_id.ok_or_else(|| ApiError::BadRequest("Missing provider_id".into()))?;
    let clinic_id = clinic_id.ok_or_else(|| ApiError::BadRequest("Missing clinic_id".into()))?;

    if file_bytes.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }
    if file_bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::BadRequest(format!(
            "File exceeds 10 MiB limit ({} bytes)",
            file_bytes.len()
        )));
    }
    if mime_type != "application/pdf" {
        return Err(ApiError::BadRequest(format!(
            "Only PDF uploads are accepted (got {mime_type:?})"
        )));
    }

    let document_id = Uuid::new_v4();
    let storage_path = storage::save_document(&ctx.documents_dir, &document_id, &file_bytes)
        .map_err(|e| ApiError::Internal(format!("Failed to store upload: {e}")))?;

    let now = chrono::Utc::now().naive_utc();
    let document = Document {
        id: document_id,
        provider_id,
        clinic_id,
        original_filename,
        size_bytes: file_bytes.len() as i64,
        mime_type,
        storage_path: storage_path.to_string_lossy().to_string(),
        processed: false,
        processing_status: ProcessingStatus::Processing,
        processing_progress: 5,
        processing_stage: ProcessingStage::Uploaded,
        extracted_data: None,
        created_by,
        created_at: now,
        updated_at: now,
    };

    {
        let conn = ctx.open_db()?;
        repository::insert_document(&conn, &document)?;
    }

    tracing::info!(
        document_id = %document_id,
        provider_id = %provider_id,
        size_bytes = document.size_bytes,
        "Document uploaded, dispatching pipeline"
    );

    // Detached: the upload response never waits on OCR or the LLM.
    let task_ctx = ctx.clone();
    tokio::task::spawn_blocking(move || {
        let conn = match crate::db::sqlite::open_database(&task_ctx.db_path) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(document_id = %document_id, error = %e, "Pipeline could not open database");
                return;
            }
        };
        if let Err(e) = run_pipeline(&conn, &document_id, &task_ctx.engines) {
            tracing::error!(document_id = %document_id, error = %e, "Pipeline run aborted");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document_id,
            status: "processing",
        }),
    ))
}

async fn parse_uuid_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<Uuid, ApiError> {
    let text = field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read {name}: {e}")))?;
    Uuid::parse_str(text.trim())
        .map_err(|_| ApiError::BadRequest(format!("{name} is not a valid UUID")))
}

/// `GET /api/documents/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>, ApiError> {
    let conn = ctx.open_db()?;
    let document = repository::get_document(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))?;
    Ok(Json(document))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub document_id: Uuid,
    pub status: ProcessingStatus,
    pub progress: u8,
    pub stage: ProcessingStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /api/documents/:id/status` — the polling endpoint.
pub async fn status(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let document = repository::get_document(&conn, &id)?
        .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))?;

    let error = if document.processing_status == ProcessingStatus::Failed {
        document
            .extracted_data
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    } else {
        None
    };

    Ok(Json(StatusResponse {
        document_id: document.id,
        status: document.processing_status,
        progress: document.processing_progress,
        stage: document.processing_stage,
        error,
    }))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub provider_id: Uuid,
    pub clinic_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub documents: Vec<Document>,
}

/// `GET /api/documents?provider_id=...&clinic_id=...`
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let conn = ctx.open_db()?;
    let documents =
        repository::list_documents(&conn, &query.provider_id, query.clinic_id.as_ref())?;
    Ok(Json(ListResponse { documents }))
}

#[derive(Serialize)]
pub struct ClassifyResponse {
    pub document_id: Uuid,
    pub reclassified: usize,
}

/// `POST /api/documents/:id/classify` — re-run AI classification over a
/// completed document's mappings. 409 while the pipeline is still running
/// or after a failed run.
pub async fn classify(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    {
        let conn = ctx.open_db()?;
        let document = repository::get_document(&conn, &id)?
            .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))?;
        if document.processing_status != ProcessingStatus::Completed {
            return Err(ApiError::Conflict(format!(
                "Document is {}, classification needs a completed document",
                document.processing_status.as_str()
            )));
        }
    }

    // Classification talks to the LLM — keep it off the async runtime.
    let task_ctx = ctx.clone();
    let reclassified = tokio::task::spawn_blocking(move || {
        let conn = task_ctx.open_db()?;
        classify_document(&conn, &id, &task_ctx.engines.reasoning).map_err(|e| match e {
            crate::pipeline::PipelineError::ReasoningUnavailable(reason) => {
                ApiError::ReasoningUnavailable(reason)
            }
            other => ApiError::Internal(other.to_string()),
        })
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Classification task panicked: {e}")))??;

    Ok(Json(ClassifyResponse {
        document_id: id,
        reclassified,
    }))
}
