//! Mapping review endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::db::repository::{self, ApprovalOutcome, MappingUpdate, MappingView};
use crate::models::enums::MappingStatus;
use crate::models::ProcedureMapping;

/// `GET /api/documents/:id/mappings`
///
/// Returns the document's mappings in extraction order, joined with the
/// canonical catalog entry where one is matched.
pub async fn list_for_document(
    State(ctx): State<ApiContext>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<Vec<MappingView>>, ApiError> {
    let conn = ctx.open_db()?;
    repository::get_document(&conn, &document_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Document {document_id} not found")))?;
    let mappings = repository::list_mappings_for_document(&conn, &document_id)?;
    Ok(Json(mappings))
}

#[derive(Deserialize)]
pub struct UpdateMappingRequest {
    pub mapped_procedure_base_id: Option<Uuid>,
    pub status: Option<MappingStatus>,
    pub notes: Option<String>,
    pub extracted_is_periciable: Option<bool>,
    pub extracted_adults_only: Option<bool>,
    pub reviewer_id: Option<Uuid>,
}

/// `PATCH /api/mappings/:id` — partial review update. Omitted fields keep
/// their stored values; an omitted status resets the mapping to pending.
pub async fn update(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateMappingRequest>,
) -> Result<Json<ProcedureMapping>, ApiError> {
    let conn = ctx.open_db()?;
    let update = MappingUpdate {
        mapped_procedure_base_id: body.mapped_procedure_base_id,
        status: body.status,
        notes: body.notes,
        extracted_is_periciable: body.extracted_is_periciable,
        extracted_adults_only: body.extracted_adults_only,
        reviewer: body.reviewer_id,
    };
    let mapping = repository::update_mapping(&conn, &id, &update)?;
    tracing::info!(mapping_id = %id, status = mapping.status.as_str(), "Mapping updated");
    Ok(Json(mapping))
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    pub provider_id: Uuid,
    pub reviewer_id: Option<Uuid>,
}

/// `POST /api/mappings/:id/approve` — turn a reviewed mapping into a
/// billable provider procedure. Idempotent: re-approving returns the
/// existing procedure id.
pub async fn approve(
    State(ctx): State<ApiContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<ApprovalOutcome>, ApiError> {
    let mut conn = ctx.open_db()?;
    let outcome = repository::approve_mapping(
        &mut conn,
        &id,
        &body.provider_id,
        body.reviewer_id.as_ref(),
    )?;
    if !outcome.already_approved {
        tracing::info!(
            mapping_id = %id,
            provider_procedure_id = %outcome.provider_procedure_id,
            "Mapping approved"
        );
    }
    Ok(Json(outcome))
}
