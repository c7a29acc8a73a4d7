use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ProcessingStage, ProcessingStatus};

/// One uploaded procedure-table PDF and its pipeline state.
///
/// Mutated only by the pipeline (progress / stage / status / extracted_data)
/// until terminal; re-processing always goes through a new Document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub clinic_id: Uuid,
    pub original_filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
    pub processed: bool,
    pub processing_status: ProcessingStatus,
    pub processing_progress: u8,
    pub processing_stage: ProcessingStage,
    /// Extracted procedure set (JSON) once the pipeline completes, or an
    /// error payload `{error, stack, timestamp}` on terminal failure.
    pub extracted_data: Option<serde_json::Value>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
