use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::MappingStatus;

/// One extracted code under review against the canonical catalog.
///
/// Owned by the Document that produced it. `mapped_provider_procedure_id`
/// is set exactly once, on approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureMapping {
    pub id: Uuid,
    pub document_id: Uuid,
    pub extracted_code: String,
    pub extracted_description: String,
    pub extracted_value: Option<f64>,
    pub extracted_is_periciable: Option<bool>,
    pub extracted_adults_only: Option<bool>,
    pub ai_periciable_confidence: Option<f64>,
    pub ai_adults_only_confidence: Option<f64>,
    pub ai_reasoning: Option<String>,
    pub mapped_procedure_base_id: Option<Uuid>,
    pub mapped_provider_procedure_id: Option<Uuid>,
    pub status: MappingStatus,
    pub notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}
