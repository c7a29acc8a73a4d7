use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical catalog entry. Read-only from this service's point of view:
/// rows are seeded by an external catalog sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureBase {
    pub id: Uuid,
    pub code: String,
    pub description: String,
    pub adults_only: bool,
}

/// The clinic-billable entry created when a mapping is approved.
///
/// Independently owned by the provider; outlives the source Document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProcedure {
    pub id: Uuid,
    pub provider_id: Uuid,
    /// Canonical link — nullable, a mapping may be approved with no match.
    pub procedure_base_id: Option<Uuid>,
    pub code: String,
    pub description: String,
    pub periciable: bool,
    pub max_value: Option<f64>,
    pub active: bool,
    pub created_at: NaiveDateTime,
}
