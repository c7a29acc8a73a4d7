//! Mapping review state machine: `pending → {approved, rejected}`.
//!
//! `update_mapping` is allowed from any state (a rejected mapping may be
//! revisited and re-approved later). `approve_mapping` is the only multi-write
//! operation in the system and runs in a single transaction; re-approving an
//! already-approved mapping is an idempotent no-op so concurrent or retried
//! calls can never create two billable entries for one mapping.

use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::Serialize;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::MappingStatus;
use crate::models::{ProcedureMapping, ProviderProcedure};

const MAPPING_COLUMNS: &str = "id, document_id, extracted_code, extracted_description, \
     extracted_value, extracted_is_periciable, extracted_adults_only, \
     ai_periciable_confidence, ai_adults_only_confidence, ai_reasoning, \
     mapped_procedure_base_id, mapped_provider_procedure_id, status, notes, \
     reviewed_by, reviewed_at, created_at";

// `m.`-qualified copy for joins against procedure_bases, which shares the
// id/code/description column names.
const MAPPING_COLUMNS_QUALIFIED: &str =
    "m.id, m.document_id, m.extracted_code, m.extracted_description, \
     m.extracted_value, m.extracted_is_periciable, m.extracted_adults_only, \
     m.ai_periciable_confidence, m.ai_adults_only_confidence, m.ai_reasoning, \
     m.mapped_procedure_base_id, m.mapped_provider_procedure_id, m.status, m.notes, \
     m.reviewed_by, m.reviewed_at, m.created_at";

/// Partial update from the review screen. Unset classification overrides
/// preserve the stored value (coalesce semantics); an unset status resets
/// the mapping to `pending`.
#[derive(Debug, Default, Clone)]
pub struct MappingUpdate {
    pub mapped_procedure_base_id: Option<Uuid>,
    pub status: Option<MappingStatus>,
    pub notes: Option<String>,
    pub extracted_is_periciable: Option<bool>,
    pub extracted_adults_only: Option<bool>,
    pub reviewer: Option<Uuid>,
}

/// A mapping joined with canonical-catalog display fields.
///
/// `extracted_adults_only` is backfilled at read time for legacy rows:
/// the matched base's flag, or `false` with no match. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MappingView {
    #[serde(flatten)]
    pub mapping: ProcedureMapping,
    pub mapped_base_code: Option<String>,
    pub mapped_base_description: Option<String>,
}

pub fn insert_mapping(conn: &Connection, mapping: &ProcedureMapping) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO procedure_mappings (id, document_id, extracted_code, extracted_description,
         extracted_value, extracted_is_periciable, extracted_adults_only,
         ai_periciable_confidence, ai_adults_only_confidence, ai_reasoning,
         mapped_procedure_base_id, mapped_provider_procedure_id, status, notes,
         reviewed_by, reviewed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            mapping.id.to_string(),
            mapping.document_id.to_string(),
            mapping.extracted_code,
            mapping.extracted_description,
            mapping.extracted_value,
            mapping.extracted_is_periciable.map(|b| b as i32),
            mapping.extracted_adults_only.map(|b| b as i32),
            mapping.ai_periciable_confidence,
            mapping.ai_adults_only_confidence,
            mapping.ai_reasoning,
            mapping.mapped_procedure_base_id.map(|id| id.to_string()),
            mapping.mapped_provider_procedure_id.map(|id| id.to_string()),
            mapping.status.as_str(),
            mapping.notes,
            mapping.reviewed_by.map(|id| id.to_string()),
            mapping
                .reviewed_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
            mapping.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_mapping(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<ProcedureMapping>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MAPPING_COLUMNS} FROM procedure_mappings WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id.to_string()], read_row);

    match result {
        Ok(row) => Ok(Some(mapping_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List a document's mappings joined with canonical display fields,
/// in extraction order (insertion order).
pub fn list_mappings_for_document(
    conn: &Connection,
    document_id: &Uuid,
) -> Result<Vec<MappingView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MAPPING_COLUMNS_QUALIFIED}, b.code, b.description, b.adults_only
         FROM procedure_mappings m LEFT JOIN procedure_bases b
           ON m.mapped_procedure_base_id = b.id
         WHERE m.document_id = ?1 ORDER BY m.rowid"
    ))?;

    let rows = stmt.query_map(params![document_id.to_string()], |row| {
        let mapping = read_row(row)?;
        let base_code: Option<String> = row.get(17)?;
        let base_description: Option<String> = row.get(18)?;
        let base_adults_only: Option<i32> = row.get(19)?;
        Ok((mapping, base_code, base_description, base_adults_only))
    })?;

    let mut views = Vec::new();
    for row in rows {
        let (raw, base_code, base_description, base_adults_only) = row?;
        let mut mapping = mapping_from_row(raw)?;
        if mapping.extracted_adults_only.is_none() {
            // Read-time backfill for legacy rows; intentionally not persisted.
            mapping.extracted_adults_only = Some(base_adults_only.map(|v| v != 0).unwrap_or(false));
        }
        views.push(MappingView {
            mapping,
            mapped_base_code: base_code,
            mapped_base_description: base_description,
        });
    }
    Ok(views)
}

/// Partial update, always stamping reviewer + timestamp.
pub fn update_mapping(
    conn: &Connection,
    id: &Uuid,
    update: &MappingUpdate,
) -> Result<ProcedureMapping, DatabaseError> {
    let status = update.status.unwrap_or(MappingStatus::Pending);
    let rows = conn.execute(
        "UPDATE procedure_mappings SET
         mapped_procedure_base_id = COALESCE(?2, mapped_procedure_base_id),
         status = ?3,
         notes = COALESCE(?4, notes),
         extracted_is_periciable = COALESCE(?5, extracted_is_periciable),
         extracted_adults_only = COALESCE(?6, extracted_adults_only),
         reviewed_by = ?7,
         reviewed_at = datetime('now')
         WHERE id = ?1",
        params![
            id.to_string(),
            update.mapped_procedure_base_id.map(|v| v.to_string()),
            status.as_str(),
            update.notes,
            update.extracted_is_periciable.map(|b| b as i32),
            update.extracted_adults_only.map(|b| b as i32),
            update.reviewer.map(|v| v.to_string()),
        ],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "ProcedureMapping".into(),
            id: id.to_string(),
        });
    }
    get_mapping(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "ProcedureMapping".into(),
        id: id.to_string(),
    })
}

/// Overwrite the AI verdict columns on a mapping (re-classification).
/// Review state and manual overrides are untouched.
pub fn update_mapping_classification(
    conn: &Connection,
    id: &Uuid,
    periciable: bool,
    adults_only: bool,
    periciable_confidence: f64,
    adults_only_confidence: f64,
    reasoning: Option<&str>,
) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE procedure_mappings SET
         extracted_is_periciable = ?2,
         extracted_adults_only = ?3,
         ai_periciable_confidence = ?4,
         ai_adults_only_confidence = ?5,
         ai_reasoning = ?6
         WHERE id = ?1",
        params![
            id.to_string(),
            periciable as i32,
            adults_only as i32,
            periciable_confidence,
            adults_only_confidence,
            reasoning,
        ],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "ProcedureMapping".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Outcome of an approval call.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub mapping_id: Uuid,
    pub provider_procedure_id: Uuid,
    /// True when the mapping was already approved and no writes happened.
    pub already_approved: bool,
}

/// Approve a mapping: create the billable provider procedure from the
/// mapping's extracted fields and mark the mapping approved, atomically.
///
/// The canonical link may be null — approval does not require a match.
/// Re-approving returns the existing provider procedure id without writing.
pub fn approve_mapping(
    conn: &mut Connection,
    mapping_id: &Uuid,
    provider_id: &Uuid,
    reviewer: Option<&Uuid>,
) -> Result<ApprovalOutcome, DatabaseError> {
    let tx = conn.transaction()?;

    let mapping = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {MAPPING_COLUMNS} FROM procedure_mappings WHERE id = ?1"
        ))?;
        let result = stmt.query_row(params![mapping_id.to_string()], read_row);
        match result {
            Ok(row) => mapping_from_row(row)?,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(DatabaseError::NotFound {
                    entity_type: "ProcedureMapping".into(),
                    id: mapping_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
    };

    // Idempotency guard: a mapping creates at most one provider procedure.
    if mapping.status == MappingStatus::Approved {
        if let Some(existing) = mapping.mapped_provider_procedure_id {
            return Ok(ApprovalOutcome {
                mapping_id: *mapping_id,
                provider_procedure_id: existing,
                already_approved: true,
            });
        }
    }

    let proc_ = ProviderProcedure {
        id: Uuid::new_v4(),
        provider_id: *provider_id,
        procedure_base_id: mapping.mapped_procedure_base_id,
        code: mapping.extracted_code.clone(),
        description: mapping.extracted_description.clone(),
        periciable: mapping.extracted_is_periciable.unwrap_or(false),
        max_value: mapping.extracted_value,
        active: true,
        created_at: chrono::Utc::now().naive_utc(),
    };

    super::procedure::insert_provider_procedure(&tx, &proc_)?;

    tx.execute(
        "UPDATE procedure_mappings SET status = ?2, mapped_provider_procedure_id = ?3,
         reviewed_by = ?4, reviewed_at = datetime('now')
         WHERE id = ?1",
        params![
            mapping_id.to_string(),
            MappingStatus::Approved.as_str(),
            proc_.id.to_string(),
            reviewer.map(|v| v.to_string()),
        ],
    )?;

    tx.commit()?;

    Ok(ApprovalOutcome {
        mapping_id: *mapping_id,
        provider_procedure_id: proc_.id,
        already_approved: false,
    })
}

// Internal row type for mapping rows
struct MappingRow {
    id: String,
    document_id: String,
    extracted_code: String,
    extracted_description: String,
    extracted_value: Option<f64>,
    extracted_is_periciable: Option<i32>,
    extracted_adults_only: Option<i32>,
    ai_periciable_confidence: Option<f64>,
    ai_adults_only_confidence: Option<f64>,
    ai_reasoning: Option<String>,
    mapped_procedure_base_id: Option<String>,
    mapped_provider_procedure_id: Option<String>,
    status: String,
    notes: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    created_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MappingRow> {
    Ok(MappingRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        extracted_code: row.get(2)?,
        extracted_description: row.get(3)?,
        extracted_value: row.get(4)?,
        extracted_is_periciable: row.get(5)?,
        extracted_adults_only: row.get(6)?,
        ai_periciable_confidence: row.get(7)?,
        ai_adults_only_confidence: row.get(8)?,
        ai_reasoning: row.get(9)?,
        mapped_procedure_base_id: row.get(10)?,
        mapped_provider_procedure_id: row.get(11)?,
        status: row.get(12)?,
        notes: row.get(13)?,
        reviewed_by: row.get(14)?,
        reviewed_at: row.get(15)?,
        created_at: row.get(16)?,
    })
}

fn parse_timestamp(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .unwrap_or_default()
}

fn mapping_from_row(row: MappingRow) -> Result<ProcedureMapping, DatabaseError> {
    Ok(ProcedureMapping {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        document_id: Uuid::parse_str(&row.document_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        extracted_code: row.extracted_code,
        extracted_description: row.extracted_description,
        extracted_value: row.extracted_value,
        extracted_is_periciable: row.extracted_is_periciable.map(|v| v != 0),
        extracted_adults_only: row.extracted_adults_only.map(|v| v != 0),
        ai_periciable_confidence: row.ai_periciable_confidence,
        ai_adults_only_confidence: row.ai_adults_only_confidence,
        ai_reasoning: row.ai_reasoning,
        mapped_procedure_base_id: row
            .mapped_procedure_base_id
            .and_then(|s| Uuid::parse_str(&s).ok()),
        mapped_provider_procedure_id: row
            .mapped_provider_procedure_id
            .and_then(|s| Uuid::parse_str(&s).ok()),
        status: MappingStatus::from_str(&row.status)?,
        notes: row.notes,
        reviewed_by: row.reviewed_by.and_then(|s| Uuid::parse_str(&s).ok()),
        reviewed_at: row.reviewed_at.as_deref().map(parse_timestamp),
        created_at: parse_timestamp(&row.created_at),
    })
}
