use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::{ProcessingStage, ProcessingStatus};
use crate::models::Document;

const DOCUMENT_COLUMNS: &str = "id, provider_id, clinic_id, original_filename, size_bytes, \
     mime_type, storage_path, processed, processing_status, processing_progress, \
     processing_stage, extracted_data, created_by, created_at, updated_at";

pub fn insert_document(conn: &Connection, doc: &Document) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (id, provider_id, clinic_id, original_filename, size_bytes,
         mime_type, storage_path, processed, processing_status, processing_progress,
         processing_stage, extracted_data, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            doc.id.to_string(),
            doc.provider_id.to_string(),
            doc.clinic_id.to_string(),
            doc.original_filename,
            doc.size_bytes,
            doc.mime_type,
            doc.storage_path,
            doc.processed as i32,
            doc.processing_status.as_str(),
            doc.processing_progress as i64,
            doc.processing_stage.as_str(),
            doc.extracted_data.as_ref().map(|v| v.to_string()),
            doc.created_by.map(|id| id.to_string()),
            doc.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            doc.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_document(conn: &Connection, id: &Uuid) -> Result<Option<Document>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id.to_string()], read_row);

    match result {
        Ok(row) => Ok(Some(document_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List a provider's documents, newest first. `clinic_id` narrows the list
/// when given (the review UI shows one clinic at a time).
pub fn list_documents(
    conn: &Connection,
    provider_id: &Uuid,
    clinic_id: Option<&Uuid>,
) -> Result<Vec<Document>, DatabaseError> {
    let mut docs = Vec::new();
    match clinic_id {
        Some(clinic) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE provider_id = ?1 AND clinic_id = ?2 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(
                params![provider_id.to_string(), clinic.to_string()],
                read_row,
            )?;
            for row in rows {
                docs.push(document_from_row(row?)?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents
                 WHERE provider_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![provider_id.to_string()], read_row)?;
            for row in rows {
                docs.push(document_from_row(row?)?);
            }
        }
    }
    Ok(docs)
}

/// Update progress, stage and status in one write (last write wins).
pub fn update_processing_state(
    conn: &Connection,
    document_id: &Uuid,
    progress: u8,
    stage: ProcessingStage,
    status: ProcessingStatus,
) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET processing_progress = ?2, processing_stage = ?3,
         processing_status = ?4, updated_at = datetime('now') WHERE id = ?1",
        params![
            document_id.to_string(),
            progress.min(100) as i64,
            stage.as_str(),
            status.as_str(),
        ],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: document_id.to_string(),
        });
    }
    Ok(())
}

/// Persist the extracted payload (or error payload) and the terminal flags.
pub fn finish_document(
    conn: &Connection,
    document_id: &Uuid,
    status: ProcessingStatus,
    stage: ProcessingStage,
    extracted_data: &serde_json::Value,
) -> Result<(), DatabaseError> {
    let processed = status == ProcessingStatus::Completed;
    let progress: i64 = if processed { 100 } else { 0 };
    let rows = conn.execute(
        "UPDATE documents SET processed = ?2, processing_status = ?3, processing_stage = ?4,
         processing_progress = ?5, extracted_data = ?6, updated_at = datetime('now')
         WHERE id = ?1",
        params![
            document_id.to_string(),
            processed as i32,
            status.as_str(),
            stage.as_str(),
            progress,
            extracted_data.to_string(),
        ],
    )?;
    if rows == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: document_id.to_string(),
        });
    }
    Ok(())
}

// Internal row type for Document mapping
struct DocumentRow {
    id: String,
    provider_id: String,
    clinic_id: String,
    original_filename: String,
    size_bytes: i64,
    mime_type: String,
    storage_path: String,
    processed: i32,
    processing_status: String,
    processing_progress: i64,
    processing_stage: String,
    extracted_data: Option<String>,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        clinic_id: row.get(2)?,
        original_filename: row.get(3)?,
        size_bytes: row.get(4)?,
        mime_type: row.get(5)?,
        storage_path: row.get(6)?,
        processed: row.get(7)?,
        processing_status: row.get(8)?,
        processing_progress: row.get(9)?,
        processing_stage: row.get(10)?,
        extracted_data: row.get(11)?,
        created_by: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn parse_timestamp(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .unwrap_or_default()
}

fn document_from_row(row: DocumentRow) -> Result<Document, DatabaseError> {
    Ok(Document {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        provider_id: Uuid::parse_str(&row.provider_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        clinic_id: Uuid::parse_str(&row.clinic_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        original_filename: row.original_filename,
        size_bytes: row.size_bytes,
        mime_type: row.mime_type,
        storage_path: row.storage_path,
        processed: row.processed != 0,
        processing_status: ProcessingStatus::from_str(&row.processing_status)?,
        processing_progress: row.processing_progress.clamp(0, 100) as u8,
        processing_stage: ProcessingStage::from_str(&row.processing_stage)?,
        extracted_data: row
            .extracted_data
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok()),
        created_by: row.created_by.and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn sample_document() -> Document {
        let now = chrono::Utc::now().naive_utc();
        Document {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            original_filename: "tabela_2025.pdf".into(),
            size_bytes: 123_456,
            mime_type: "application/pdf".into(),
            storage_path: "/tmp/docs/abc.pdf".into(),
            processed: false,
            processing_status: ProcessingStatus::Processing,
            processing_progress: 0,
            processing_stage: ProcessingStage::Uploaded,
            extracted_data: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let conn = open_memory_database().unwrap();
        let doc = sample_document();
        insert_document(&conn, &doc).unwrap();

        let loaded = get_document(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(loaded.id, doc.id);
        assert_eq!(loaded.original_filename, "tabela_2025.pdf");
        assert_eq!(loaded.processing_status, ProcessingStatus::Processing);
        assert_eq!(loaded.processing_stage, ProcessingStage::Uploaded);
        assert!(loaded.extracted_data.is_none());
    }

    #[test]
    fn get_unknown_document_returns_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_document(&conn, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn update_processing_state_persists() {
        let conn = open_memory_database().unwrap();
        let doc = sample_document();
        insert_document(&conn, &doc).unwrap();

        update_processing_state(
            &conn,
            &doc.id,
            45,
            ProcessingStage::Extracting,
            ProcessingStatus::Processing,
        )
        .unwrap();

        let loaded = get_document(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(loaded.processing_progress, 45);
        assert_eq!(loaded.processing_stage, ProcessingStage::Extracting);
    }

    #[test]
    fn update_processing_state_unknown_id_errors() {
        let conn = open_memory_database().unwrap();
        let err = update_processing_state(
            &conn,
            &Uuid::new_v4(),
            10,
            ProcessingStage::Converting,
            ProcessingStatus::Processing,
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn progress_is_capped_at_100() {
        let conn = open_memory_database().unwrap();
        let doc = sample_document();
        insert_document(&conn, &doc).unwrap();

        update_processing_state(
            &conn,
            &doc.id,
            255,
            ProcessingStage::Saving,
            ProcessingStatus::Processing,
        )
        .unwrap();

        let loaded = get_document(&conn, &doc.id).unwrap().unwrap();
        assert_eq!(loaded.processing_progress, 100);
    }

    #[test]
    fn finish_document_completed_sets_terminal_flags() {
        let conn = open_memory_database().unwrap();
        let doc = sample_document();
        insert_document(&conn, &doc).unwrap();

        let payload = serde_json::json!({"procedures": [], "page_count": 0});
        finish_document(
            &conn,
            &doc.id,
            ProcessingStatus::Completed,
            ProcessingStage::Completed,
            &payload,
        )
        .unwrap();

        let loaded = get_document(&conn, &doc.id).unwrap().unwrap();
        assert!(loaded.processed);
        assert_eq!(loaded.processing_progress, 100);
        assert_eq!(loaded.processing_status, ProcessingStatus::Completed);
        assert_eq!(loaded.extracted_data.unwrap()["page_count"], 0);
    }

    #[test]
    fn finish_document_failed_keeps_error_payload() {
        let conn = open_memory_database().unwrap();
        let doc = sample_document();
        insert_document(&conn, &doc).unwrap();

        let payload = serde_json::json!({
            "error": "Invalid PDF bytes",
            "stack": "render_page: not a PDF header",
            "timestamp": "2025-04-01T10:00:00Z",
        });
        finish_document(
            &conn,
            &doc.id,
            ProcessingStatus::Failed,
            ProcessingStage::Failed,
            &payload,
        )
        .unwrap();

        let loaded = get_document(&conn, &doc.id).unwrap().unwrap();
        assert!(!loaded.processed);
        assert_eq!(loaded.processing_status, ProcessingStatus::Failed);
        assert_eq!(loaded.processing_stage, ProcessingStage::Failed);
        assert_eq!(loaded.extracted_data.unwrap()["error"], "Invalid PDF bytes");
    }

    #[test]
    fn list_documents_filters_by_clinic() {
        let conn = open_memory_database().unwrap();
        let mut doc_a = sample_document();
        let mut doc_b = sample_document();
        doc_b.provider_id = doc_a.provider_id;
        doc_b.clinic_id = Uuid::new_v4();
        doc_a.created_at -= chrono::Duration::seconds(5);
        insert_document(&conn, &doc_a).unwrap();
        insert_document(&conn, &doc_b).unwrap();

        let all = list_documents(&conn, &doc_a.provider_id, None).unwrap();
        assert_eq!(all.len(), 2);

        let one = list_documents(&conn, &doc_a.provider_id, Some(&doc_b.clinic_id)).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, doc_b.id);
    }
}
