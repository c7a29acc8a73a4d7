//! Pipeline orchestrator.
//!
//! Drives one uploaded document end to end: render pages → OCR → per-page
//! extraction → cross-page dedup → classification → mapping rows. Progress
//! and stage land in the documents table after every step so a polling
//! client sees the run advance.
//!
//! Failure policy: anything that dooms the whole document (unreadable PDF,
//! no reasoning model) marks it failed with an error payload. Per-page
//! trouble (render, OCR, extraction) skips the page with a warning and the
//! run continues; a document whose pages all come up empty still completes,
//! with zero mappings.

use std::sync::Arc;

use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository;
use crate::models::enums::{MappingStatus, ProcessingStage, ProcessingStatus};
use crate::models::ProcedureMapping;
use crate::pipeline::classify::classify_procedures;
use crate::pipeline::dedup::dedup_procedures;
use crate::pipeline::extract::extract_procedures_from_page;
use crate::pipeline::llm::ReasoningService;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::render::PdfPageRenderer;
use crate::pipeline::types::{Classification, ExtractedProcedure, ExtractionSummary};
use crate::pipeline::PipelineError;

/// Pages whose OCR text comes back shorter than this are treated as blank
/// (cover pages, separators, failed scans) and skipped.
const MIN_PAGE_TEXT_CHARS: usize = 50;

/// Extraction spans progress 20..80; the remaining steps get fixed marks.
const EXTRACT_PROGRESS_BASE: u8 = 20;
const EXTRACT_PROGRESS_SPAN: usize = 60;

/// Engine bundle handed to every pipeline run. All trait objects so tests
/// swap in mocks.
#[derive(Clone)]
pub struct PipelineEngines {
    pub renderer: Arc<dyn PdfPageRenderer>,
    pub ocr: Arc<dyn OcrEngine>,
    pub reasoning: Arc<ReasoningService>,
}

/// Process one uploaded document. Expects the document row to exist with
/// its PDF already on disk at `storage_path`.
///
/// Returns `Err` only for database failures; pipeline-level problems are
/// recorded on the document itself.
pub fn run_pipeline(
    conn: &Connection,
    document_id: &Uuid,
    engines: &PipelineEngines,
) -> Result<(), PipelineError> {
    let _span = tracing::info_span!("pipeline_run", document_id = %document_id).entered();
    let start = std::time::Instant::now();

    let document = repository::get_document(conn, document_id)?.ok_or_else(|| {
        crate::db::DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: document_id.to_string(),
        }
    })?;

    let (client, model) = match engines.reasoning.as_ref() {
        ReasoningService::Available { client, model } => (client.clone(), model.clone()),
        ReasoningService::Unavailable { reason } => {
            tracing::error!(reason = %reason, "No reasoning model, failing document");
            return fail_document(
                conn,
                document_id,
                &format!("Reasoning model unavailable: {reason}"),
                reason,
            );
        }
    };

    let pdf_bytes = match std::fs::read(&document.storage_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return fail_document(
                conn,
                document_id,
                &format!("Cannot read stored file: {e}"),
                &format!("read {}: {e}", document.storage_path),
            );
        }
    };

    set_progress(conn, document_id, 10, ProcessingStage::Converting);

    let page_count = match engines.renderer.page_count(&pdf_bytes) {
        Ok(n) => n,
        Err(e) => {
            return fail_document(
                conn,
                document_id,
                &format!("Cannot open PDF: {e}"),
                &format!("page_count: {e}"),
            );
        }
    };
    if page_count == 0 {
        return fail_document(conn, document_id, "PDF has no pages", "page_count: 0");
    }

    let mut procedures: Vec<ExtractedProcedure> = Vec::new();
    let mut pages_failed = 0usize;

    for page in 0..page_count {
        let progress =
            EXTRACT_PROGRESS_BASE + (page * EXTRACT_PROGRESS_SPAN / page_count) as u8;
        set_progress(conn, document_id, progress, ProcessingStage::Extracting);

        match extract_page(&*engines.ocr, &*engines.renderer, &*client, &model, &pdf_bytes, page) {
            Ok(Some(page_procedures)) => {
                tracing::debug!(
                    page,
                    rows = page_procedures.len(),
                    "Page extraction complete"
                );
                procedures.extend(page_procedures);
            }
            Ok(None) => pages_failed += 1,
            Err(e) => {
                tracing::warn!(page, error = %e, "Page failed, skipping");
                pages_failed += 1;
            }
        }
    }

    let extracted_count = procedures.len();
    set_progress(conn, document_id, 85, ProcessingStage::Deduplicating);
    let procedures = dedup_procedures(procedures);

    let verdicts = classify_procedures(&*client, &model, &procedures);

    set_progress(conn, document_id, 95, ProcessingStage::Saving);
    for (procedure, verdict) in procedures.iter().zip(&verdicts) {
        repository::insert_mapping(conn, &build_mapping(document_id, procedure, verdict))?;
    }

    let summary = ExtractionSummary {
        page_count,
        pages_ocr_failed: pages_failed,
        procedures_extracted: extracted_count,
        procedures_after_dedup: procedures.len(),
    };
    // The persisted procedure list carries each AI verdict alongside the
    // extracted fields so the payload is self-contained for later export.
    let procedures_json: Vec<serde_json::Value> = procedures
        .iter()
        .zip(&verdicts)
        .map(|(procedure, verdict)| {
            let mut entry = serde_json::to_value(procedure).unwrap_or_default();
            if let Some(map) = entry.as_object_mut() {
                map.insert(
                    "classification".into(),
                    serde_json::to_value(verdict).unwrap_or_default(),
                );
            }
            entry
        })
        .collect();
    let mut payload = serde_json::to_value(&summary).unwrap_or_default();
    if let Some(map) = payload.as_object_mut() {
        map.insert("procedures".into(), serde_json::Value::Array(procedures_json));
    }
    repository::finish_document(
        conn,
        document_id,
        ProcessingStatus::Completed,
        ProcessingStage::Completed,
        &payload,
    )?;

    tracing::info!(
        document_id = %document_id,
        pages = page_count,
        pages_failed,
        procedures = procedures.len(),
        elapsed_ms = %start.elapsed().as_millis(),
        "Pipeline run complete"
    );
    Ok(())
}

/// Render, OCR and extract one page. `Ok(None)` means the page was skipped
/// as blank.
fn extract_page(
    ocr: &dyn OcrEngine,
    renderer: &dyn PdfPageRenderer,
    client: &dyn crate::pipeline::llm::LlmClient,
    model: &str,
    pdf_bytes: &[u8],
    page: usize,
) -> Result<Option<Vec<ExtractedProcedure>>, PipelineError> {
    let png = renderer.render_page(pdf_bytes, page)?;
    let text = ocr.recognize(&png)?;

    if text.chars().count() < MIN_PAGE_TEXT_CHARS {
        tracing::debug!(page, text_len = text.len(), "Page text too short, skipping");
        return Ok(None);
    }

    let procedures = extract_procedures_from_page(client, model, &text)?;
    Ok(Some(procedures))
}

/// Re-run classification for a completed document's mappings.
///
/// Overwrites AI verdict columns in place; review state survives. Returns
/// the number of mappings reclassified.
pub fn classify_document(
    conn: &Connection,
    document_id: &Uuid,
    reasoning: &ReasoningService,
) -> Result<usize, PipelineError> {
    let (client, model) = match reasoning {
        ReasoningService::Available { client, model } => (client.clone(), model.clone()),
        ReasoningService::Unavailable { reason } => {
            return Err(PipelineError::ReasoningUnavailable(reason.clone()));
        }
    };

    let mappings = repository::list_mappings_for_document(conn, document_id)?;
    let procedures: Vec<ExtractedProcedure> = mappings
        .iter()
        .map(|view| ExtractedProcedure {
            code: view.mapping.extracted_code.clone(),
            description: view.mapping.extracted_description.clone(),
            value: view.mapping.extracted_value,
        })
        .collect();

    let verdicts = classify_procedures(&*client, &model, &procedures);

    for (view, verdict) in mappings.iter().zip(&verdicts) {
        repository::update_mapping_classification(
            conn,
            &view.mapping.id,
            verdict.periciable,
            verdict.adults_only,
            verdict.periciable_confidence,
            verdict.adults_only_confidence,
            verdict.reasoning.as_deref(),
        )?;
    }

    tracing::info!(
        document_id = %document_id,
        mappings = mappings.len(),
        "Reclassification complete"
    );
    Ok(mappings.len())
}

fn build_mapping(
    document_id: &Uuid,
    procedure: &ExtractedProcedure,
    verdict: &Classification,
) -> ProcedureMapping {
    ProcedureMapping {
        id: Uuid::new_v4(),
        document_id: *document_id,
        extracted_code: procedure.code.clone(),
        extracted_description: procedure.description.clone(),
        extracted_value: procedure.value,
        extracted_is_periciable: Some(verdict.periciable),
        extracted_adults_only: Some(verdict.adults_only),
        ai_periciable_confidence: Some(verdict.periciable_confidence),
        ai_adults_only_confidence: Some(verdict.adults_only_confidence),
        ai_reasoning: verdict.reasoning.clone(),
        mapped_procedure_base_id: None,
        mapped_provider_procedure_id: None,
        status: MappingStatus::Pending,
        notes: None,
        reviewed_by: None,
        reviewed_at: None,
        created_at: chrono::Utc::now().naive_utc(),
    }
}

/// Best-effort progress write. A torn progress update is not worth killing
/// the run over; the terminal write at the end is the one that matters.
fn set_progress(conn: &Connection, document_id: &Uuid, progress: u8, stage: ProcessingStage) {
    if let Err(e) = repository::update_processing_state(
        conn,
        document_id,
        progress,
        stage,
        ProcessingStatus::Processing,
    ) {
        tracing::warn!(document_id = %document_id, error = %e, "Progress update failed");
    }
}

/// Mark the document failed with an error payload a human can act on.
/// `stack` carries the underlying failure detail; `reason` is the message
/// surfaced to polling clients.
fn fail_document(
    conn: &Connection,
    document_id: &Uuid,
    reason: &str,
    stack: &str,
) -> Result<(), PipelineError> {
    tracing::error!(document_id = %document_id, reason, stack, "Document processing failed");
    repository::finish_document(
        conn,
        document_id,
        ProcessingStatus::Failed,
        ProcessingStage::Failed,
        &serde_json::json!({
            "error": reason,
            "stack": stack,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::Document;
    use crate::pipeline::llm::MockLlmClient;
    use crate::pipeline::ocr::MockOcrEngine;
    use crate::pipeline::render::MockPdfPageRenderer;

    const LONG_PAGE_ONE: &str = "A1.01.01.01 Consulta 130,00\nA2.00.00.01 Prótese total acrílica 600,00\npadding padding padding";
    const LONG_PAGE_TWO: &str = "A1.01.01.01 Consulta inicial 50,00\nA3.00.00.01 Extração simples —\npadding padding padding";

    fn seed_document(conn: &Connection, storage_path: &str) -> Uuid {
        let now = chrono::Utc::now().naive_utc();
        let doc = Document {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            original_filename: "precario.pdf".into(),
            size_bytes: 1024,
            mime_type: "application/pdf".into(),
            storage_path: storage_path.into(),
            processed: false,
            processing_status: ProcessingStatus::Processing,
            processing_progress: 5,
            processing_stage: ProcessingStage::Uploaded,
            extracted_data: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        repository::insert_document(conn, &doc).unwrap();
        doc.id
    }

    fn stored_pdf(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.4 fake").unwrap();
        path.to_string_lossy().to_string()
    }

    fn engines(
        pages: usize,
        ocr_pages: Vec<&str>,
        llm: MockLlmClient,
    ) -> PipelineEngines {
        PipelineEngines {
            renderer: Arc::new(MockPdfPageRenderer::new(pages)),
            ocr: Arc::new(MockOcrEngine::new(ocr_pages)),
            reasoning: Arc::new(ReasoningService::Available {
                client: Arc::new(llm),
                model: "qwen2.5:14b".into(),
            }),
        }
    }

    #[test]
    fn full_run_dedups_and_saves_pending_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let doc_id = seed_document(&conn, &stored_pdf(&dir));

        let llm = MockLlmClient::with_responses(vec![
            // Page 1 extraction
            r#"{"procedures": [
                {"code": "A1.01.01.01", "description": "Consulta", "value": 130.0},
                {"code": "A2.00.00.01", "description": "Prótese total acrílica", "value": 600.0}
            ]}"#,
            // Page 2 extraction — repeats A1 with a longer description
            r#"{"procedures": [
                {"code": "A1.01.01.01", "description": "Consulta inicial", "value": 50.0},
                {"code": "A3.00.00.01", "description": "Extração simples", "value": null}
            ]}"#,
            // Classification of the 3 survivors
            r#"[
                {"periciable": false, "adults_only": false, "periciable_confidence": 0.9, "adults_only_confidence": 0.9, "reasoning": "routine consult"},
                {"periciable": true, "adults_only": true, "periciable_confidence": 0.95, "adults_only_confidence": 0.9, "reasoning": "full prosthesis"},
                {"periciable": false, "adults_only": false, "periciable_confidence": 0.8, "adults_only_confidence": 0.85, "reasoning": "simple extraction"}
            ]"#,
        ]);

        run_pipeline(
            &conn,
            &doc_id,
            &engines(2, vec![LONG_PAGE_ONE, LONG_PAGE_TWO], llm),
        )
        .unwrap();

        let doc = repository::get_document(&conn, &doc_id).unwrap().unwrap();
        assert!(doc.processed);
        assert_eq!(doc.processing_status, ProcessingStatus::Completed);
        assert_eq!(doc.processing_stage, ProcessingStage::Completed);
        assert_eq!(doc.processing_progress, 100);

        let summary = doc.extracted_data.unwrap();
        assert_eq!(summary["page_count"], 2);
        assert_eq!(summary["pages_ocr_failed"], 0);
        assert_eq!(summary["procedures_extracted"], 4);
        assert_eq!(summary["procedures_after_dedup"], 3);
        // Deduped set lands in the payload: one entry per surviving code
        assert_eq!(summary["procedures"].as_array().unwrap().len(), 3);
        assert_eq!(summary["procedures"][0]["code"], "A1.01.01.01");
        assert_eq!(summary["procedures"][0]["description"], "Consulta inicial");
        // Each persisted procedure carries its AI verdict
        assert_eq!(
            summary["procedures"][0]["classification"]["periciable"],
            false
        );
        assert_eq!(summary["procedures"][1]["classification"]["periciable"], true);
        assert_eq!(
            summary["procedures"][1]["classification"]["periciable_confidence"],
            0.95
        );
        assert_eq!(
            summary["procedures"][1]["classification"]["reasoning"],
            "full prosthesis"
        );

        let mappings = repository::list_mappings_for_document(&conn, &doc_id).unwrap();
        assert_eq!(mappings.len(), 3);

        // First-seen order survives dedup
        let codes: Vec<&str> = mappings
            .iter()
            .map(|m| m.mapping.extracted_code.as_str())
            .collect();
        assert_eq!(codes, vec!["A1.01.01.01", "A2.00.00.01", "A3.00.00.01"]);

        // The longer "Consulta inicial" row won the dedup, bringing its price
        let consulta = &mappings[0].mapping;
        assert_eq!(consulta.extracted_description, "Consulta inicial");
        assert_eq!(consulta.extracted_value, Some(50.0));
        assert_eq!(consulta.status, MappingStatus::Pending);
        assert_eq!(consulta.extracted_is_periciable, Some(false));

        // Classification copied onto the prosthesis row
        let protese = &mappings[1].mapping;
        assert_eq!(protese.extracted_is_periciable, Some(true));
        assert_eq!(protese.extracted_adults_only, Some(true));
        assert_eq!(protese.ai_periciable_confidence, Some(0.95));
        assert_eq!(protese.ai_reasoning.as_deref(), Some("full prosthesis"));
    }

    #[test]
    fn short_ocr_page_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let doc_id = seed_document(&conn, &stored_pdf(&dir));

        let llm = MockLlmClient::with_responses(vec![
            r#"{"procedures": [{"code": "A1.01.01.01", "description": "Consulta", "value": 50.0}]}"#,
            r#"[{"periciable": false, "adults_only": false, "periciable_confidence": 0.9, "adults_only_confidence": 0.9, "reasoning": "consult"}]"#,
        ]);

        // Page 2's OCR comes back nearly blank
        run_pipeline(&conn, &doc_id, &engines(2, vec![LONG_PAGE_ONE, "blank"], llm)).unwrap();

        let doc = repository::get_document(&conn, &doc_id).unwrap().unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Completed);
        let summary = doc.extracted_data.unwrap();
        assert_eq!(summary["pages_ocr_failed"], 1);
        assert_eq!(summary["procedures_after_dedup"], 1);

        let mappings = repository::list_mappings_for_document(&conn, &doc_id).unwrap();
        assert_eq!(mappings.len(), 1);
    }

    #[test]
    fn reasoning_unavailable_fails_document() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let doc_id = seed_document(&conn, &stored_pdf(&dir));

        let engines = PipelineEngines {
            renderer: Arc::new(MockPdfPageRenderer::new(1)),
            ocr: Arc::new(MockOcrEngine::new(vec![LONG_PAGE_ONE])),
            reasoning: Arc::new(ReasoningService::Unavailable {
                reason: "Ollama not reachable at http://localhost:11434".into(),
            }),
        };

        run_pipeline(&conn, &doc_id, &engines).unwrap();

        let doc = repository::get_document(&conn, &doc_id).unwrap().unwrap();
        assert!(!doc.processed);
        assert_eq!(doc.processing_status, ProcessingStatus::Failed);
        assert_eq!(doc.processing_stage, ProcessingStage::Failed);
        let payload = doc.extracted_data.unwrap();
        assert!(payload["error"]
            .as_str()
            .unwrap()
            .contains("Reasoning model unavailable"));
        assert_eq!(
            payload["stack"].as_str().unwrap(),
            "Ollama not reachable at http://localhost:11434"
        );
        assert!(payload["timestamp"].as_str().is_some());
    }

    #[test]
    fn unreadable_pdf_fails_document() {
        struct BrokenRenderer;
        impl PdfPageRenderer for BrokenRenderer {
            fn page_count(&self, _pdf: &[u8]) -> Result<usize, PipelineError> {
                Err(PipelineError::PdfRendering {
                    page: 0,
                    reason: "not a PDF header".into(),
                })
            }
            fn render_page(&self, _pdf: &[u8], page: usize) -> Result<Vec<u8>, PipelineError> {
                Err(PipelineError::PdfRendering {
                    page,
                    reason: "not a PDF header".into(),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let doc_id = seed_document(&conn, &stored_pdf(&dir));

        let engines = PipelineEngines {
            renderer: Arc::new(BrokenRenderer),
            ocr: Arc::new(MockOcrEngine::new(vec![LONG_PAGE_ONE])),
            reasoning: Arc::new(ReasoningService::Available {
                client: Arc::new(MockLlmClient::new("{}")),
                model: "qwen2.5:14b".into(),
            }),
        };

        run_pipeline(&conn, &doc_id, &engines).unwrap();

        let doc = repository::get_document(&conn, &doc_id).unwrap().unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Failed);
        let payload = doc.extracted_data.unwrap();
        assert!(payload["error"].as_str().unwrap().contains("Cannot open PDF"));
        assert!(payload["stack"].as_str().unwrap().contains("not a PDF header"));
    }

    #[test]
    fn missing_stored_file_fails_document() {
        let conn = open_memory_database().unwrap();
        let doc_id = seed_document(&conn, "/nonexistent/path/doc.pdf");

        let llm = MockLlmClient::new("{}");
        run_pipeline(&conn, &doc_id, &engines(1, vec![LONG_PAGE_ONE], llm)).unwrap();

        let doc = repository::get_document(&conn, &doc_id).unwrap().unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Failed);
        assert!(doc.extracted_data.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("Cannot read stored file"));
    }

    #[test]
    fn all_pages_blank_completes_with_zero_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let doc_id = seed_document(&conn, &stored_pdf(&dir));

        // Classification is never called with an empty set; the single mock
        // response stays unused.
        let llm = MockLlmClient::new("[]");
        run_pipeline(&conn, &doc_id, &engines(2, vec!["", "x"], llm)).unwrap();

        let doc = repository::get_document(&conn, &doc_id).unwrap().unwrap();
        assert_eq!(doc.processing_status, ProcessingStatus::Completed);
        let summary = doc.extracted_data.unwrap();
        assert_eq!(summary["pages_ocr_failed"], 2);
        assert_eq!(summary["procedures_after_dedup"], 0);
        assert!(repository::list_mappings_for_document(&conn, &doc_id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn reclassify_overwrites_ai_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_memory_database().unwrap();
        let doc_id = seed_document(&conn, &stored_pdf(&dir));

        let llm = MockLlmClient::with_responses(vec![
            r#"{"procedures": [{"code": "A2.00.00.01", "description": "Prótese", "value": 600.0}]}"#,
            // First classification fails to parse — conservative default
            "no json here",
        ]);
        run_pipeline(&conn, &doc_id, &engines(1, vec![LONG_PAGE_ONE], llm)).unwrap();

        let before = repository::list_mappings_for_document(&conn, &doc_id).unwrap();
        assert_eq!(before[0].mapping.ai_periciable_confidence, Some(0.0));

        // Reclassify with a working model
        let reasoning = ReasoningService::Available {
            client: Arc::new(MockLlmClient::new(
                r#"[{"periciable": true, "adults_only": true, "periciable_confidence": 0.92, "adults_only_confidence": 0.88, "reasoning": "prosthesis"}]"#,
            )),
            model: "qwen2.5:14b".into(),
        };
        let count = classify_document(&conn, &doc_id, &reasoning).unwrap();
        assert_eq!(count, 1);

        let after = repository::list_mappings_for_document(&conn, &doc_id).unwrap();
        assert_eq!(after[0].mapping.extracted_is_periciable, Some(true));
        assert_eq!(after[0].mapping.ai_periciable_confidence, Some(0.92));
        assert_eq!(after[0].mapping.ai_reasoning.as_deref(), Some("prosthesis"));
    }

    #[test]
    fn reclassify_without_model_is_an_error() {
        let conn = open_memory_database().unwrap();
        let reasoning = ReasoningService::Unavailable {
            reason: "no model".into(),
        };
        let err = classify_document(&conn, &Uuid::new_v4(), &reasoning).unwrap_err();
        assert!(matches!(err, PipelineError::ReasoningUnavailable(_)));
    }
}
