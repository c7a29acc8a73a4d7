//! Shared value types flowing through the extraction pipeline.

use serde::{Deserialize, Serialize};

/// One table row pulled out of a price-table page by the extraction model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedProcedure {
    /// Nomenclature code, e.g. `A1.01.01.01`
    pub code: String,
    pub description: String,
    /// Price in euros; absent when the table cell was empty or unreadable
    pub value: Option<f64>,
}

/// Classification verdict for one extracted procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub periciable: bool,
    pub adults_only: bool,
    pub periciable_confidence: f64,
    pub adults_only_confidence: f64,
    pub reasoning: Option<String>,
}

impl Classification {
    /// Fallback used whenever a batch cannot be classified: both flags off,
    /// zero confidence, with the failure noted for the reviewer.
    pub fn conservative(reason: &str) -> Self {
        Self {
            periciable: false,
            adults_only: false,
            periciable_confidence: 0.0,
            adults_only_confidence: 0.0,
            reasoning: Some(format!("Classification unavailable: {reason}")),
        }
    }
}

/// Summary persisted in `documents.extracted_data` after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub page_count: usize,
    pub pages_ocr_failed: usize,
    pub procedures_extracted: usize,
    pub procedures_after_dedup: usize,
}
