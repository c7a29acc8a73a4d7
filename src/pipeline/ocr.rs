//! Vision OCR engine — extracts page text from rendered images via Ollama.
//!
//! The vision model is asked for a faithful plain-text transcription of the
//! page, keeping table rows on their own lines so the downstream extraction
//! prompt sees one procedure per line.

use std::sync::{Arc, Mutex};

use base64::Engine as _;

use super::llm::VisionClient;
use super::PipelineError;

const OCR_SYSTEM_PROMPT: &str = "\
You are a document text extractor for Portuguese dental price tables. \
Transcribe ALL visible text from the provided page image exactly as written. \
Keep each table row on its own line with columns separated by spaces. \
Do not translate, summarize, or omit anything.";

const OCR_USER_PROMPT: &str = "\
Transcribe all visible text from this page. Preserve table rows as individual \
lines: code, description, then price. Output plain text only.";

/// OCR seam over a single rendered page.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, png_bytes: &[u8]) -> Result<String, PipelineError>;
}

/// Production OCR engine backed by an Ollama vision model.
pub struct OllamaVisionOcr {
    vision_client: Arc<dyn VisionClient>,
    model_name: String,
}

impl OllamaVisionOcr {
    pub fn new(vision_client: Arc<dyn VisionClient>, model_name: String) -> Self {
        Self {
            vision_client,
            model_name,
        }
    }
}

impl OcrEngine for OllamaVisionOcr {
    fn recognize(&self, png_bytes: &[u8]) -> Result<String, PipelineError> {
        let _span = tracing::info_span!(
            "vision_ocr",
            model = %self.model_name,
            image_size = png_bytes.len(),
        )
        .entered();
        let start = std::time::Instant::now();

        let base64_image = base64::engine::general_purpose::STANDARD.encode(png_bytes);
        let images = vec![base64_image];

        let text = self
            .vision_client
            .chat_with_images(
                &self.model_name,
                OCR_USER_PROMPT,
                &images,
                Some(OCR_SYSTEM_PROMPT),
            )
            .map_err(|e| PipelineError::OcrProcessing(format!("Vision OCR failed: {e}")))?;

        let text = text.trim().to_string();

        tracing::info!(
            model = %self.model_name,
            elapsed_ms = %start.elapsed().as_millis(),
            text_len = text.len(),
            "Vision OCR complete"
        );

        Ok(text)
    }
}

/// Mock OCR engine — returns per-page texts in call order, then repeats
/// the last one.
pub struct MockOcrEngine {
    pages: Vec<String>,
    calls: Mutex<usize>,
}

impl MockOcrEngine {
    pub fn new(pages: Vec<&str>) -> Self {
        Self {
            pages: pages.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(0),
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _png_bytes: &[u8]) -> Result<String, PipelineError> {
        let mut calls = self.calls.lock().expect("mock lock");
        let index = (*calls).min(self.pages.len().saturating_sub(1));
        *calls += 1;
        self.pages
            .get(index)
            .cloned()
            .ok_or_else(|| PipelineError::OcrProcessing("mock has no pages".into()))
    }
}
