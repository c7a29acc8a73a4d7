pub mod types;
pub mod llm;
pub mod render;
pub mod ocr;
pub mod prompts;
pub mod repair;
pub mod extract;
pub mod dedup;
pub mod classify;
pub mod runner;

pub use types::*;
pub use runner::*;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::pipeline::llm::LlmError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Reasoning model unavailable: {0}")]
    ReasoningUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
