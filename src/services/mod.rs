//! Collaborator contracts for services outside the pipeline core.
//!
//! The executor only sees these traits. Real adapters (tesseract
//! subprocess, HTTP inference client, file-backed stores) live in the
//! submodules; tests inject in-memory implementations.

pub mod inference;
pub mod ocr;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use inference::HttpInferenceClient;
pub use ocr::TesseractExtractor;
pub use store::{FileRunStore, FileSuggestionStore};

use crate::domain::Suggestion;

/// Raw inference output for one document: the request/response contract at
/// the model boundary. Structural problems with these fields are validation
/// violations downstream, never errors here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub account_number: Option<String>,

    pub vat_code: Option<String>,

    /// Model's self-reported confidence in [0, 1]
    pub confidence: f64,

    /// Model's own coarse risk guess; advisory only, the scorer decides
    #[serde(default)]
    pub risk_hint: Option<String>,

    /// Brief explanation, surfaced to the reviewer as notes
    #[serde(default)]
    pub reasoning: String,
}

impl InferenceOutput {
    /// Clamp out-of-range confidence values from a misbehaving model
    pub fn normalized(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

/// Text extraction boundary (OCR)
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedMime(String),

    #[error("extraction failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, file_path: &str, mime_type: &str) -> Result<String, ExtractionError>;
}

/// Inference boundary (LLM call, opaque)
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request timed out")]
    Timeout,

    #[error("inference request failed: {0}")]
    Http(String),

    #[error("inference response malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn suggest(&self, ocr_text: &str) -> Result<InferenceOutput, InferenceError>;
}

/// Persistence gateway for suggestion records
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    async fn save(&self, suggestion: &Suggestion) -> anyhow::Result<Uuid>;

    async fn load(&self, id: Uuid) -> anyhow::Result<Option<Suggestion>>;
}
