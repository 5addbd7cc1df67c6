//! Tesseract OCR adapter using subprocess mode.
//!
//! Spawns the `tesseract` CLI with the document file and collects stdout.
//! Only image inputs are handled here; PDF rasterization is left to an
//! upstream conversion step.

use async_trait::async_trait;
use tokio::process::Command;

use super::{ExtractionError, TextExtractor};

/// OCR extractor shelling out to tesseract
pub struct TesseractExtractor {
    /// Path to the tesseract binary (default: "tesseract")
    binary_path: String,

    /// Languages passed to -l (default: "nor+eng")
    languages: String,
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractExtractor {
    pub fn new() -> Self {
        Self {
            binary_path: "tesseract".to_string(),
            languages: "nor+eng".to_string(),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ..Self::new()
        }
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(&self, file_path: &str, mime_type: &str) -> Result<String, ExtractionError> {
        if !mime_type.starts_with("image/") {
            return Err(ExtractionError::UnsupportedMime(mime_type.to_string()));
        }

        let output = Command::new(&self.binary_path)
            .args([file_path, "stdout", "-l", &self.languages])
            .output()
            .await
            .map_err(|e| {
                ExtractionError::Failed(format!("failed to spawn {}: {e}", self.binary_path))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(ExtractionError::Failed(format!(
                "tesseract exited with code {exit_code}: {}",
                stderr.trim()
            )));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|_| ExtractionError::Failed("tesseract output is not valid UTF-8".into()))?;

        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_mime_rejected() {
        let extractor = TesseractExtractor::new();
        let err = extractor
            .extract("/tmp/doc.docx", "application/msword")
            .await;
        assert!(matches!(err, Err(ExtractionError::UnsupportedMime(_))));
    }

    #[tokio::test]
    async fn test_missing_binary_is_failure() {
        let extractor = TesseractExtractor::with_binary_path("tesseract-does-not-exist");
        let err = extractor.extract("/tmp/scan.png", "image/png").await;
        assert!(matches!(err, Err(ExtractionError::Failed(_))));
    }
}
