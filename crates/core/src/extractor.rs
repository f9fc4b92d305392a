use crate::error::IngestError;
use crate::ingest::{digest_file, document_id_for};
use crate::models::{Document, Page};
use crate::traits::PdfExtractor;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// `LLM_OCR_ENDPOINT` and optional `LLM_OCR_API_KEY`; blank values count
    /// as unset.
    pub fn from_env() -> Option<Self> {
        let endpoint = non_blank(std::env::var("LLM_OCR_ENDPOINT").ok())?;
        let api_key = non_blank(std::env::var("LLM_OCR_API_KEY").ok());
        Some(Self { endpoint, api_key })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Text-layer extraction with `lopdf`, falling back to a multimodal OCR
/// endpoint when the PDF has no readable text.
#[derive(Debug, Clone, Default)]
pub struct LopdfExtractor {
    ocr: Option<OcrEndpointConfig>,
}

impl LopdfExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        Self {
            ocr: OcrEndpointConfig::from_env(),
        }
    }

    pub fn with_ocr(mut self, ocr: OcrEndpointConfig) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn extract_text_layer(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        let document =
            lopdf::Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(Page::new(page_no, text));
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }

    fn extract_pages(&self, path: &Path) -> Result<Vec<Page>, IngestError> {
        match self.extract_text_layer(path) {
            Ok(pages) => Ok(pages),
            Err(IngestError::PdfParse(parse_error)) => {
                let Some(ocr) = &self.ocr else {
                    return Err(IngestError::PdfParse(parse_error));
                };
                warn!(path = %path.display(), error = %parse_error, "text layer unreadable, trying OCR endpoint");
                extract_with_llm_ocr(ocr, path).map_err(|ocr_error| {
                    IngestError::PdfParse(format!(
                        "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                    ))
                })
            }
            Err(error) => Err(error),
        }
    }
}

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<Document, IngestError> {
        let title = path
            .file_stem()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
            })?
            .to_string();
        let checksum = digest_file(path)?;
        let pages = self.extract_pages(path)?;

        debug!(path = %path.display(), pages = pages.len(), "extracted pdf pages");
        Ok(Document {
            document_id: document_id_for(path),
            title,
            source_path: path.to_string_lossy().to_string(),
            checksum: Some(checksum),
            pages,
        })
    }
}

fn extract_with_llm_ocr(cfg: &OcrEndpointConfig, path: &Path) -> Result<Vec<Page>, IngestError> {
    let pdf = std::fs::read(path)?;
    let payload = LlmOcrRequest {
        pdf_base64: STANDARD.encode(pdf),
        source_path: path.to_string_lossy().to_string(),
    };

    let mut request = Client::new()
        .post(&cfg.endpoint)
        .header("content-type", "application/json")
        .json(&payload);

    if let Some(api_key) = &cfg.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send()?;

    if !response.status().is_success() {
        return Err(IngestError::OcrFailed(format!(
            "multimodal OCR request to {} returned {}",
            cfg.endpoint,
            response.status()
        )));
    }

    let payload: LlmOcrResponse = response.json()?;
    payload_to_pages(&payload, path)
}

/// OCR pages are always flagged so chunks built from them can be told apart.
fn payload_to_pages(payload: &LlmOcrResponse, path: &Path) -> Result<Vec<Page>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).filter(|text| !text.is_empty())?;
                Some(ocr_page(page.page.unwrap_or(1), text))
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let text = chunk.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(ocr_page((index + 1) as u32, text))
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}

fn ocr_page(number: u32, text: &str) -> Page {
    Page {
        number,
        text: text.to_string(),
        ocr: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn ocr_payload_with_pages_converts_only_nonempty_text() -> Result<(), IngestError> {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    page: Some(3),
                    text: Some("EXERCISE 3.2".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))?;

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "EXERCISE 3.2");
        assert!(pages[0].ocr);
        Ok(())
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() -> Result<(), IngestError> {
        let response = LlmOcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))?;

        assert_eq!(
            pages
                .iter()
                .map(|page| (page.number, page.text.as_str(), page.ocr))
                .collect::<Vec<_>>(),
            vec![(1, "First", true), (2, "Second", true)]
        );
        Ok(())
    }

    #[test]
    fn empty_ocr_payload_is_an_error() {
        let response = LlmOcrResponse {
            pages: Some(Vec::new()),
            text: Some(" \u{000C} ".to_string()),
        };
        assert!(matches!(
            payload_to_pages(&response, Path::new("x.pdf")),
            Err(IngestError::OcrFailed(_))
        ));
    }

    #[test]
    fn unreadable_pdf_without_ocr_reports_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"not really a pdf")?;

        let extracted = LopdfExtractor::new().extract(&path);
        assert!(matches!(extracted, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}
