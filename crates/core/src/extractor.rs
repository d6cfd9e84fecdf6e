use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// How page boundaries were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Text was read page by page.
    PageAccurate,
    /// Only a concatenated blob and a page count were available; the blob was cut
    /// into equal character ranges. Text near page boundaries may be misattributed.
    Proportional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// One entry per page, numbered 1..=N without gaps.
    pub pages: Vec<PageText>,
    pub method: ExtractionMethod,
}

/// Text used for a page that produced no text.
pub fn placeholder_text(number: u32) -> String {
    format!("Slide {number}")
}

pub trait PdfExtractor: Send + Sync {
    fn extract(&self, document: &[u8]) -> Result<Extraction, IngestError>;
}

/// Reads text straight from the PDF content streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract(&self, document: &[u8]) -> Result<Extraction, IngestError> {
        let document = Document::load_mem(document)
            .map_err(|error| IngestError::Extraction(format!("pdf parse error: {error}")))?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        if page_numbers.is_empty() {
            return Err(IngestError::EmptyDocument);
        }
        let page_count = page_numbers.len();

        let per_page = page_numbers
            .iter()
            .map(|page_no| document.extract_text(&[*page_no]))
            .collect::<Result<Vec<_>, _>>();

        match per_page {
            Ok(texts) => Ok(Extraction {
                pages: number_pages(texts),
                method: ExtractionMethod::PageAccurate,
            }),
            Err(page_error) => {
                warn!(
                    error = %page_error,
                    page_count,
                    "per-page extraction failed, splitting document text proportionally"
                );
                let full_text = document.extract_text(&page_numbers).map_err(|error| {
                    IngestError::Extraction(format!(
                        "{page_error}; whole-document extraction failed: {error}"
                    ))
                })?;
                Ok(Extraction {
                    pages: split_proportionally(&full_text, page_count),
                    method: ExtractionMethod::Proportional,
                })
            }
        }
    }
}

/// Partitions `text` into `page_count` contiguous character ranges of length
/// `len / page_count`; the last page takes the remainder.
pub fn split_proportionally(text: &str, page_count: usize) -> Vec<PageText> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    (0..page_count)
        .map(|index| {
            let start = index * total / page_count;
            let end = if index + 1 == page_count {
                total
            } else {
                (index + 1) * total / page_count
            };
            chars[start..end].iter().collect::<String>()
        })
        .enumerate()
        .map(|(index, text)| page_entry(index as u32 + 1, &text))
        .collect()
}

fn number_pages(texts: Vec<String>) -> Vec<PageText> {
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| page_entry(index as u32 + 1, text))
        .collect()
}

fn page_entry(number: u32, text: &str) -> PageText {
    let trimmed = text.trim();
    PageText {
        number,
        text: if trimmed.is_empty() {
            placeholder_text(number)
        } else {
            trimmed.to_string()
        },
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    pages: Option<Vec<LlmOcrPage>>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    page_count: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

const OCR_TIMEOUT: Duration = Duration::from_secs(120);

/// Multimodal OCR service reached over HTTP. Blocking; call from a blocking task.
/// The HTTP client is built per call so it is never created or dropped on an
/// async worker thread.
pub struct OcrExtractor {
    config: OcrEndpointConfig,
}

impl OcrExtractor {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self { config }
    }
}

impl PdfExtractor for OcrExtractor {
    fn extract(&self, document: &[u8]) -> Result<Extraction, IngestError> {
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(document),
        };

        let client = Client::builder()
            .timeout(OCR_TIMEOUT)
            .build()
            .map_err(|error| IngestError::Extraction(format!("OCR client setup failed: {error}")))?;

        let mut request = client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .map_err(|error| IngestError::Extraction(format!("OCR request failed: {error}")))?;

        if !response.status().is_success() {
            return Err(IngestError::Extraction(format!(
                "OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response
            .json()
            .map_err(|error| IngestError::Extraction(format!("OCR response invalid: {error}")))?;
        payload_to_extraction(&payload)
    }
}

fn payload_to_extraction(payload: &LlmOcrResponse) -> Result<Extraction, IngestError> {
    if let Some(listed) = payload.pages.as_ref().filter(|pages| !pages.is_empty()) {
        let page_count = listed
            .iter()
            .enumerate()
            .map(|(index, page)| page.page.unwrap_or(index as u32 + 1))
            .max()
            .unwrap_or(0)
            .max(payload.page_count.unwrap_or(0) as u32);

        let mut texts = vec![String::new(); page_count as usize];
        for (index, page) in listed.iter().enumerate() {
            let number = page.page.unwrap_or(index as u32 + 1);
            if number == 0 {
                continue;
            }
            if let Some(text) = &page.text {
                let slot = &mut texts[number as usize - 1];
                if !slot.is_empty() {
                    slot.push('\n');
                }
                slot.push_str(text.trim());
            }
        }

        return Ok(Extraction {
            pages: number_pages(texts),
            method: ExtractionMethod::PageAccurate,
        });
    }

    if let Some(raw_text) = payload.text.as_deref().filter(|text| !text.trim().is_empty()) {
        if raw_text.contains('\u{000c}') {
            let texts = raw_text
                .trim_end_matches(|c: char| c == '\u{000c}' || c.is_whitespace())
                .split('\u{000c}')
                .map(str::to_string)
                .collect();
            return Ok(Extraction {
                pages: number_pages(texts),
                method: ExtractionMethod::PageAccurate,
            });
        }

        return Ok(match payload.page_count {
            Some(count) if count > 1 => Extraction {
                pages: split_proportionally(raw_text, count),
                method: ExtractionMethod::Proportional,
            },
            _ => Extraction {
                pages: number_pages(vec![raw_text.to_string()]),
                method: ExtractionMethod::PageAccurate,
            },
        });
    }

    if payload.page_count == Some(0) {
        return Err(IngestError::EmptyDocument);
    }

    Err(IngestError::Extraction(
        "OCR response has no readable text".to_string(),
    ))
}

/// Local PDF parsing first, then the OCR endpoint when one is configured and the
/// local parser could not read the document at all.
#[derive(Default)]
pub struct LayeredExtractor {
    local: LopdfExtractor,
    ocr: Option<OcrExtractor>,
}

impl LayeredExtractor {
    pub fn new(ocr: Option<OcrEndpointConfig>) -> Self {
        Self {
            local: LopdfExtractor,
            ocr: ocr.map(OcrExtractor::new),
        }
    }
}

impl PdfExtractor for LayeredExtractor {
    fn extract(&self, document: &[u8]) -> Result<Extraction, IngestError> {
        match (self.local.extract(document), &self.ocr) {
            (Err(IngestError::Extraction(parse_error)), Some(ocr)) => {
                debug!(error = %parse_error, "local extraction failed, trying OCR endpoint");
                ocr.extract(document).map_err(|ocr_error| {
                    IngestError::Extraction(format!(
                        "{parse_error}; OCR fallback failed: {ocr_error}"
                    ))
                })
            }
            (result, _) => result,
        }
    }
}
