//! Text extraction from uploaded files.
//!
//! Extraction prefers a remote OCR service when one is configured, since it
//! handles scanned PDFs and images. When the service is unavailable or
//! unconfigured, plain-text formats are decoded locally; everything else is
//! rejected as unsupported.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// How the text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Remote OCR service.
    Ocr,
    /// PDF text layer.
    Pdf,
    /// Word document conversion.
    Docx,
    /// Bytes decoded as UTF-8 text.
    Plain,
}

impl ExtractionMethod {
    /// Wire name of the method.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document-level statistics gathered during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    /// Page count when the extractor reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u64>,
    /// Whitespace-separated word count of the extracted text.
    pub word_count: usize,
    /// Character count of the extracted text.
    pub char_count: usize,
}

/// Extracted text plus provenance.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// The extracted text.
    pub text: String,
    /// How the text was obtained.
    pub method: ExtractionMethod,
    /// Statistics about the extracted text.
    pub metadata: ExtractionMetadata,
}

/// Errors raised while extracting text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// OCR service responded with an unexpected status code.
    #[error("Unexpected OCR response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the OCR service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// File bytes claimed to be text but were not valid UTF-8.
    #[error("File is not valid UTF-8 text")]
    InvalidEncoding,
    /// No extractor can handle this MIME type.
    #[error("Unsupported file type: {0}")]
    Unsupported(String),
}

/// Interface implemented by extraction backends.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extracts text from raw file bytes.
    async fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError>;
}

/// Extracts a text string from an OCR response payload.
type TextMatcher = fn(&Value) -> Option<String>;

/// Known OCR response shapes, tried in order.
const TEXT_MATCHERS: &[TextMatcher] = &[
    text_field,
    content_field,
    markdown_field,
    page_texts,
];

/// Extractor that posts files to a remote OCR service.
pub struct RemoteOcrExtractor {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl RemoteOcrExtractor {
    /// Builds an extractor from the OCR section of the configuration.
    pub fn new(config: &Config) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.ocr_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.ocr_endpoint.clone(),
            api_key: config.ocr_api_key.clone(),
        })
    }

    async fn extract_via_ocr(
        &self,
        endpoint: &str,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str(mime_type)?;
        let form = Form::new().part("file", part);

        let mut request = self
            .client
            .post(format!("{}/process", endpoint.trim_end_matches('/')))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::UnexpectedStatus { status, body });
        }

        let payload: Value = response.json().await?;
        let text = TEXT_MATCHERS
            .iter()
            .find_map(|matcher| matcher(&payload))
            .unwrap_or_default();
        if text.is_empty() {
            tracing::warn!(file = filename, "OCR response carried no recognizable text");
        }

        Ok(ExtractionResult {
            metadata: make_metadata(&text, page_count(&payload)),
            text,
            method: ExtractionMethod::Ocr,
        })
    }

    fn extract_plain(&self, bytes: &[u8]) -> Result<ExtractionResult, ExtractionError> {
        let text =
            String::from_utf8(bytes.to_vec()).map_err(|_| ExtractionError::InvalidEncoding)?;
        Ok(ExtractionResult {
            metadata: make_metadata(&text, None),
            text,
            method: ExtractionMethod::Plain,
        })
    }
}

#[async_trait]
impl TextExtractor for RemoteOcrExtractor {
    async fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        if let Some(endpoint) = self.endpoint.clone() {
            match self.extract_via_ocr(&endpoint, bytes, filename, mime_type).await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    tracing::warn!(
                        file = filename,
                        error = %error,
                        "OCR extraction failed; falling back to local extraction"
                    );
                }
            }
        }

        if is_plain_text(mime_type) {
            return self.extract_plain(bytes);
        }
        Err(ExtractionError::Unsupported(mime_type.to_string()))
    }
}

fn is_plain_text(mime_type: &str) -> bool {
    let base = mime_type.split(';').next().unwrap_or(mime_type).trim();
    base.starts_with("text/") || base == "application/json"
}

fn make_metadata(text: &str, pages: Option<u64>) -> ExtractionMetadata {
    ExtractionMetadata {
        pages,
        word_count: text.split_whitespace().count(),
        char_count: text.chars().count(),
    }
}

fn text_field(payload: &Value) -> Option<String> {
    payload.get("text")?.as_str().map(str::to_string)
}

fn content_field(payload: &Value) -> Option<String> {
    payload.get("content")?.as_str().map(str::to_string)
}

fn markdown_field(payload: &Value) -> Option<String> {
    payload.get("markdown")?.as_str().map(str::to_string)
}

fn page_texts(payload: &Value) -> Option<String> {
    let pages = payload.get("pages")?.as_array()?;
    let texts: Vec<&str> = pages
        .iter()
        .filter_map(|page| {
            page.get("text")
                .or_else(|| page.get("content"))
                .and_then(Value::as_str)
        })
        .collect();
    if texts.is_empty() {
        return None;
    }
    Some(texts.join("\n\n"))
}

fn page_count(payload: &Value) -> Option<u64> {
    if let Some(count) = payload.get("page_count").and_then(Value::as_u64) {
        return Some(count);
    }
    payload
        .get("pages")
        .and_then(Value::as_array)
        .map(|pages| pages.len() as u64)
}
