use crate::chunking::normalize_whitespace;
use crate::error::ConversionError;
use crate::models::{Document, NormalizedText, SourceMetadata};
use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Output of a single converter run over one file.
#[derive(Debug, Clone)]
pub struct Converted {
    pub markdown: String,
    pub page_count: u32,
}

#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Lines matching this pattern are promoted to markdown headings. Group 1
    /// is the section number; group 2, when present, is the title.
    pub heading_regex: &'static str,
    pub max_heading_chars: usize,
    pub max_heading_words: usize,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            heading_regex: r"^(\d+(?:\.\d+)*)\.?\s+([A-Z][^.!?]*)$",
            max_heading_chars: 80,
            max_heading_words: 8,
        }
    }
}

pub trait PdfConverter: Send + Sync {
    fn name(&self) -> &str;
    fn convert_file(&self, path: &Path) -> Result<Converted, ConversionError>;
}

#[derive(Debug, Clone, Default)]
pub struct LopdfConverter {
    options: ConversionOptions,
}

impl LopdfConverter {
    pub fn new(options: ConversionOptions) -> Self {
        Self { options }
    }
}

impl PdfConverter for LopdfConverter {
    fn name(&self) -> &str {
        "lopdf"
    }

    fn convert_file(&self, path: &Path) -> Result<Converted, ConversionError> {
        let pages = extract_page_texts(path)?;
        let page_count = pages.len() as u32;
        let markdown = pages_to_markdown(&pages, &self.options)?;
        Ok(Converted {
            markdown,
            page_count,
        })
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, ConversionError> {
    let document =
        lopdf::Document::load(path).map_err(|error| ConversionError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| ConversionError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
    }

    if pages.is_empty() {
        return Err(ConversionError::NoText(path.display().to_string()));
    }

    Ok(pages)
}

/// Joins page texts into one markdown-like string. Lines are whitespace
/// normalized, numbered section titles become `#` headings, and pages are
/// separated by a blank line.
pub fn pages_to_markdown(
    pages: &[PageText],
    options: &ConversionOptions,
) -> Result<String, ConversionError> {
    let heading_re = Regex::new(options.heading_regex)?;

    let rendered = pages
        .iter()
        .map(|page| {
            page.text
                .lines()
                .map(normalize_whitespace)
                .map(|line| promote_heading(&line, &heading_re, options))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>();

    Ok(rendered.join("\n\n"))
}

const TITLE_CONNECTIVES: [&str; 16] = [
    "a", "an", "and", "as", "at", "by", "for", "from", "in", "into", "of", "on", "or", "the",
    "to", "with",
];

fn promote_heading(line: &str, heading_re: &Regex, options: &ConversionOptions) -> String {
    if line.chars().count() > options.max_heading_chars {
        return line.to_string();
    }

    let Some(capture) = heading_re.captures(line) else {
        return line.to_string();
    };
    let Some(number) = capture.get(1) else {
        return line.to_string();
    };
    if let Some(title) = capture.get(2) {
        if !is_title(title.as_str(), options.max_heading_words) {
            return line.to_string();
        }
    }

    let depth = number.as_str().split('.').count().clamp(1, 6);
    format!("\n{} {}\n", "#".repeat(depth), line)
}

/// Short, title-cased text: every word except connectives starts with an
/// uppercase letter or a non-letter.
fn is_title(title: &str, max_words: usize) -> bool {
    let words = title.split_whitespace().collect::<Vec<_>>();
    if words.is_empty() || words.len() > max_words {
        return false;
    }
    words.iter().all(|word| {
        let lowered = word.to_lowercase();
        TITLE_CONNECTIVES.contains(&lowered.as_str())
            || word
                .chars()
                .next()
                .map_or(true, |first| !first.is_alphabetic() || first.is_uppercase())
    })
}

#[derive(Debug, Clone, Serialize)]
struct RemoteConvertRequest {
    pdf_base64: String,
    file_name: String,
    output_format: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteConvertResponse {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    pages: Option<Vec<RemotePage>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemotePage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteConverterConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl RemoteConverterConfig {
    /// Reads `DOCCHAT_CONVERTER_ENDPOINT` / `DOCCHAT_CONVERTER_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("DOCCHAT_CONVERTER_ENDPOINT").ok()?;
        Self::new(endpoint, std::env::var("DOCCHAT_CONVERTER_API_KEY").ok())
    }

    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Option<Self> {
        let endpoint = endpoint.into().trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = api_key.and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Some(Self {
            endpoint,
            api_key,
            timeout: Duration::from_secs(300),
        })
    }
}

/// Conversion service reached over HTTP. Sends the pdf as base64 and
/// expects markdown back, either whole or per page.
pub struct RemoteConverter {
    config: RemoteConverterConfig,
}

impl RemoteConverter {
    pub fn new(config: RemoteConverterConfig) -> Self {
        Self { config }
    }
}

impl PdfConverter for RemoteConverter {
    fn name(&self) -> &str {
        "remote"
    }

    fn convert_file(&self, path: &Path) -> Result<Converted, ConversionError> {
        let pdf = std::fs::read(path)?;
        let payload = RemoteConvertRequest {
            pdf_base64: STANDARD.encode(pdf),
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            output_format: "markdown",
        };

        let client = Client::builder().timeout(self.config.timeout).build()?;
        let mut request = client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(ConversionError::Remote(format!(
                "conversion request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: RemoteConvertResponse = response.json()?;
        let pages = payload_to_pages(&payload, path)?;
        let page_count = pages.len() as u32;

        Ok(Converted {
            markdown: pages
                .into_iter()
                .map(|page| page.text)
                .collect::<Vec<_>>()
                .join("\n\n"),
            page_count,
        })
    }
}

fn payload_to_pages(
    payload: &RemoteConvertResponse,
    path: &Path,
) -> Result<Vec<PageText>, ConversionError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_ref().map(|value| value.trim().to_string());
                text.and_then(|normalized| {
                    if normalized.is_empty() {
                        None
                    } else {
                        Some(PageText {
                            number: page.page.unwrap_or(1),
                            text: normalized,
                        })
                    }
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(markdown) = &payload.markdown {
        let pages = markdown
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(ConversionError::Remote(format!(
        "conversion response was empty for {}",
        path.display()
    )))
}

/// Converts uploaded documents. Bytes are staged in a temporary file that is
/// removed when the guard drops, whichever way conversion ends.
pub struct DocumentIngestor {
    primary: Box<dyn PdfConverter>,
    fallback: Option<Box<dyn PdfConverter>>,
}

impl Default for DocumentIngestor {
    fn default() -> Self {
        Self::new(Box::new(LopdfConverter::default()))
    }
}

impl DocumentIngestor {
    pub fn new(primary: Box<dyn PdfConverter>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn PdfConverter>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn convert(&self, document: &Document) -> Result<NormalizedText, ConversionError> {
        check_pdf_bytes(document)?;

        let mut staged = tempfile::Builder::new()
            .prefix("docchat-")
            .suffix(".pdf")
            .tempfile()?;
        staged.write_all(&document.bytes)?;
        staged.flush()?;

        debug!(file = %document.file_name, staged = %staged.path().display(), "staged upload");

        let (converted, converter) = match self.primary.convert_file(staged.path()) {
            Ok(converted) => (converted, self.primary.name()),
            Err(primary_error) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        file = %document.file_name,
                        error = %primary_error,
                        fallback = fallback.name(),
                        "primary conversion failed, trying fallback"
                    );
                    match fallback.convert_file(staged.path()) {
                        Ok(converted) => (converted, fallback.name()),
                        Err(fallback_error) => {
                            return Err(ConversionError::PdfParse(format!(
                                "{primary_error}; {} fallback failed: {fallback_error}",
                                fallback.name()
                            )))
                        }
                    }
                }
                None => return Err(primary_error),
            },
        };

        if converted.markdown.trim().is_empty() {
            return Err(ConversionError::NoText(document.file_name.clone()));
        }

        Ok(NormalizedText {
            text: converted.markdown,
            source: SourceMetadata {
                name: document.file_name.clone(),
                page_count: converted.page_count,
                converter: converter.to_string(),
            },
        })
    }
}

fn check_pdf_bytes(document: &Document) -> Result<(), ConversionError> {
    if document.bytes.is_empty() {
        return Err(ConversionError::Empty(document.file_name.clone()));
    }
    if !document.bytes.starts_with(PDF_MAGIC) {
        return Err(ConversionError::NotPdf(document.file_name.clone()));
    }
    Ok(())
}
