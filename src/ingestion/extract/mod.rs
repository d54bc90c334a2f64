#[cfg(test)]
pub(crate) mod tests;

use serde_json::{Map, Value};
use tracing::debug;

use crate::{IngestError, Result};

const METADATA_OPEN: &str = "<metadata>";
const METADATA_CLOSE: &str = "</metadata>";

/// How a tracked document is turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Csv,
    Pdf,
}

impl DocumentKind {
    /// Kind for a MIME type, `None` when the type is not ingested
    #[inline]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/plain" | "text/markdown" | "text/x-markdown" => Some(DocumentKind::PlainText),
            "text/csv" | "application/csv" => Some(DocumentKind::Csv),
            "application/pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }
}

/// Text and metadata pulled out of one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedDocument {
    /// Independently chunked bodies: one for plain text and PDF, one per CSV
    /// row (or a single one when rows are concatenated)
    pub sections: Vec<String>,
    pub source_url: Option<String>,
    pub metadata: Map<String, Value>,
}

impl ExtractedDocument {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|section| section.trim().is_empty())
    }

    /// Metadata as stored next to every vector, `None` if there is none
    #[inline]
    pub fn metadata_text(&self) -> Option<String> {
        if self.metadata.is_empty() {
            None
        } else {
            serde_json::to_string(&self.metadata).ok()
        }
    }

    /// Merge a `<key>.metadata.json` sidecar. Fields already taken from the
    /// document itself win; anything that is not a JSON object is ignored.
    #[inline]
    pub fn merge_sidecar(&mut self, sidecar: &[u8]) {
        let parsed: Map<String, Value> = match serde_json::from_slice(sidecar) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                debug!("Ignoring metadata sidecar that is not a JSON object");
                return;
            }
            Err(e) => {
                debug!("Ignoring unreadable metadata sidecar: {}", e);
                return;
            }
        };

        if self.source_url.is_none() {
            self.source_url = parsed
                .get("source_url")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        for (key, value) in parsed {
            self.metadata.entry(key).or_insert(value);
        }
    }
}

/// Location of the optional metadata sidecar of `document_uri`
#[inline]
pub fn sidecar_location(document_uri: &str) -> String {
    format!("{document_uri}.metadata.json")
}

/// Whether `key` names a metadata sidecar rather than a document
#[inline]
pub fn is_sidecar(key: &str) -> bool {
    key.ends_with(".metadata.json")
}

/// Extract the embeddable text of a document
#[inline]
pub fn extract(content: &[u8], kind: DocumentKind, concat_csv_rows: bool) -> Result<ExtractedDocument> {
    match kind {
        DocumentKind::PlainText => Ok(extract_plain_text(decode_text(content)?)),
        DocumentKind::Csv => extract_csv(decode_text(content)?, concat_csv_rows),
        DocumentKind::Pdf => extract_pdf(content),
    }
}

fn decode_text(content: &[u8]) -> Result<&str> {
    let text = std::str::from_utf8(content)
        .map_err(|e| IngestError::Extraction(format!("Document is not valid UTF-8: {e}")))?;
    Ok(text.trim_start_matches('\u{feff}'))
}

fn extract_plain_text(text: &str) -> ExtractedDocument {
    let mut document = ExtractedDocument::default();

    let body = match split_metadata_header(text) {
        Some((header, body)) => {
            document.source_url = header
                .lines()
                .map(str::trim)
                .find_map(|line| line.strip_prefix("URL:"))
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty());
            if !header.is_empty() {
                document
                    .metadata
                    .insert("header".to_string(), Value::String(header.to_string()));
            }
            if let Some(url) = &document.source_url {
                document
                    .metadata
                    .insert("source_url".to_string(), Value::String(url.clone()));
            }
            body
        }
        None => text,
    };

    let body = body.trim();
    if !body.is_empty() {
        document.sections.push(body.to_string());
    }
    document
}

/// Text layer of a PDF. Scanned PDFs without one yield an empty document.
fn extract_pdf(content: &[u8]) -> Result<ExtractedDocument> {
    let raw = pdf_extract::extract_text_from_mem(content)
        .map_err(|e| IngestError::Extraction(format!("Failed to read PDF: {e}")))?;

    let body = raw
        .replace('\0', "")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut document = ExtractedDocument::default();
    if body.is_empty() {
        debug!("PDF has no extractable text");
    } else {
        document.sections.push(body);
    }
    Ok(document)
}

/// `(header, body)` when `text` opens with a complete metadata block
fn split_metadata_header(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix(METADATA_OPEN)?;
    let (header, body) = rest.split_once(METADATA_CLOSE)?;
    Some((header.trim(), body))
}

fn extract_csv(text: &str, concat_csv_rows: bool) -> Result<ExtractedDocument> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| IngestError::Extraction(format!("Invalid CSV header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            IngestError::Extraction(format!("Invalid CSV row {}: {e}", index + 1))
        })?;

        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        if !row.trim().is_empty() {
            rows.push(row);
        }
    }

    let sections = if concat_csv_rows && !rows.is_empty() {
        vec![rows.join("\n")]
    } else {
        rows
    };

    Ok(ExtractedDocument {
        sections,
        ..ExtractedDocument::default()
    })
}
