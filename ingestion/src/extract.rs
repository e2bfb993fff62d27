//! MIME-driven text extraction for component C4 step 3. Plain text passes
//! through untouched; PDF and DOCX go through small in-tree extractors
//! standing in for "an external extractor through a port" (spec §4.4) —
//! the concrete binding to a real document-conversion service is out of
//! scope (§1), so this is the deterministic fallback.

use std::io::{Cursor, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Markdown,
    Json,
    Pdf,
    Docx,
    Unsupported,
}

pub fn detect_content_kind(mime_type: &str, filename: Option<&str>) -> ContentKind {
    let mime = mime_type.split(';').next().unwrap_or("").trim().to_lowercase();
    match mime.as_str() {
        "text/plain" => ContentKind::Text,
        "text/markdown" => ContentKind::Markdown,
        "application/json" => ContentKind::Json,
        "application/pdf" => ContentKind::Pdf,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ContentKind::Docx,
        _ => {
            if let Some(name) = filename {
                let ext = Path::new(name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                match ext.as_str() {
                    "txt" => ContentKind::Text,
                    "md" | "markdown" => ContentKind::Markdown,
                    "json" => ContentKind::Json,
                    "pdf" => ContentKind::Pdf,
                    "docx" => ContentKind::Docx,
                    _ => ContentKind::Unsupported,
                }
            } else {
                ContentKind::Unsupported
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("content is not valid UTF-8")]
    InvalidUtf8,
    #[error("PDF text extraction failed")]
    PdfExtraction,
    #[error("DOCX text extraction failed: {0}")]
    DocxExtraction(String),
    #[error("unsupported content type: {0}")]
    Unsupported(String),
}

pub fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::InvalidUtf8)
}

pub fn extract_pdf_text(bytes: &[u8]) -> Option<String> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) if !text.trim().is_empty() => Some(text),
        _ => None,
    }
}

/// Pulls the visible text runs out of `word/document.xml` inside the
/// OOXML zip container, stripping markup between `<w:t ...>` tags.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let reader = Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| ExtractError::DocxExtraction(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::DocxExtraction(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::DocxExtraction(e.to_string()))?;

    Ok(strip_text_runs(&xml))
}

/// Extracts content between `<w:t ...>` / `</w:t>` tags and unescapes the
/// handful of XML entities OOXML text runs actually use.
fn strip_text_runs(xml: &str) -> String {
    let mut out = String::new();
    let mut rest = xml;
    while let Some(open) = rest.find("<w:t") {
        let after_open = &rest[open..];
        let Some(tag_end) = after_open.find('>') else {
            break;
        };
        let is_self_closing = after_open[..tag_end].ends_with('/');
        if is_self_closing {
            rest = &after_open[tag_end + 1..];
            continue;
        }
        let body_start = tag_end + 1;
        let Some(close) = after_open[body_start..].find("</w:t>") else {
            break;
        };
        let body = &after_open[body_start..body_start + close];
        out.push_str(&unescape_xml(body));
        out.push(' ');
        rest = &after_open[body_start + close + "</w:t>".len()..];
    }
    out.trim().to_string()
}

fn unescape_xml(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}
