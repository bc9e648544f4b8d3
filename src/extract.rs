//! PDF decoding for metadata extraction.
//!
//! `lopdf` parses the content streams of the first pages into text lines
//! tagged with their effective font size (the `Tf` size scaled by the
//! text matrix) and reads the `/Info` dictionary. When those lines do not
//! look like readable text, usually because of a custom font encoding,
//! `pdf-extract` supplies the body text instead. The heuristics in
//! [`paperweave_core::metadata`] then turn the result into [`Metadata`].
//!
//! Decoding runs on the blocking pool under a per-file timeout.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lopdf::content::Content;
use lopdf::{Document as PdfDocument, Object};
use paperweave_core::metadata::{
    decode_text_string, derive_metadata, text_quality, DocumentInfo, HeuristicLimits, LayoutLine,
    RawText,
};
use paperweave_core::models::Metadata;

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;

/// Below this share of ordinary characters the layout text is discarded.
const MIN_LAYOUT_QUALITY: f64 = 0.8;
/// `TJ` adjustments more negative than this are rendered as a space.
const TJ_SPACE_THRESHOLD: f64 = -200.0;

#[derive(Debug, Clone)]
pub struct Extractor {
    timeout: Duration,
    max_pages: u32,
    limits: HeuristicLimits,
}

impl Extractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_pages: config.max_pages,
            limits: config.limits(),
        }
    }

    /// Reads and decodes one file off the async runtime.
    pub async fn extract(&self, path: &Path) -> Result<Metadata, ExtractionError> {
        let path: PathBuf = path.to_path_buf();
        let max_pages = self.max_pages;
        let limits = self.limits.clone();

        let task = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path).map_err(|e| {
                ExtractionError::CorruptFile(format!("cannot read {}: {}", path.display(), e))
            })?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            extract_bytes(&bytes, &stem, max_pages, &limits)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ExtractionError::CorruptFile(format!(
                "extraction worker failed: {}",
                join
            ))),
            Err(_) => Err(ExtractionError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Decodes PDF bytes and derives metadata.
pub fn extract_bytes(
    bytes: &[u8],
    file_stem: &str,
    max_pages: u32,
    limits: &HeuristicLimits,
) -> Result<Metadata, ExtractionError> {
    let raw = read_raw_text(bytes, max_pages)?;
    Ok(derive_metadata(&raw, file_stem, limits))
}

/// Pulls layout lines, body text, `/Info` entries and the page count out
/// of a PDF.
pub fn read_raw_text(bytes: &[u8], max_pages: u32) -> Result<RawText, ExtractionError> {
    let parsed = PdfDocument::load_mem(bytes);

    let (mut layout, info, page_count) = match &parsed {
        Ok(doc) => (
            layout_lines(doc, max_pages),
            document_info(doc),
            doc.get_pages().len() as u32,
        ),
        Err(e) => {
            tracing::debug!(error = %e, "lopdf could not load file, trying pdf-extract");
            (Vec::new(), DocumentInfo::default(), 0)
        }
    };

    let layout_text = layout
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let body = if !layout.is_empty() && text_quality(&layout_text) >= MIN_LAYOUT_QUALITY {
        layout_text
    } else {
        // Garbled layout text would only mislead the title heuristics.
        layout.clear();
        match fallback_text(bytes) {
            Ok(text) => text,
            Err(reason) if parsed.is_err() => return Err(ExtractionError::CorruptFile(reason)),
            Err(reason) => {
                tracing::debug!(%reason, "pdf-extract failed on a loadable file");
                String::new()
            }
        }
    };

    if body.trim().is_empty() {
        return Err(ExtractionError::NoTextLayer);
    }

    Ok(RawText {
        layout,
        body,
        info,
        page_count,
    })
}

/// `pdf-extract` can panic on malformed input, so it runs under
/// `catch_unwind`.
fn fallback_text(bytes: &[u8]) -> Result<String, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("pdf-extract panicked".to_string()),
    }
}

fn document_info(doc: &PdfDocument) -> DocumentInfo {
    let dict = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_object(*id).and_then(Object::as_dict).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(dict) = dict else {
        return DocumentInfo::default();
    };

    let field = |key: &[u8]| -> Option<String> {
        let value = match dict.get(key).ok()? {
            Object::Reference(id) => doc.get_object(*id).ok()?,
            other => other,
        };
        match value {
            Object::String(bytes, _) => {
                let text = decode_text_string(bytes).trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            _ => None,
        }
    };

    DocumentInfo {
        title: field(b"Title"),
        author: field(b"Author"),
        keywords: field(b"Keywords"),
    }
}

fn layout_lines(doc: &PdfDocument, max_pages: u32) -> Vec<LayoutLine> {
    let mut lines = Vec::new();
    for (index, (_, page_id)) in doc.get_pages().into_iter().take(max_pages as usize).enumerate() {
        let content = match doc.get_page_content(page_id).and_then(|data| Content::decode(&data)) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(page = index, error = %e, "skipping undecodable page content");
                continue;
            }
        };
        let mut state = TextState::new(index as u32);
        for op in &content.operations {
            state.apply(&op.operator, &op.operands, &mut lines);
        }
        state.flush(&mut lines);
    }
    lines
}

/// Minimal text-object interpreter: tracks font size, text-matrix scale
/// and line breaks.
struct TextState {
    page: u32,
    font_size: f64,
    scale: f64,
    current: String,
}

impl TextState {
    fn new(page: u32) -> Self {
        Self {
            page,
            font_size: 0.0,
            scale: 1.0,
            current: String::new(),
        }
    }

    fn apply(&mut self, operator: &str, operands: &[Object], out: &mut Vec<LayoutLine>) {
        match operator {
            "BT" => {
                self.flush(out);
                self.scale = 1.0;
            }
            "ET" | "T*" => self.flush(out),
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    self.flush(out);
                    self.font_size = size.abs();
                }
            }
            "Tm" => {
                self.flush(out);
                let a = operands.first().and_then(number).unwrap_or(1.0);
                let d = operands.get(3).and_then(number).unwrap_or(1.0);
                self.scale = if d != 0.0 { d.abs() } else { a.abs().max(1.0) };
            }
            "Td" | "TD" => {
                let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                if ty != 0.0 {
                    self.flush(out);
                } else {
                    self.space();
                }
            }
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.push_bytes(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => self.push_bytes(bytes),
                            other => {
                                if number(other).is_some_and(|n| n < TJ_SPACE_THRESHOLD) {
                                    self.space();
                                }
                            }
                        }
                    }
                }
            }
            "'" => {
                self.flush(out);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.push_bytes(bytes);
                }
            }
            "\"" => {
                self.flush(out);
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.push_bytes(bytes);
                }
            }
            _ => {}
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.current.extend(bytes.iter().map(|b| *b as char));
    }

    fn space(&mut self) {
        if !self.current.is_empty() && !self.current.ends_with(' ') {
            self.current.push(' ');
        }
    }

    fn flush(&mut self, out: &mut Vec<LayoutLine>) {
        let text = self.current.split_whitespace().collect::<Vec<_>>().join(" ");
        self.current.clear();
        if text.is_empty() {
            return;
        }
        out.push(LayoutLine {
            page: self.page,
            text,
            font_size: self.font_size * self.scale,
        });
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}
