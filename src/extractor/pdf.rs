//! PDF text extraction, one evidence snippet per page

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lopdf::{Dictionary, Document, Object};

use super::{
    ContentExtractor, DIRECT_TEXT_CONFIDENCE, ExtractedContent, ExtractionError,
    OCR_TEXT_CONFIDENCE, SnippetDraft, redact_pii, split_snippets, truncate_chars,
};
use crate::model::{ExtractionConfig, SourceDocument, SourceKind};

/// Optical recognition for pages that carry no text layer
pub trait PageOcr: Send + Sync {
    fn recognize(&self, pdf: &[u8], page_number: u32) -> Result<String, ExtractionError>;
}

pub struct PdfExtractor {
    config: ExtractionConfig,
    ocr: Option<Arc<dyn PageOcr>>,
}

/// Text of one page and whether it came from optical recognition
#[derive(Debug, Clone, PartialEq)]
struct PageText {
    number: u32,
    text: String,
    via_ocr: bool,
}

#[derive(Debug, Default)]
struct PdfInfo {
    title: Option<String>,
    author: Option<String>,
    created: Option<DateTime<Utc>>,
}

impl PdfExtractor {
    pub fn new(config: ExtractionConfig, ocr: Option<Arc<dyn PageOcr>>) -> Self {
        Self { config, ocr }
    }

    /// Parse PDF bytes; CPU bound, run off the async executor
    pub fn extract_bytes(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionError> {
        let document =
            Document::load_mem(bytes).map_err(|e| ExtractionError::Pdf(e.to_string()))?;

        let pages: Vec<(u32, String)> = document
            .get_pages()
            .keys()
            .map(|&number| {
                let text = document.extract_text(&[number]).unwrap_or_else(|e| {
                    tracing::debug!(page = number, error = %e, "No text layer on page");
                    String::new()
                });
                (number, text)
            })
            .collect();

        let page_texts = collect_page_texts(pages, |number| {
            let ocr = self.ocr.as_ref()?;
            match ocr.recognize(bytes, number) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(page = number, error = %e, "Optical recognition failed");
                    None
                }
            }
        });

        let info = read_info(&document);
        Ok(assemble(page_texts, info, &self.config))
    }
}

#[async_trait]
impl ContentExtractor for PdfExtractor {
    async fn extract(&self, source: &SourceDocument) -> Result<ExtractedContent, ExtractionError> {
        let path = source
            .origin
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                ExtractionError::MissingInput("Missing artifact path for PDF ingestion".to_string())
            })?;

        tracing::debug!(path = %path, "Reading PDF artifact");
        let bytes = tokio::fs::read(path).await?;

        let extractor = PdfExtractor::new(self.config.clone(), self.ocr.clone());
        let content = tokio::task::spawn_blocking(move || extractor.extract_bytes(&bytes))
            .await
            .map_err(|e| ExtractionError::Pdf(format!("PDF worker panicked: {}", e)))??;

        tracing::info!(
            path = %path,
            snippets = content.snippets.len(),
            text_length = content.text.len(),
            "Extracted PDF content"
        );
        Ok(content)
    }
}

/// Trim each page, falling back to recognition for pages without text
fn collect_page_texts(
    pages: Vec<(u32, String)>,
    mut recognize: impl FnMut(u32) -> Option<String>,
) -> Vec<PageText> {
    pages
        .into_iter()
        .filter_map(|(number, raw)| {
            let direct = raw.trim();
            if !direct.is_empty() {
                return Some(PageText {
                    number,
                    text: direct.to_string(),
                    via_ocr: false,
                });
            }
            let recognized = recognize(number)?;
            let recognized = recognized.trim();
            (!recognized.is_empty()).then(|| PageText {
                number,
                text: recognized.to_string(),
                via_ocr: true,
            })
        })
        .collect()
}

fn assemble(pages: Vec<PageText>, info: PdfInfo, config: &ExtractionConfig) -> ExtractedContent {
    let full_text = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let text = redact_pii(full_text.trim());

    let mut snippets: Vec<SnippetDraft> = pages
        .iter()
        .map(|page| SnippetDraft {
            text: truncate_chars(&redact_pii(&page.text), config.max_page_snippet_chars)
                .to_string(),
            reference: format!("{}:{}", SourceKind::Pdf.evidence_prefix(), page.number),
            confidence: if page.via_ocr {
                OCR_TEXT_CONFIDENCE
            } else {
                DIRECT_TEXT_CONFIDENCE
            },
        })
        .collect();

    if snippets.is_empty() && !text.is_empty() {
        snippets = split_snippets(
            &text,
            SourceKind::Pdf.evidence_prefix(),
            config.max_paragraph_snippets,
            config.max_snippet_chars,
        );
    }

    ExtractedContent {
        title: info.title,
        publisher: info.author,
        published_at: info.created,
        text,
        snippets,
    }
}

fn read_info(document: &Document) -> PdfInfo {
    let Some(info) = info_dictionary(document) else {
        return PdfInfo::default();
    };

    let field = |key: &[u8]| {
        info.get(key)
            .ok()
            .and_then(pdf_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    PdfInfo {
        title: field(b"Title"),
        author: field(b"Author"),
        created: field(b"CreationDate").and_then(|d| parse_pdf_date(&d)),
    }
}

fn info_dictionary(document: &Document) -> Option<&Dictionary> {
    match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// Decode a PDF text string, UTF-16BE when it carries a byte-order mark
fn pdf_string(object: &Object) -> Option<String> {
    let Object::String(bytes, _) = object else {
        return None;
    };

    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&units));
    }

    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// `D:YYYYMMDD...` date prefix
fn parse_pdf_date(raw: &str) -> Option<DateTime<Utc>> {
    let digits = raw.strip_prefix("D:").unwrap_or(raw);
    let date = NaiveDate::parse_from_str(digits.get(..8)?, "%Y%m%d").ok()?;
    Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use lopdf::StringFormat;

    fn page(number: u32, text: &str) -> (u32, String) {
        (number, text.to_string())
    }

    #[test]
    fn test_empty_pages_use_recognition_when_available() {
        let pages = vec![page(1, "  Intro text  "), page(2, ""), page(3, "   ")];

        let texts = collect_page_texts(pages, |n| (n == 2).then(|| "scanned page".to_string()));

        assert_eq!(texts.len(), 2);
        assert_eq!(texts[0].text, "Intro text");
        assert!(!texts[0].via_ocr);
        assert_eq!(texts[1].number, 2);
        assert!(texts[1].via_ocr);
    }

    #[test]
    fn test_pages_without_text_are_skipped_without_recognition() {
        let texts = collect_page_texts(vec![page(1, ""), page(2, "body")], |_| None);
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].number, 2);
    }

    #[test]
    fn test_assemble_page_snippets() {
        let config = ExtractionConfig {
            max_page_snippet_chars: 10,
            ..Default::default()
        };
        let pages = vec![
            PageText { number: 1, text: "Mail analyst@corp.example today".into(), via_ocr: false },
            PageText { number: 3, text: "Scanned".into(), via_ocr: true },
        ];

        let content = assemble(pages, PdfInfo::default(), &config);

        assert_eq!(content.snippets.len(), 2);
        assert_eq!(content.snippets[0].reference, "page:1");
        assert_eq!(content.snippets[0].text, "Mail [REDA");
        assert_eq!(content.snippets[0].confidence, 0.9);
        assert_eq!(content.snippets[1].reference, "page:3");
        assert_eq!(content.snippets[1].confidence, 0.75);
        assert_eq!(content.text, "Mail [REDACTED_EMAIL] today\n\nScanned");
        assert_eq!(content.title, None);
    }

    #[test]
    fn test_pdf_string_decoding() {
        let utf16 = Object::String(
            vec![0xFE, 0xFF, 0x00, b'Q', 0x00, b'3'],
            StringFormat::Hexadecimal,
        );
        assert_eq!(pdf_string(&utf16).as_deref(), Some("Q3"));

        let literal = Object::String(b"Threat Report".to_vec(), StringFormat::Literal);
        assert_eq!(pdf_string(&literal).as_deref(), Some("Threat Report"));

        assert_eq!(pdf_string(&Object::Integer(4)), None);
    }

    #[test]
    fn test_parse_pdf_date() {
        let date = parse_pdf_date("D:20240315093000+01'00'").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 3, 15));
        assert!(parse_pdf_date("D:2024").is_none());
    }

    #[test]
    fn test_invalid_bytes_are_a_parse_error() {
        let extractor = PdfExtractor::new(ExtractionConfig::default(), None);
        let err = extractor.extract_bytes(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractionError::Pdf(_)));
    }
}
