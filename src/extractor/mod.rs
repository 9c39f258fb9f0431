//! Content extractors turning a PDF artifact or a web page into plain text
//! plus ordered evidence snippets

mod browser;
mod pdf;
mod web;

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::model::{ExtractionConfig, SourceDocument, SourceKind};

pub use browser::{BrowserlessRenderer, PageRenderer};
pub use pdf::{PageOcr, PdfExtractor};
pub use web::WebExtractor;

pub const EMAIL_PLACEHOLDER: &str = "[REDACTED_EMAIL]";
pub const PHONE_PLACEHOLDER: &str = "[REDACTED_PHONE]";

/// Confidence of text read directly from the source
pub const DIRECT_TEXT_CONFIDENCE: f64 = 0.9;
/// Confidence of text recovered by optical recognition
pub const OCR_TEXT_CONFIDENCE: f64 = 0.75;

const MIN_PHONE_DIGITS: usize = 9;
const MAX_PHONE_DIGITS: usize = 15;
/// Longest separated digit group in a number written without a leading `+`
const MAX_PHONE_GROUP_DIGITS: usize = 4;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[\w.-]+@[\w.-]+\.\w+\b").expect("valid email regex")
});

// digits with dash/space separators on a single line
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?[0-9][0-9\- \t]{7,}[0-9]").expect("valid phone regex"));

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9]{4}-[0-9]{2}-[0-9]{2}\b").expect("valid date regex"));

static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("valid paragraph regex"));

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("{0}")]
    MissingInput(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    Status { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse PDF: {0}")]
    Pdf(String),

    #[error("Page render failed: {0}")]
    Render(String),

    #[error("Optical recognition failed: {0}")]
    Ocr(String),
}

/// Evidence snippet before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetDraft {
    pub text: String,
    /// `<kind>:<index>`, 1-based
    pub reference: String,
    pub confidence: f64,
}

/// Output contract shared by every extractor
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Redacted plain text
    pub text: String,
    pub snippets: Vec<SnippetDraft>,
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, source: &SourceDocument) -> Result<ExtractedContent, ExtractionError>;
}

/// Routes a source document to the extractor for its kind
pub struct ExtractorDispatcher {
    pdf: PdfExtractor,
    web: WebExtractor,
}

impl ExtractorDispatcher {
    pub fn new(config: &ExtractionConfig, ocr: Option<std::sync::Arc<dyn PageOcr>>) -> Self {
        let renderer = config.browserless_url.as_deref().map(|base| {
            tracing::info!(base_url = %base, "Browserless page rendering enabled");
            std::sync::Arc::new(BrowserlessRenderer::new(
                base,
                config.browserless_token.as_deref(),
                config.render_timeout_secs,
            )) as std::sync::Arc<dyn PageRenderer>
        });

        Self {
            pdf: PdfExtractor::new(config.clone(), ocr),
            web: WebExtractor::new(config.clone(), renderer),
        }
    }
}

#[async_trait]
impl ContentExtractor for ExtractorDispatcher {
    async fn extract(&self, source: &SourceDocument) -> Result<ExtractedContent, ExtractionError> {
        match source.kind {
            SourceKind::Pdf => self.pdf.extract(source).await,
            SourceKind::Url => self.web.extract(source).await,
        }
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Replace email addresses and phone numbers with fixed placeholders
pub fn redact_pii(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, EMAIL_PLACEHOLDER);

    let mut redacted = String::with_capacity(text.len());
    let mut last = 0;
    for m in PHONE_RE.find_iter(&text) {
        if !is_phone_number(&text, m.start(), m.end()) {
            continue;
        }
        redacted.push_str(&text[last..m.start()]);
        redacted.push_str(PHONE_PLACEHOLDER);
        last = m.end();
    }
    redacted.push_str(&text[last..]);
    redacted
}

/// Phone-shaped digits that are not a date, a bare long number, or part of
/// an identifier such as `CVE-2024-123456789`
fn is_phone_number(text: &str, start: usize, end: usize) -> bool {
    let candidate = &text[start..end];
    let digits = candidate.chars().filter(char::is_ascii_digit).count();
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) || ISO_DATE_RE.is_match(candidate)
    {
        return false;
    }

    let grouped = candidate
        .split(|c: char| !c.is_ascii_digit())
        .all(|group| group.len() <= MAX_PHONE_GROUP_DIGITS);
    let glued = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    let glued_before = text[..start].chars().next_back().is_some_and(glued);
    let glued_after = text[end..].chars().next().is_some_and(glued);

    (candidate.starts_with('+') || grouped) && !glued_before && !glued_after
}

/// Chunk text into paragraph snippets referenced `<prefix>:<n>`
pub fn split_snippets(
    text: &str,
    prefix: &str,
    max_snippets: usize,
    max_chars: usize,
) -> Vec<SnippetDraft> {
    PARAGRAPH_BREAK_RE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .take(max_snippets)
        .enumerate()
        .map(|(i, paragraph)| SnippetDraft {
            text: truncate_chars(paragraph, max_chars).to_string(),
            reference: format!("{}:{}", prefix, i + 1),
            confidence: DIRECT_TEXT_CONFIDENCE,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_email_and_phone() {
        let text = "Contact soc@example.com or +1 555-867-5309 for details.";
        assert_eq!(
            redact_pii(text),
            "Contact [REDACTED_EMAIL] or [REDACTED_PHONE] for details."
        );
    }

    #[test]
    fn test_identifiers_and_short_numbers_are_kept() {
        let text = "CVE-2024-123456789 was patched on 2024-05-01 in build 1234 5678.";
        assert_eq!(redact_pii(text), text);
    }

    #[test]
    fn test_dates_and_long_indicators_are_kept() {
        let text = "Active 2024-05-01 2024-06-01, seen 2024-05-01 14 times, sample id 4815162342108.";
        assert_eq!(redact_pii(text), text);

        let text = "Hotline +4420794609 58 stays redacted.";
        assert_eq!(redact_pii(text), "Hotline [REDACTED_PHONE] stays redacted.");
    }

    #[test]
    fn test_phone_does_not_swallow_paragraph_breaks() {
        let text = "Call 0044 20 7946 0958\n\n2025 outlook follows";
        let redacted = redact_pii(text);
        assert_eq!(redacted, "Call [REDACTED_PHONE]\n\n2025 outlook follows");
    }

    #[test]
    fn test_split_snippets_references_and_limits() {
        let text = "First paragraph.\n\n  \n\nSecond paragraph is longer.\n \nThird.";
        let snippets = split_snippets(text, "dom", 2, 6);

        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].reference, "dom:1");
        assert_eq!(snippets[0].text, "First ");
        assert_eq!(snippets[1].reference, "dom:2");
        assert_eq!(snippets[1].text, "Second");
        assert_eq!(snippets[1].confidence, 0.9);
    }

    #[test]
    fn test_single_newlines_stay_in_one_paragraph() {
        let snippets = split_snippets("line one\nline two", "page", 10, 100);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].text, "line one\nline two");
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
