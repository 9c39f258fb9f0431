//! Web page extraction with readability-style main content detection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{
    ContentExtractor, ExtractedContent, ExtractionError, PageRenderer, redact_pii, split_snippets,
};
use crate::model::{ExtractionConfig, SourceDocument, SourceKind};

const USER_AGENT: &str = "threat-risk-intel/1.0";

/// Semantic containers tried before paragraph scoring
const CONTAINER_SELECTORS: &[&str] = &["article", "main", "[role=\"main\"]"];
const BLOCK_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, p, li, blockquote, pre";
const BLOCK_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre"];
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];
/// Paragraphs shorter than this do not count towards a container's score
const MIN_SCORED_PARAGRAPH_CHARS: usize = 25;

pub struct WebExtractor {
    client: Client,
    insecure_client: Client,
    renderer: Option<Arc<dyn PageRenderer>>,
    config: ExtractionConfig,
}

impl WebExtractor {
    pub fn new(config: ExtractionConfig, renderer: Option<Arc<dyn PageRenderer>>) -> Self {
        let timeout = Duration::from_secs(config.fetch_timeout_secs);
        Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            insecure_client: Client::builder()
                .user_agent(USER_AGENT)
                .timeout(timeout)
                .danger_accept_invalid_certs(true)
                .build()
                .unwrap_or_else(|_| Client::new()),
            renderer,
            config,
        }
    }

    /// Rendered page first, then a direct fetch; the only retry is an
    /// unverified fetch after a certificate verification failure
    async fn fetch_html(&self, url: &Url) -> Result<String, ExtractionError> {
        if let Some(ref renderer) = self.renderer {
            match renderer.render(url).await {
                Ok(html) if !html.trim().is_empty() => return Ok(html),
                Ok(_) => tracing::warn!(url = %url, "Renderer returned an empty page"),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Page render failed, fetching directly")
                }
            }
        }

        match self.fetch_with(&self.client, url).await {
            Err(ExtractionError::Http(e)) if is_certificate_error(&e) => {
                tracing::warn!(
                    url = %url,
                    error = %e,
                    "Certificate verification failed, retrying without verification"
                );
                self.fetch_with(&self.insecure_client, url).await
            }
            other => other,
        }
    }

    async fn fetch_with(&self, client: &Client, url: &Url) -> Result<String, ExtractionError> {
        tracing::debug!(url = %url, "Fetching web page");

        let response = client.get(url.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(ExtractionError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }

    fn parse_page(&self, html: &str, url: &Url) -> ExtractedContent {
        let document = Html::parse_document(html);

        let main = readable_text(&document);
        let text = if main.chars().count() < self.config.min_main_content_chars {
            tracing::debug!(
                url = %url,
                main_length = main.len(),
                "Main content too short, using whole page"
            );
            page_text(&document)
        } else {
            main
        };

        let text = redact_pii(text.trim());
        let snippets = split_snippets(
            &text,
            SourceKind::Url.evidence_prefix(),
            self.config.max_paragraph_snippets,
            self.config.max_snippet_chars,
        );

        ExtractedContent {
            title: extract_title(&document),
            publisher: url.host_str().map(String::from),
            published_at: extract_published(&document),
            text,
            snippets,
        }
    }
}

#[async_trait]
impl ContentExtractor for WebExtractor {
    async fn extract(&self, source: &SourceDocument) -> Result<ExtractedContent, ExtractionError> {
        let raw = source
            .origin
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                ExtractionError::MissingInput("Missing source URL for URL ingestion".to_string())
            })?;
        let url = Url::parse(raw).map_err(|e| ExtractionError::InvalidUrl(format!("{raw}: {e}")))?;

        let html = self.fetch_html(&url).await?;
        let content = self.parse_page(&html, &url);

        tracing::info!(
            url = %url,
            snippets = content.snippets.len(),
            text_length = content.text.len(),
            "Extracted web page content"
        );
        Ok(content)
    }
}

fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> =
        Some(err as &(dyn std::error::Error + 'static));
    while let Some(e) = source {
        if is_certificate_message(&e.to_string()) {
            return true;
        }
        source = e.source();
    }
    false
}

fn is_certificate_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("certificate verify failed")
        || message.contains("invalid peer certificate")
        || message.contains("certificate has expired")
        || message.contains("self signed certificate")
        || message.contains("unable to get local issuer certificate")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Text of the block elements under `root`, one paragraph per block
fn block_text(root: ElementRef) -> String {
    let Ok(selector) = Selector::parse(BLOCK_SELECTOR) else {
        return String::new();
    };

    root.select(&selector)
        .filter(|block| !inside_block(*block, root))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn inside_block(element: ElementRef, root: ElementRef) -> bool {
    element
        .ancestors()
        .take_while(|node| node.id() != root.id())
        .filter_map(ElementRef::wrap)
        .any(|a| BLOCK_TAGS.contains(&a.value().name()))
}

/// Readable region: a semantic container, else the element holding the most paragraph text
fn readable_text(document: &Html) -> String {
    for container in CONTAINER_SELECTORS {
        if let Ok(selector) = Selector::parse(container)
            && let Some(element) = document.select(&selector).next()
        {
            let text = block_text(element);
            if !text.is_empty() {
                return text;
            }
        }
    }

    let Ok(paragraphs) = Selector::parse("p") else {
        return String::new();
    };

    let mut order = Vec::new();
    let mut scores = HashMap::new();
    for paragraph in document.select(&paragraphs) {
        let length = element_text(paragraph).chars().count();
        if length < MIN_SCORED_PARAGRAPH_CHARS {
            continue;
        }
        let Some(parent) = paragraph.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let score = scores.entry(parent.id()).or_insert_with(|| {
            order.push(parent);
            0
        });
        *score += length;
    }

    let mut best: Option<(ElementRef, usize)> = None;
    for candidate in order {
        let score = scores.get(&candidate.id()).copied().unwrap_or(0);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }

    best.map(|(element, _)| block_text(element)).unwrap_or_default()
}

/// Whole-page text: body blocks, else every visible text node
fn page_text(document: &Html) -> String {
    if let Ok(selector) = Selector::parse("body")
        && let Some(body) = document.select(&selector).next()
    {
        let text = block_text(body);
        if !text.is_empty() {
            return text;
        }
    }

    visible_text(document.root_element())
}

fn visible_text(root: ElementRef) -> String {
    root.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent().and_then(ElementRef::wrap)?;
            if HIDDEN_TAGS.contains(&parent.value().name()) {
                return None;
            }
            let text = collapse_whitespace(text);
            (!text.is_empty()).then_some(text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_title(document: &Html) -> Option<String> {
    for (selector, attr) in [
        ("title", None),
        ("meta[property=\"og:title\"]", Some("content")),
        ("h1", None),
    ] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };
        let title = match attr {
            Some(attr) => element.value().attr(attr).map(collapse_whitespace),
            None => Some(element_text(element)),
        };
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            return Some(title);
        }
    }
    None
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_published(document: &Html) -> Option<DateTime<Utc>> {
    meta_content(document, "meta[property=\"article:published_time\"]")
        .or_else(|| meta_content(document, "meta[name=\"date\"]"))
        .or_else(|| meta_content(document, "meta[name=\"dc.date\"]"))
        .and_then(|date| parse_date(&date))
}

fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(date_str) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    for fmt in formats {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(date_str, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }

    let date_formats = ["%Y-%m-%d", "%B %d, %Y", "%d %B %Y"];
    for fmt in date_formats {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, fmt)
            && let Some(midnight) = date.and_hms_opt(0, 0, 0)
        {
            return Some(DateTime::from_naive_utc_and_offset(midnight, Utc));
        }
    }

    None
}
