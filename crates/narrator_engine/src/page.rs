//! Page retrieval and readable-text extraction.
//!
//! `ConvertPage` jobs start from a URL; this module turns the URL into the
//! plain text and titles that seed the job record. Extraction is heuristic:
//! block elements of the best content container, in document order, joined
//! into paragraphs. A page that yields no text fails the conversion before a
//! provider call is ever made.

use std::collections::HashSet;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};

use crate::types::{FailureKind, SpeechError};

#[derive(Debug, Clone)]
pub struct PageSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
        }
    }
}

/// What a page contributes to a conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub url: String,
    pub page_title: String,
    pub article_title: Option<String>,
    pub text: String,
}

#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn load(&self, url: &str) -> Result<ExtractedPage, SpeechError>;
}

pub struct HttpPageSource {
    settings: PageSettings,
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(settings: PageSettings) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .build()
            .map_err(|err| SpeechError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }
}

#[async_trait::async_trait]
impl PageSource for HttpPageSource {
    async fn load(&self, url: &str) -> Result<ExtractedPage, SpeechError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| SpeechError::new(FailureKind::Extraction, err.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|err| SpeechError::new(FailureKind::Network, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeechError::new(
                FailureKind::Network,
                format!("page fetch failed: {status}"),
            ));
        }

        if let Some(ct) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
        {
            if !self.is_content_type_allowed(ct) {
                return Err(SpeechError::new(
                    FailureKind::Extraction,
                    format!("unsupported content type: {ct}"),
                ));
            }
        }

        if let Some(len) = response.content_length() {
            if len > self.settings.max_bytes {
                return Err(SpeechError::new(
                    FailureKind::Extraction,
                    format!("page over {} bytes", self.settings.max_bytes),
                ));
            }
        }

        let final_url = response.url().to_string();
        let html = response
            .text()
            .await
            .map_err(|err| SpeechError::new(FailureKind::Network, err.to_string()))?;
        if html.len() as u64 > self.settings.max_bytes {
            return Err(SpeechError::new(
                FailureKind::Extraction,
                format!("page over {} bytes", self.settings.max_bytes),
            ));
        }

        let readable = extract_readable(&html);
        if readable.text.is_empty() {
            return Err(SpeechError::new(
                FailureKind::Extraction,
                "no readable text on page",
            ));
        }

        Ok(ExtractedPage {
            url: final_url,
            page_title: readable.page_title.unwrap_or_else(|| url.to_string()),
            article_title: readable.article_title,
            text: readable.text,
        })
    }
}

pub(crate) struct ReadablePage {
    pub page_title: Option<String>,
    pub article_title: Option<String>,
    pub text: String,
}

/// Readability-like extraction:
/// - page title from `<title>`
/// - article title from `og:title`, else the first `<h1>`
/// - text from block elements of `<article>`, else `<main>`, else `<body>`,
///   joined with blank lines in document order.
pub(crate) fn extract_readable(html: &str) -> ReadablePage {
    let doc = Html::parse_document(html);

    let page_title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .map(element_text)
        .filter(|t| !t.is_empty());

    let og_title = Selector::parse(r#"meta[property="og:title"]"#)
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .and_then(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|t| !t.is_empty());
    let article_title = og_title.or_else(|| {
        Selector::parse("h1")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(element_text)
            .filter(|t| !t.is_empty())
    });

    let container = ["article", "main", "body"]
        .iter()
        .filter_map(|name| Selector::parse(name).ok())
        .find_map(|sel| doc.select(&sel).next());

    let text = container.map(container_text).unwrap_or_default();

    ReadablePage {
        page_title,
        article_title,
        text,
    }
}

/// Chrome elements whose text is navigation noise, not article content.
const NOISE_ELEMENTS: &[&str] = &["nav", "header", "footer", "aside"];

fn container_text(container: ElementRef<'_>) -> String {
    let Ok(blocks) =
        Selector::parse("h1, h2, h3, h4, h5, h6, p, li, blockquote, pre, figcaption")
    else {
        return visible_text(container);
    };

    let matched: Vec<ElementRef<'_>> = container.select(&blocks).collect();
    if matched.is_empty() {
        return visible_text(container);
    }

    // Nested matches (a <p> inside a <blockquote>) would duplicate text;
    // keep only the outermost of each matched subtree, and drop blocks
    // sitting inside page chrome.
    let ids: HashSet<_> = matched.iter().map(|el| el.id()).collect();
    let nested_or_noise = |el: &ElementRef<'_>| {
        el.ancestors().any(|node| {
            ids.contains(&node.id())
                || ElementRef::wrap(node)
                    .is_some_and(|ancestor| NOISE_ELEMENTS.contains(&ancestor.value().name()))
        })
    };

    let mut paragraphs = Vec::new();
    for el in &matched {
        if nested_or_noise(el) {
            continue;
        }
        let text = element_text(*el);
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }
    paragraphs.join("\n\n")
}

/// Descendant text with script/style/noise subtrees left out. Fallback for
/// documents without any block elements.
fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_visible(el, &mut out);
    collapse_whitespace(&out)
}

fn collect_visible(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if name == "script" || name == "style" || name == "noscript" {
                continue;
            }
            if NOISE_ELEMENTS.contains(&name) {
                continue;
            }
            collect_visible(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            out.push(' ');
            out.push_str(text);
        }
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
