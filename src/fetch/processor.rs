//! Page processors
//!
//! A downloaded page is dispatched to a processor by its doc-type tag.
//! The registry is built once at startup from the configured doc types;
//! there is no runtime type-name resolution. Each processor turns a raw
//! body into the summary fields, term scores, and outgoing links the rest
//! of the pipeline works with.

use scraper::{Html, Selector};
use std::collections::HashMap;
use url::Url;

/// Terms kept per page, by descending score
const MAX_TERMS_PER_PAGE: usize = 50;

/// Minimum length for an indexable term
const MIN_TERM_LEN: usize = 3;

/// Characters of body text kept as the summary description
const DESCRIPTION_LEN: usize = 250;

/// A completed download, before processing
#[derive(Debug, Clone)]
pub struct DownloadedPage {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    /// Etag response header, reported back for the server's etag cache
    pub etag: Option<String>,
    /// Expires response header, same destination
    pub expires: Option<String>,
    /// Peer address the response came from, reported with robots uploads
    pub remote_addr: Option<String>,
    pub body: String,
}

/// Processor output: everything the indexing pipeline needs from one page
#[derive(Debug, Clone)]
pub struct ProcessedPage {
    pub title: String,
    pub description: String,
    pub word_count: u32,
    /// `(term, score)` pairs, score = term frequency over page length
    pub term_scores: Vec<(String, f32)>,
    /// Absolute outgoing link URLs
    pub links: Vec<String>,
}

/// A handler for one doc-type tag
pub trait PageProcessor: Send + Sync {
    /// Processes a page; None means the body was unusable
    fn process(&self, page: &DownloadedPage) -> Option<ProcessedPage>;
}

/// Maps a Content-Type header to the registry's doc-type tag
pub fn doc_tag_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => Some("html"),
        "text/plain" => Some("text"),
        "application/xml" | "text/xml" => Some("sitemap"),
        _ => None,
    }
}

/// Doc-type tag to handler map, built once at startup
pub struct ProcessorRegistry {
    handlers: HashMap<String, Box<dyn PageProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        ProcessorRegistry {
            handlers: HashMap::new(),
        }
    }

    /// The standard registry: HTML, plain text, and sitemaps
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("html", Box::new(HtmlProcessor));
        registry.register("text", Box::new(TextProcessor));
        registry.register("sitemap", Box::new(SitemapProcessor));
        registry
    }

    pub fn register(&mut self, tag: &str, handler: Box<dyn PageProcessor>) {
        self.handlers.insert(tag.to_string(), handler);
    }

    /// Dispatches a page to the handler for its content type
    ///
    /// None when no handler covers the type or the body was unusable.
    pub fn process(&self, page: &DownloadedPage) -> Option<ProcessedPage> {
        let tag = doc_tag_for(&page.content_type)?;
        self.handlers.get(tag)?.process(page)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// HTML handler: title, meta description, body terms, anchor links
pub struct HtmlProcessor;

impl PageProcessor for HtmlProcessor {
    fn process(&self, page: &DownloadedPage) -> Option<ProcessedPage> {
        let document = Html::parse_document(&page.body);
        let base = Url::parse(&page.url).ok()?;

        let title_selector = Selector::parse("title").ok()?;
        let title = document
            .select(&title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let meta_selector = Selector::parse(r#"meta[name="description"]"#).ok()?;
        let meta_description = document
            .select(&meta_selector)
            .next()
            .and_then(|m| m.value().attr("content"))
            .map(str::to_string);

        let body_selector = Selector::parse("body").ok()?;
        let text: String = document
            .select(&body_selector)
            .next()
            .map(|b| b.text().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();

        let description = meta_description
            .unwrap_or_else(|| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .chars()
            .take(DESCRIPTION_LEN)
            .collect();

        let link_selector = Selector::parse("a[href]").ok()?;
        let mut links = Vec::new();
        for anchor in document.select(&link_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = base.join(href) else {
                continue;
            };
            if resolved.scheme() == "http" || resolved.scheme() == "https" {
                let mut resolved = resolved;
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
        links.dedup();

        let (term_scores, word_count) = term_scores(&text);
        Some(ProcessedPage {
            title,
            description,
            word_count,
            term_scores,
            links,
        })
    }
}

/// Plain-text handler: no links, first line as title
pub struct TextProcessor;

impl PageProcessor for TextProcessor {
    fn process(&self, page: &DownloadedPage) -> Option<ProcessedPage> {
        let title = page
            .body
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        let description = page.body.chars().take(DESCRIPTION_LEN).collect();
        let (term_scores, word_count) = term_scores(&page.body);

        Some(ProcessedPage {
            title,
            description,
            word_count,
            term_scores,
            links: Vec::new(),
        })
    }
}

/// Sitemap handler: `<loc>` URLs only, nothing indexable
///
/// The `<loc>` elements of the sitemap format are rigid enough to scan
/// for directly, like the Crawl-delay directive in robots.txt. Links come
/// out in file order; the caller weights them by position.
pub struct SitemapProcessor;

impl PageProcessor for SitemapProcessor {
    fn process(&self, page: &DownloadedPage) -> Option<ProcessedPage> {
        let mut links = Vec::new();
        let mut rest = page.body.as_str();
        while let Some(start) = rest.find("<loc>") {
            rest = &rest[start + 5..];
            let Some(end) = rest.find("</loc>") else {
                break;
            };
            let loc = rest[..end].trim();
            if loc.starts_with("http://") || loc.starts_with("https://") {
                links.push(loc.to_string());
            }
            rest = &rest[end + 6..];
        }
        if links.is_empty() {
            return None;
        }

        Some(ProcessedPage {
            title: String::new(),
            description: String::new(),
            word_count: 0,
            term_scores: Vec::new(),
            links,
        })
    }
}

/// Term frequencies over the page text
///
/// Scores are term count over total word count, so they are comparable
/// across pages of different lengths. Only the top terms are kept.
fn term_scores(text: &str) -> (Vec<(String, f32)>, u32) {
    let mut counts: HashMap<String, u32> = HashMap::new();
    let mut total = 0u32;
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();
        if word.len() < MIN_TERM_LEN {
            continue;
        }
        total += 1;
        *counts.entry(word).or_insert(0) += 1;
    }
    if total == 0 {
        return (Vec::new(), 0);
    }

    let mut scored: Vec<(String, f32)> = counts
        .into_iter()
        .map(|(term, count)| (term, count as f32 / total as f32))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(MAX_TERMS_PER_PAGE);
    (scored, total)
}
