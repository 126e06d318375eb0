// src/adapters/scrape.rs
//! Structured-scrape adapter: applies the source's configured CSS selectors
//! to a listing page to find (title, link) pairs, and pulls readable text
//! out of linked pages on demand.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::debug;

use crate::credentials::CredentialStore;
use crate::error::{FetchError, Result};
use crate::model::{RawItem, ScrapeSelectors, Source};

use super::{cookie_for, normalize_text, FetchAdapter, PageFetcher};

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| FetchError::Parse(format!("invalid selector `{raw}`: {e}")))
}

/// Apply the configured selectors to listing HTML. Relative links resolve
/// against the listing URL; duplicates collapse to the first sighting.
pub fn extract_listing(
    html: &str,
    selectors: &ScrapeSelectors,
    base_url: &str,
) -> Result<Vec<(String, String)>> {
    let item_sel = parse_selector(&selectors.item)?;
    let title_sel = parse_selector(&selectors.title)?;
    let link_sel = parse_selector(&selectors.link)?;
    let base = reqwest::Url::parse(base_url).ok();

    let doc = Html::parse_document(html);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for item in doc.select(&item_sel) {
        let title = match item.select(&title_sel).next() {
            Some(t) => normalize_text(&t.text().collect::<String>()),
            None => continue,
        };
        let href = item
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);
        let Some(href) = href else { continue };
        if title.is_empty() {
            continue;
        }

        let resolved = if href.starts_with("http://") || href.starts_with("https://") {
            href
        } else if let Some(ref b) = base {
            match b.join(&href) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        } else {
            continue;
        };

        if seen.insert(resolved.clone()) {
            out.push((title, resolved));
        }
    }

    if out.is_empty() {
        return Err(FetchError::Parse(format!(
            "selector `{}` matched no items",
            selectors.item
        )));
    }
    Ok(out)
}

/// Readable-text extraction for a fetched article page.
pub fn extract_text(html: &str) -> String {
    use std::sync::OnceLock;
    static BODY_SELECTOR: OnceLock<Selector> = OnceLock::new();
    static TEXT_SELECTOR: OnceLock<Selector> = OnceLock::new();

    let body_selector =
        BODY_SELECTOR.get_or_init(|| Selector::parse("body").expect("static selector"));
    let text_selector = TEXT_SELECTOR.get_or_init(|| {
        Selector::parse("article p, article h1, article h2, p, h1, h2, h3, li")
            .expect("static selector")
    });

    let doc = Html::parse_document(html);
    let mut text = String::new();
    if let Some(body) = doc.select(body_selector).next() {
        let mut seen = std::collections::HashSet::new();
        for element in body.select(text_selector) {
            let chunk: String = element.text().collect();
            let trimmed = chunk.trim();
            // Nested matches (article p vs p) would double every paragraph.
            if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
                text.push_str(trimmed);
                text.push('\n');
            }
        }
    }
    text.trim().to_string()
}

fn page_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("title, h1").expect("static selector");
    doc.select(&sel)
        .next()
        .map(|t| normalize_text(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

pub struct ScrapeAdapter {
    pages: Arc<dyn PageFetcher>,
    creds: Arc<CredentialStore>,
}

impl ScrapeAdapter {
    pub fn new(pages: Arc<dyn PageFetcher>, creds: Arc<CredentialStore>) -> Self {
        Self { pages, creds }
    }
}

#[async_trait]
impl FetchAdapter for ScrapeAdapter {
    async fn list_candidates(&self, source: &Source) -> Result<Vec<RawItem>> {
        let selectors = source.selectors.as_ref().ok_or_else(|| {
            FetchError::Parse("scrape source is missing its selectors".to_string())
        })?;
        let cookie = cookie_for(source, &self.creds)?;
        let html = self.pages.get(&source.url, cookie.as_deref()).await?;
        let pairs = extract_listing(&html, selectors, &source.url)?;
        debug!(source = %source.id, found = pairs.len(), "listing extracted");

        Ok(pairs
            .into_iter()
            .map(|(title, link)| RawItem {
                title,
                url: Some(link),
                ..Default::default()
            })
            .collect())
    }

    async fn fetch_one(&self, source: &Source, url: &str) -> Result<RawItem> {
        let cookie = cookie_for(source, &self.creds)?;
        let html = self.pages.get(url, cookie.as_deref()).await?;
        let content = extract_text(&html);
        if content.is_empty() {
            return Err(FetchError::Parse(format!("no readable text at {url}")));
        }
        Ok(RawItem {
            title: page_title(&html).unwrap_or_else(|| url.to_string()),
            url: Some(url.to_string()),
            content,
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "scrape"
    }
}
