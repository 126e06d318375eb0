// src/enrich.rs
//! Enrichment pipeline: optional full-text retrieval plus AI summarization
//! on top of adapter output. Enrichment never fails a job; every failure
//! here degrades the item's fields and nothing else.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::FetchAdapter;
use crate::dedup::content_hash;
use crate::model::{Article, RawItem, Source, SummaryStatus};

/// Output of the external summarization collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, content: &str) -> anyhow::Result<Summary>;
    fn name(&self) -> &'static str;
}

pub type SharedSummarizer = Arc<dyn Summarizer>;

/// Deterministic summarizer for tests and local runs.
pub struct MockSummarizer {
    pub fixed: Summary,
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, _title: &str, _content: &str) -> anyhow::Result<Summary> {
        Ok(self.fixed.clone())
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// HTTP summarizer speaking a chat-completions style API. Endpoint and key
/// come from `SUMMARIZER_URL` / `SUMMARIZER_API_KEY`.
pub struct HttpSummarizer {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpSummarizer {
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SUMMARIZER_URL").ok()?;
        let api_key = std::env::var("SUMMARIZER_API_KEY").unwrap_or_default();
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Some(Self { http, url, api_key })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, title: &str, content: &str) -> anyhow::Result<Summary> {
        #[derive(Serialize)]
        struct Req<'a> {
            title: &'a str,
            content: &'a str,
        }

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&Req { title, content })
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("summarizer status {}", resp.status().as_u16());
        }
        Ok(resp.json::<Summary>().await?)
    }
    fn name(&self) -> &'static str {
        "http"
    }
}

/// Adapter output short enough, or visibly cut off, to warrant a dedicated
/// full-text fetch.
pub fn looks_truncated(content: &str) -> bool {
    let trimmed = content.trim_end();
    trimmed.chars().count() < 500
        || trimmed.ends_with('…')
        || trimmed.ends_with("[...]")
        || trimmed.to_ascii_lowercase().ends_with("read more")
}

#[derive(Debug, Clone)]
pub struct EnrichedItem {
    pub raw: RawItem,
    pub summary: Option<Summary>,
    pub summary_status: SummaryStatus,
}

/// Before/after field sets for a single-article refresh. Computation and
/// commit are separate steps so a caller can present the diff first.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshProposal {
    pub prior: Article,
    pub proposed: Article,
}

pub struct EnrichmentPipeline {
    summarizer: Option<SharedSummarizer>,
}

impl EnrichmentPipeline {
    pub fn new(summarizer: Option<SharedSummarizer>) -> Self {
        Self { summarizer }
    }

    pub async fn enrich(
        &self,
        mut item: RawItem,
        source: &Source,
        adapter: &dyn FetchAdapter,
    ) -> EnrichedItem {
        // Full-text step: only when requested and the adapter output looks
        // truncated. Failure keeps the adapter's original content.
        if source.fetch_full_text && looks_truncated(&item.content) {
            if let Some(url) = item.url.clone() {
                match adapter.fetch_one(source, &url).await {
                    Ok(full) if full.content.chars().count() > item.content.chars().count() => {
                        item.content = full.content;
                        if item.title.is_empty() {
                            item.title = full.title;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(url, error = %e, "full-text fetch failed, keeping adapter content")
                    }
                }
            }
        }

        let (summary, summary_status) = match &self.summarizer {
            None => (None, SummaryStatus::Pending),
            Some(_) if item.content.is_empty() => (None, SummaryStatus::Pending),
            Some(s) => match s.summarize(&item.title, &item.content).await {
                Ok(summary) => (Some(summary), SummaryStatus::Completed),
                Err(e) => {
                    warn!(title = %item.title, error = %e, "summarization failed");
                    (None, SummaryStatus::Failed)
                }
            },
        };

        EnrichedItem {
            raw: item,
            summary,
            summary_status,
        }
    }

    /// Re-run enrichment for one stored article and return both field sets
    /// without touching the store.
    pub async fn refresh(
        &self,
        prior: Article,
        source: &Source,
        adapter: &dyn FetchAdapter,
    ) -> RefreshProposal {
        let raw = RawItem {
            title: prior.title.clone(),
            url: prior.url.clone(),
            content: prior.content.clone(),
            external_id: prior.external_id.clone(),
            image_url: prior.image_url.clone(),
            author: prior.author.clone(),
            published_at: prior.published_at,
        };
        let enriched = self.enrich(raw, source, adapter).await;

        let mut proposed = prior.clone();
        proposed.title = enriched.raw.title;
        proposed.content = enriched.raw.content;
        proposed.content_hash = content_hash(&proposed.content);
        proposed.fetched_at = Utc::now();
        if let Some(s) = enriched.summary {
            proposed.summary = Some(s.summary);
            proposed.tags = s.tags;
            proposed.category = s.category.or(proposed.category);
        }
        proposed.summary_status = enriched.summary_status;

        RefreshProposal { prior, proposed }
    }
}

/// Materialize an enriched item as a new Article row.
pub fn new_article(source_id: Uuid, enriched: &EnrichedItem) -> Article {
    let raw = &enriched.raw;
    Article {
        id: Uuid::new_v4(),
        source_id,
        external_id: raw.external_id.clone(),
        url: raw.url.clone(),
        title: raw.title.clone(),
        content: raw.content.clone(),
        image_url: raw.image_url.clone(),
        author: raw.author.clone(),
        published_at: raw.published_at,
        summary: enriched.summary.as_ref().map(|s| s.summary.clone()),
        tags: enriched
            .summary
            .as_ref()
            .map(|s| s.tags.clone())
            .unwrap_or_default(),
        category: enriched.summary.as_ref().and_then(|s| s.category.clone()),
        summary_status: enriched.summary_status,
        read: false,
        starred: false,
        content_hash: content_hash(&raw.content),
        fetched_at: Utc::now(),
    }
}
