// src/model.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a configured content origin. Dispatches adapter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "feed")]
    Feed,
    #[serde(rename = "structured-scrape")]
    StructuredScrape,
}

/// CSS selectors a structured-scrape source must carry. All three are
/// required at creation; a scrape source without them is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeSelectors {
    pub item: String,
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub selectors: Option<ScrapeSelectors>,
    #[serde(default)]
    pub fetch_full_text: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// When set, outgoing requests for this source carry the credential
    /// token stored for that domain.
    #[serde(default)]
    pub credential_domain: Option<String>,
    /// Route page fetches through the remote rendering service instead of
    /// plain HTTP. Needed for JS-heavy or bot-hostile origins.
    #[serde(default)]
    pub use_browser: bool,
}

fn default_true() -> bool {
    true
}

impl Source {
    /// Kind-specific configuration check, applied at create/update time.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.url.trim().is_empty() {
            return Err("source url must not be empty");
        }
        if self.kind == SourceKind::StructuredScrape {
            match &self.selectors {
                Some(s) if !s.item.is_empty() && !s.title.is_empty() && !s.link.is_empty() => {}
                _ => {
                    return Err(
                        "structured-scrape sources require item, title and link selectors",
                    )
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Pending,
    Completed,
    Failed,
}

/// A deduplicated content item. Unique per (source_id, dedup key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub source_id: Uuid,
    pub external_id: Option<String>,
    pub url: Option<String>,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub summary_status: SummaryStatus,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub starred: bool,
    /// Hash of the normalized content, used for skip-unchanged detection.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl Article {
    /// External id if present, else canonical URL. Items resolving to
    /// neither cannot be stored.
    pub fn dedup_key(&self) -> Option<&str> {
        self.external_id.as_deref().or(self.url.as_deref())
    }
}

/// Candidate item as produced by a fetch adapter, before enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub external_id: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl RawItem {
    pub fn dedup_key(&self) -> Option<&str> {
        self.external_id.as_deref().or(self.url.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    SourceFetch,
    CrawlDiscovery,
    ArticleFetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Progress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: u64,
    pub total: u64,
    pub added: u64,
    pub updated: u64,
    pub queued: u64,
}

/// One progress report for a job, also the wire shape streamed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub job_id: Uuid,
    pub source_id: Uuid,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-domain authentication material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub domain: String,
    pub token: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub probe_url: Option<String>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_valid: Option<bool>,
}
