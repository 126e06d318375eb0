// src/adapters/mod.rs
pub mod browser;
pub mod feed;
pub mod scrape;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::credentials::CredentialStore;
use crate::error::{FetchError, Result};
use crate::model::{RawItem, Source, SourceKind};

/// Capability shared by all fetch strategies. One implementation per source
/// kind, selected by tag — no inheritance.
#[async_trait]
pub trait FetchAdapter: Send + Sync {
    /// Enumerate candidate items for a source.
    async fn list_candidates(&self, source: &Source) -> Result<Vec<RawItem>>;

    /// Fetch a single item by URL. Only meaningful for scrape-style sources.
    async fn fetch_one(&self, _source: &Source, url: &str) -> Result<RawItem> {
        Err(FetchError::Parse(format!(
            "single-item fetch not supported for {url}"
        )))
    }

    fn name(&self) -> &'static str;
}

/// Plain-HTTP page retrieval, the capability the scrape adapter and the
/// credential prober build on. The browser adapter presents the same
/// surface through the remote rendering service.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<String>;
}

/// reqwest-backed fetcher with bounded retries and exponential backoff for
/// network-class failures. Parse/auth failures are never retried.
pub struct HttpFetcher {
    client: reqwest::Client,
    attempts: u32,
    base_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(attempts: u32, base_backoff: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("newsloom/0.1 (+https://github.com/newsloom/newsloom)")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        Self {
            client,
            attempts: attempts.max(1),
            base_backoff,
        }
    }

    async fn get_once(&self, url: &str, cookie: Option<&str>) -> Result<String> {
        let mut req = self.client.get(url);
        if let Some(c) = cookie {
            req = req.header(reqwest::header::COOKIE, c);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!(
                "credential rejected with status {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "unexpected status {} for {url}",
                status.as_u16()
            )));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<String> {
        retry_with_backoff(self.attempts, self.base_backoff, || {
            self.get_once(url, cookie)
        })
        .await
    }
}

/// Bounded retries with exponential backoff. Only retryable failures
/// (network, timeout) get another attempt; parse and auth errors return
/// on the first try.
async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_backoff: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let backoff = base_backoff * 2u32.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "fetch failed, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| FetchError::Network("no attempts made".into())))
}

/// Normalize adapter output: decode entities, strip tags, collapse
/// whitespace, trim trailing sentence punctuation.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }
    out
}

/// Resolve the Cookie header for a source. A configured credential domain
/// with no stored token is an auth failure, not a silent plain fetch.
pub fn cookie_for(source: &Source, creds: &CredentialStore) -> Result<Option<String>> {
    match &source.credential_domain {
        None => Ok(None),
        Some(domain) => match creds.token(domain) {
            Some(token) => Ok(Some(token)),
            None => Err(FetchError::Auth(format!(
                "no credential stored for domain {domain}"
            ))),
        },
    }
}

/// The full adapter set wired against one credential store.
pub struct Adapters {
    feed: feed::FeedAdapter,
    scrape: scrape::ScrapeAdapter,
    /// Scrape adapter routed through the remote rendering service, when one
    /// is configured. Selected per source via `use_browser`.
    browser_scrape: Option<scrape::ScrapeAdapter>,
}

impl Adapters {
    pub fn new(
        creds: Arc<CredentialStore>,
        retry_attempts: u32,
        retry_base: Duration,
        browser: Option<browser::BrowserClient>,
    ) -> Self {
        let pages: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(retry_attempts, retry_base));
        let browser_scrape = browser.map(|b| {
            let rendered: Arc<dyn PageFetcher> = Arc::new(b);
            scrape::ScrapeAdapter::new(rendered, creds.clone())
        });
        Self {
            feed: feed::FeedAdapter::new(pages.clone(), creds.clone()),
            scrape: scrape::ScrapeAdapter::new(pages, creds),
            browser_scrape,
        }
    }

    /// Build the adapter set over an explicit page fetcher. Lets callers
    /// swap in canned pages instead of live HTTP.
    pub fn with_fetcher(pages: Arc<dyn PageFetcher>, creds: Arc<CredentialStore>) -> Self {
        Self {
            feed: feed::FeedAdapter::new(pages.clone(), creds.clone()),
            scrape: scrape::ScrapeAdapter::new(pages, creds),
            browser_scrape: None,
        }
    }

    pub fn for_source(&self, source: &Source) -> &dyn FetchAdapter {
        match source.kind {
            SourceKind::Feed => &self.feed,
            SourceKind::StructuredScrape => {
                if source.use_browser {
                    if let Some(b) = &self.browser_scrape {
                        return b;
                    }
                    warn!(
                        source = %source.id,
                        "browser rendering requested but not configured, using plain HTTP"
                    );
                }
                &self.scrape
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScrapeSelectors;
    use uuid::Uuid;

    fn source(kind: SourceKind, credential_domain: Option<&str>) -> Source {
        Source {
            id: Uuid::new_v4(),
            name: "s".into(),
            kind,
            url: "https://example.org".into(),
            category: None,
            selectors: Some(ScrapeSelectors {
                item: "li".into(),
                title: "a".into(),
                link: "a".into(),
            }),
            fetch_full_text: false,
            enabled: true,
            credential_domain: credential_domain.map(String::from),
            use_browser: false,
        }
    }

    #[test]
    fn missing_credential_is_auth_error_not_plain_fetch() {
        let creds = CredentialStore::new();
        let src = source(SourceKind::Feed, Some("wsj.com"));
        let err = cookie_for(&src, &creds).unwrap_err();
        assert!(matches!(err, FetchError::Auth(_)));
    }

    #[test]
    fn sources_without_credential_domain_fetch_anonymously() {
        let creds = CredentialStore::new();
        let src = source(SourceKind::Feed, None);
        assert!(cookie_for(&src, &creds).unwrap().is_none());
    }

    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_op(
        calls: &Arc<AtomicU32>,
        failures: u32,
        err: fn(String) -> FetchError,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String>> + Send>>
    {
        let calls = calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures {
                    Err(err(format!("failure {n}")))
                } else {
                    Ok("body".to_string())
                }
            })
        }
    }

    #[tokio::test]
    async fn transient_network_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let out = retry_with_backoff(
            3,
            Duration::from_millis(1),
            counting_op(&calls, 2, FetchError::Network),
        )
        .await;
        assert_eq!(out.unwrap(), "body");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let out = retry_with_backoff(
            3,
            Duration::from_millis(1),
            counting_op(&calls, u32::MAX, FetchError::Network),
        )
        .await;
        assert!(matches!(out.unwrap_err(), FetchError::Network(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "no fourth attempt");
    }

    #[tokio::test]
    async fn parse_and_auth_errors_are_never_retried() {
        for err in [FetchError::Parse as fn(String) -> FetchError, FetchError::Auth] {
            let calls = Arc::new(AtomicU32::new(0));
            let out = retry_with_backoff(
                3,
                Duration::from_millis(1),
                counting_op(&calls, u32::MAX, err),
            )
            .await;
            assert!(out.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1, "single attempt only");
        }
    }

    #[test]
    fn adapter_dispatch_follows_source_kind() {
        let creds = Arc::new(CredentialStore::new());
        let adapters = Adapters::new(creds, 1, Duration::from_millis(1), None);
        assert_eq!(
            adapters.for_source(&source(SourceKind::Feed, None)).name(),
            "feed"
        );
        assert_eq!(
            adapters
                .for_source(&source(SourceKind::StructuredScrape, None))
                .name(),
            "scrape"
        );
    }
}
