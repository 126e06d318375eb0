// tests/article_refresh.rs
//
// Single-article refresh is two steps: a dry-run proposal with before and
// after field sets, then an explicit commit. User flags survive the commit
// even if the submitted body tampers with them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value as Json;
use tower::ServiceExt as _;
use uuid::Uuid;

use newsloom::adapters::{Adapters, PageFetcher};
use newsloom::api::{router, AppState};
use newsloom::config::Config;
use newsloom::credentials::CredentialStore;
use newsloom::enrich::{new_article, EnrichedItem, EnrichmentPipeline};
use newsloom::error::FetchError;
use newsloom::jobs::JobRegistry;
use newsloom::model::{RawItem, ScrapeSelectors, Source, SourceKind, SummaryStatus};
use newsloom::scheduler::Scheduler;
use newsloom::store::{MemoryStore, SharedStore};

const ARTICLE_HTML: &str = "<html><head><title>Alpha revisited</title></head><body>\
<article><p>The refreshed alpha body is much longer than the stub we stored \
the first time around, which is the whole point of the refresh.</p></article>\
</body></html>";

struct CannedPages {
    pages: HashMap<String, String>,
}

#[async_trait::async_trait]
impl PageFetcher for CannedPages {
    async fn get(&self, url: &str, _cookie: Option<&str>) -> Result<String, FetchError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Network(format!("no canned page for {url}")))
    }
}

async fn setup() -> (Router, SharedStore, Uuid) {
    let mut pages = HashMap::new();
    pages.insert(
        "https://example.org/articles/alpha".to_string(),
        ARTICLE_HTML.to_string(),
    );

    let cfg = Config::default();
    let store = MemoryStore::shared();
    let creds = Arc::new(CredentialStore::new());
    let adapters = Arc::new(Adapters::with_fetcher(
        Arc::new(CannedPages { pages }),
        creds.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        cfg,
        store.clone(),
        adapters,
        Arc::new(EnrichmentPipeline::new(None)),
        Arc::new(JobRegistry::new(Duration::from_secs(60))),
        creds,
    ));

    let source = Source {
        id: Uuid::new_v4(),
        name: "site".into(),
        kind: SourceKind::StructuredScrape,
        url: "https://example.org/news".into(),
        category: None,
        selectors: Some(ScrapeSelectors {
            item: "li".into(),
            title: "h2".into(),
            link: "a".into(),
        }),
        fetch_full_text: true,
        enabled: true,
        credential_domain: None,
        use_browser: false,
    };
    store.create_source(source.clone()).await.unwrap();

    // Stored with a stub body short enough to count as truncated.
    let mut stored = new_article(
        source.id,
        &EnrichedItem {
            raw: RawItem {
                title: "Alpha".into(),
                url: Some("https://example.org/articles/alpha".into()),
                content: "stub body".into(),
                ..Default::default()
            },
            summary: None,
            summary_status: SummaryStatus::Pending,
        },
    );
    stored.starred = true;
    let article_id = stored.id;
    store.insert_article(stored).await.unwrap();

    let app = router(AppState {
        scheduler,
        stream_idle: Duration::from_secs(5),
    });
    (app, store, article_id)
}

async fn read_json(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn refresh_proposes_without_touching_the_store() {
    let (app, store, article_id) = setup().await;

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/articles/{article_id}/refresh"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let proposal = read_json(resp).await;

    assert_eq!(proposal["prior"]["content"], "stub body");
    assert!(
        proposal["proposed"]["content"]
            .as_str()
            .unwrap()
            .contains("refreshed alpha body"),
        "full text replaces the stub: {proposal}"
    );

    // Dry run: the stored row is untouched.
    let stored = store.get_article(article_id).await.unwrap().unwrap();
    assert_eq!(stored.content, "stub body");
}

#[tokio::test]
async fn commit_applies_proposal_but_keeps_user_flags() {
    let (app, store, article_id) = setup().await;

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/articles/{article_id}/refresh"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let proposal = read_json(resp).await;

    // Tamper with the user flags before committing.
    let mut proposed = proposal["proposed"].clone();
    proposed["starred"] = Json::Bool(false);
    proposed["read"] = Json::Bool(true);

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/articles/{article_id}/refresh/commit"))
                .header("content-type", "application/json")
                .body(Body::from(proposed.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let stored = store.get_article(article_id).await.unwrap().unwrap();
    assert!(stored.content.contains("refreshed alpha body"));
    assert!(stored.starred, "starred comes from the stored row, not the body");
    assert!(!stored.read, "read comes from the stored row, not the body");
}

#[tokio::test]
async fn commit_with_mismatched_id_is_rejected() {
    let (app, store, article_id) = setup().await;
    let stored = store.get_article(article_id).await.unwrap().unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/articles/{}/refresh/commit", Uuid::new_v4()))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&stored).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
