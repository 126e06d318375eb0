// tests/job_stream.rs
//
// The SSE endpoint replays the latest status on subscribe and closes on
// its own after a terminal event, so a subscriber that arrives late still
// gets a complete picture.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use tower::ServiceExt as _;
use uuid::Uuid;

use newsloom::adapters::{Adapters, PageFetcher};
use newsloom::api::{router, AppState};
use newsloom::config::Config;
use newsloom::credentials::CredentialStore;
use newsloom::enrich::EnrichmentPipeline;
use newsloom::error::FetchError;
use newsloom::jobs::JobRegistry;
use newsloom::model::{JobKind, JobStatus, Source, SourceKind, StatusEvent};
use newsloom::scheduler::Scheduler;
use newsloom::store::MemoryStore;

const FEED_XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>c</title>
<item><title>Only one</title><link>https://example.org/one</link><guid>g1</guid>
<description>Body</description></item>
</channel></rss>"#;

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

async fn setup() -> (Arc<Scheduler>, AppState, Uuid) {
    let mut pages = HashMap::new();
    pages.insert("https://example.org/feed.xml".to_string(), FEED_XML.to_string());

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
        name: "feed".into(),
        kind: SourceKind::Feed,
        url: "https://example.org/feed.xml".into(),
        category: None,
        selectors: None,
        fetch_full_text: false,
        enabled: true,
        credential_domain: None,
        use_browser: false,
    };
    store.create_source(source.clone()).await.unwrap();

    let state = AppState {
        scheduler: scheduler.clone(),
        stream_idle: Duration::from_secs(5),
    };
    (scheduler, state, source.id)
}

#[tokio::test]
async fn late_subscriber_sees_terminal_status_and_stream_closes() {
    let (scheduler, state, source_id) = setup().await;

    let job = scheduler.submit_fetch(source_id, false).await.unwrap();
    for _ in 0..200 {
        if scheduler
            .registry()
            .latest(job)
            .is_some_and(|e| e.status.is_terminal())
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let app = router(state);
    let resp = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{job}/events"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    // The stream ends by itself after replaying the terminal status, so
    // collecting the whole body terminates.
    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("event: connected"), "missing ack: {text}");
    assert!(text.contains(&job.to_string()), "ack names the job id");
    assert!(text.contains("event: status"));
    assert!(text.contains("\"completed\""), "terminal replay: {text}");
}

#[tokio::test]
async fn silent_job_stream_closes_with_a_timeout_notice() {
    let (scheduler, mut state, source_id) = setup().await;
    state.stream_idle = Duration::from_millis(200);

    // A job that never publishes anything after its initial status.
    let job = Uuid::new_v4();
    scheduler.registry().create(StatusEvent {
        job_id: job,
        source_id,
        kind: JobKind::SourceFetch,
        status: JobStatus::Started,
        progress: None,
        error: None,
        timestamp: chrono::Utc::now(),
    });

    let app = router(state);
    let resp = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{job}/events"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Collecting the body terminates because the idle window elapses and
    // the stream closes itself.
    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("\"started\""), "non-terminal replay: {text}");
    assert!(text.contains("event: timeout"), "missing notice: {text}");
    assert!(
        !text.contains("\"completed\"") && !text.contains("\"failed\""),
        "nothing terminal was ever published: {text}"
    );
}
