//! Newsloom — Binary Entrypoint
//! Boots the Axum HTTP server, wiring the scheduler, stores, and middleware.
//!
//! See `README.md` for quickstart.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsloom::adapters::{browser::BrowserClient, Adapters};
use newsloom::api::{router, AppState};
use newsloom::config::Config;
use newsloom::credentials::CredentialStore;
use newsloom::enrich::{EnrichmentPipeline, HttpSummarizer, SharedSummarizer};
use newsloom::jobs::JobRegistry;
use newsloom::metrics::Metrics;
use newsloom::scheduler::Scheduler;
use newsloom::store::MemoryStore;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsloom=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::load_default()?;
    info!(bind = %cfg.bind_addr, "starting newsloom");

    let metrics = Metrics::init(cfg.lease_ttl_secs);

    let store = MemoryStore::shared();
    let creds = Arc::new(CredentialStore::new());

    let browser = if cfg.browserless_url.is_empty() {
        None
    } else {
        Some(
            BrowserClient::new(
                &cfg.browserless_url,
                cfg.browserless_token.as_deref(),
                cfg.scrape_timeout(),
            )
            .with_wait(cfg.browserless_wait),
        )
    };

    let adapters = Arc::new(Adapters::new(
        creds.clone(),
        cfg.retry_attempts,
        Duration::from_millis(cfg.retry_base_ms),
        browser,
    ));

    let summarizer: Option<SharedSummarizer> = if cfg.summarize {
        match HttpSummarizer::from_env() {
            Some(s) => Some(Arc::new(s)),
            None => {
                tracing::warn!("summarize enabled but SUMMARIZER_URL is unset; summaries stay pending");
                None
            }
        }
    } else {
        None
    };
    let enrich = Arc::new(EnrichmentPipeline::new(summarizer));

    let registry = Arc::new(JobRegistry::new(Duration::from_secs(cfg.job_retention_secs)));

    let scheduler = Arc::new(Scheduler::new(
        cfg.clone(),
        store,
        adapters,
        enrich,
        registry,
        creds,
    ));
    scheduler.spawn_sweep();

    let state = AppState {
        scheduler,
        stream_idle: Duration::from_secs(cfg.stream_idle_secs),
    };
    let app = router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
