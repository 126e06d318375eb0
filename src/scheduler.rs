// src/scheduler.rs
//! Fetch orchestration. The scheduler is the only serialization point in
//! the system: it takes the per-source lease, drives the adapter, routes
//! every item through enrichment and dedup, publishes progress, and
//! releases the lease when the job reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::Adapters;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::dedup::{DedupEngine, ReconcileOutcome};
use crate::enrich::EnrichmentPipeline;
use crate::jobs::{AcquireOutcome, JobRegistry, SourceLeases};
use crate::model::{JobKind, JobProgress, JobStatus, Source, SourceKind, StatusEvent};
use crate::store::SharedStore;

/// How long a queued follow-up fetch waits for the source lease before
/// giving up.
const LEASE_WAIT_MAX: Duration = Duration::from_secs(120);
const LEASE_WAIT_STEP: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("source not found")]
    SourceNotFound,
    #[error("source is disabled")]
    SourceDisabled,
    #[error("{0}")]
    WrongKind(&'static str),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct Scheduler {
    cfg: Config,
    store: SharedStore,
    adapters: Arc<Adapters>,
    enrich: Arc<EnrichmentPipeline>,
    registry: Arc<JobRegistry>,
    leases: Arc<SourceLeases>,
    creds: Arc<CredentialStore>,
}

impl Scheduler {
    pub fn new(
        cfg: Config,
        store: SharedStore,
        adapters: Arc<Adapters>,
        enrich: Arc<EnrichmentPipeline>,
        registry: Arc<JobRegistry>,
        creds: Arc<CredentialStore>,
    ) -> Self {
        let leases = Arc::new(SourceLeases::new(Duration::from_secs(cfg.lease_ttl_secs)));
        Self {
            cfg,
            store,
            adapters,
            enrich,
            registry,
            leases,
            creds,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.creds
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn adapters(&self) -> &Arc<Adapters> {
        &self.adapters
    }

    pub fn enrichment(&self) -> &Arc<EnrichmentPipeline> {
        &self.enrich
    }

    /// Accept a fetch for a source. Responds immediately with a job id; if
    /// a fetch for that source is already running, the running job's id is
    /// returned instead of starting a second one (coalescing).
    pub async fn submit_fetch(self: &Arc<Self>, source_id: Uuid, force: bool) -> Result<Uuid, SubmitError> {
        let source = self.resolve_source(source_id).await?;

        let job_id = Uuid::new_v4();
        // Registered before the lease is taken so a caller coalesced onto
        // this id can always subscribe to it.
        self.registry
            .create(self.event(job_id, source_id, JobKind::SourceFetch, JobStatus::Started, None, None));
        if let AcquireOutcome::Held { job_id: running } = self.leases.acquire(source_id, job_id) {
            self.registry.remove(job_id);
            counter!("fetch_coalesced_total").increment(1);
            info!(source = %source_id, job = %running, "fetch coalesced onto running job");
            return Ok(running);
        }
        counter!("fetch_jobs_total").increment(1);

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_source_fetch(source, job_id, force).await;
        });
        Ok(job_id)
    }

    /// Discovery pass for a scrape source: enumerate listing links without
    /// enriching them, then queue one article fetch per unknown link.
    pub async fn submit_discovery(self: &Arc<Self>, source_id: Uuid) -> Result<Uuid, SubmitError> {
        let source = self.resolve_source(source_id).await?;
        if source.kind != SourceKind::StructuredScrape {
            return Err(SubmitError::WrongKind(
                "crawl discovery only applies to structured-scrape sources",
            ));
        }

        let job_id = Uuid::new_v4();
        self.registry.create(self.event(
            job_id,
            source_id,
            JobKind::CrawlDiscovery,
            JobStatus::Started,
            None,
            None,
        ));
        if let AcquireOutcome::Held { job_id: running } = self.leases.acquire(source_id, job_id) {
            self.registry.remove(job_id);
            counter!("fetch_coalesced_total").increment(1);
            return Ok(running);
        }
        counter!("fetch_jobs_total").increment(1);

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_discovery(source, job_id).await;
        });
        Ok(job_id)
    }

    /// Background sweep submitting a fetch for every enabled source on the
    /// configured interval. Disabled when the interval is zero.
    pub fn spawn_sweep(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.cfg.sweep_interval_secs == 0 {
            return None;
        }
        let scheduler = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(scheduler.cfg.sweep_interval_secs));
            loop {
                ticker.tick().await;
                let sources = match scheduler.store.list_sources().await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = ?e, "sweep could not list sources");
                        continue;
                    }
                };
                for source in sources.into_iter().filter(|s| s.enabled) {
                    if let Err(e) = scheduler.submit_fetch(source.id, false).await {
                        warn!(source = %source.id, error = %e, "sweep submit failed");
                    }
                }
                counter!("fetch_sweeps_total").increment(1);
            }
        }))
    }

    async fn resolve_source(&self, source_id: Uuid) -> Result<Source, SubmitError> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or(SubmitError::SourceNotFound)?;
        if !source.enabled {
            return Err(SubmitError::SourceDisabled);
        }
        Ok(source)
    }

    fn timeout_for(&self, kind: SourceKind) -> Duration {
        match kind {
            SourceKind::Feed => self.cfg.feed_timeout(),
            SourceKind::StructuredScrape => self.cfg.scrape_timeout(),
        }
    }

    fn event(
        &self,
        job_id: Uuid,
        source_id: Uuid,
        kind: JobKind,
        status: JobStatus,
        progress: Option<JobProgress>,
        error: Option<String>,
    ) -> StatusEvent {
        StatusEvent {
            job_id,
            source_id,
            kind,
            status,
            progress,
            error,
            timestamp: Utc::now(),
        }
    }

    /// Renew the source lease on a cadence until aborted. Losing the lease
    /// is logged but does not kill the job: work already in flight finishes
    /// and persists (append/upsert semantics make that safe).
    fn spawn_renewal(self: &Arc<Self>, source_id: Uuid, job_id: Uuid) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(scheduler.cfg.lease_renew_secs));
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if !scheduler.leases.renew(source_id, job_id) {
                    warn!(source = %source_id, job = %job_id, "lease lost during fetch");
                    break;
                }
            }
        })
    }

    async fn run_source_fetch(self: Arc<Self>, source: Source, job_id: Uuid, force: bool) {
        let renewal = self.spawn_renewal(source.id, job_id);
        let deadline = self.timeout_for(source.kind);

        let result =
            tokio::time::timeout(deadline, self.fetch_source_inner(&source, job_id, force)).await;
        let terminal = match result {
            Ok(Ok(progress)) => {
                counter!("fetch_items_added_total").increment(progress.added);
                self.event(
                    job_id,
                    source.id,
                    JobKind::SourceFetch,
                    JobStatus::Completed,
                    Some(progress),
                    None,
                )
            }
            Ok(Err(e)) => {
                counter!("fetch_failures_total").increment(1);
                self.event(
                    job_id,
                    source.id,
                    JobKind::SourceFetch,
                    JobStatus::Failed,
                    None,
                    Some(e.to_string()),
                )
            }
            Err(_) => {
                counter!("fetch_failures_total").increment(1);
                self.event(
                    job_id,
                    source.id,
                    JobKind::SourceFetch,
                    JobStatus::Failed,
                    None,
                    Some(format!("fetch timed out after {deadline:?}")),
                )
            }
        };
        self.registry.publish(terminal);
        renewal.abort();
        self.leases.release(source.id, job_id);
        self.registry.sweep();
    }

    async fn fetch_source_inner(
        &self,
        source: &Source,
        job_id: Uuid,
        force: bool,
    ) -> anyhow::Result<JobProgress> {
        let adapter = self.adapters.for_source(source);
        let items = adapter.list_candidates(source).await?;
        info!(source = %source.id, adapter = adapter.name(), candidates = items.len(), "fetch started");

        let mut progress = JobProgress {
            total: items.len() as u64,
            ..Default::default()
        };
        // Zero would divide below; treat it as "every item".
        let batch = self.cfg.progress_batch.max(1);

        for item in items {
            let enriched = self.enrich.enrich(item, source, adapter).await;
            match DedupEngine::reconcile(self.store.as_ref(), source.id, &enriched, force).await? {
                ReconcileOutcome::Created => progress.added += 1,
                ReconcileOutcome::Updated => progress.updated += 1,
                ReconcileOutcome::Skipped => {}
            }
            progress.current += 1;

            if progress.current % batch == 0 && progress.current < progress.total {
                self.registry.publish(self.event(
                    job_id,
                    source.id,
                    JobKind::SourceFetch,
                    JobStatus::Progress,
                    Some(progress),
                    None,
                ));
            }
        }

        info!(
            source = %source.id,
            added = progress.added,
            updated = progress.updated,
            "fetch finished"
        );
        Ok(progress)
    }

    async fn run_discovery(self: Arc<Self>, source: Source, job_id: Uuid) {
        let renewal = self.spawn_renewal(source.id, job_id);
        let deadline = self.timeout_for(source.kind);

        let result =
            tokio::time::timeout(deadline, self.discovery_inner(&source, job_id)).await;
        let terminal = match result {
            Ok(Ok(progress)) => self.event(
                job_id,
                source.id,
                JobKind::CrawlDiscovery,
                JobStatus::Completed,
                Some(progress),
                None,
            ),
            Ok(Err(e)) => self.event(
                job_id,
                source.id,
                JobKind::CrawlDiscovery,
                JobStatus::Failed,
                None,
                Some(e.to_string()),
            ),
            Err(_) => self.event(
                job_id,
                source.id,
                JobKind::CrawlDiscovery,
                JobStatus::Failed,
                None,
                Some(format!("discovery timed out after {deadline:?}")),
            ),
        };
        self.registry.publish(terminal);
        renewal.abort();
        self.leases.release(source.id, job_id);
        self.registry.sweep();
    }

    async fn discovery_inner(
        self: &Arc<Self>,
        source: &Source,
        job_id: Uuid,
    ) -> anyhow::Result<JobProgress> {
        let adapter = self.adapters.for_source(source);
        let items = adapter.list_candidates(source).await?;

        let mut progress = JobProgress {
            total: items.len() as u64,
            ..Default::default()
        };

        for item in items {
            progress.current += 1;
            let Some(key) = item.dedup_key().map(str::to_string) else {
                continue;
            };
            if self.store.find_article(source.id, &key).await?.is_some() {
                continue;
            }
            let Some(url) = item.url.clone() else { continue };

            let article_job = Uuid::new_v4();
            self.registry.create(self.event(
                article_job,
                source.id,
                JobKind::ArticleFetch,
                JobStatus::Started,
                None,
                None,
            ));
            let scheduler = self.clone();
            let src = source.clone();
            tokio::spawn(async move {
                scheduler.run_article_fetch(src, url, article_job).await;
            });
            progress.queued += 1;
        }

        info!(source = %source.id, queued = progress.queued, "discovery finished");
        counter!("discovery_queued_total").increment(progress.queued);
        Ok(progress)
    }

    /// Follow-up fetch for one discovered link. Waits its turn on the
    /// source lease so per-source exclusivity still holds.
    async fn run_article_fetch(self: Arc<Self>, source: Source, url: String, job_id: Uuid) {
        let mut waited = Duration::ZERO;
        loop {
            match self.leases.acquire(source.id, job_id) {
                AcquireOutcome::Acquired => break,
                AcquireOutcome::Held { .. } if waited < LEASE_WAIT_MAX => {
                    tokio::time::sleep(LEASE_WAIT_STEP).await;
                    waited += LEASE_WAIT_STEP;
                }
                AcquireOutcome::Held { .. } => {
                    self.registry.publish(self.event(
                        job_id,
                        source.id,
                        JobKind::ArticleFetch,
                        JobStatus::Failed,
                        None,
                        Some("timed out waiting for source lease".into()),
                    ));
                    return;
                }
            }
        }

        let renewal = self.spawn_renewal(source.id, job_id);
        let deadline = self.timeout_for(source.kind);
        let result =
            tokio::time::timeout(deadline, self.article_fetch_inner(&source, &url)).await;
        let terminal = match result {
            Ok(Ok(progress)) => self.event(
                job_id,
                source.id,
                JobKind::ArticleFetch,
                JobStatus::Completed,
                Some(progress),
                None,
            ),
            Ok(Err(e)) => self.event(
                job_id,
                source.id,
                JobKind::ArticleFetch,
                JobStatus::Failed,
                None,
                Some(e.to_string()),
            ),
            Err(_) => self.event(
                job_id,
                source.id,
                JobKind::ArticleFetch,
                JobStatus::Failed,
                None,
                Some(format!("article fetch timed out after {deadline:?}")),
            ),
        };
        self.registry.publish(terminal);
        renewal.abort();
        self.leases.release(source.id, job_id);
        self.registry.sweep();
    }

    async fn article_fetch_inner(&self, source: &Source, url: &str) -> anyhow::Result<JobProgress> {
        let adapter = self.adapters.for_source(source);
        let item = adapter.fetch_one(source, url).await?;
        let enriched = self.enrich.enrich(item, source, adapter).await;

        let mut progress = JobProgress {
            current: 1,
            total: 1,
            ..Default::default()
        };
        match DedupEngine::reconcile(self.store.as_ref(), source.id, &enriched, false).await? {
            ReconcileOutcome::Created => progress.added = 1,
            ReconcileOutcome::Updated => progress.updated = 1,
            ReconcileOutcome::Skipped => {}
        }
        Ok(progress)
    }
}
