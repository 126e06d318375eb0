// src/api.rs
//! HTTP surface: fetch triggers, the SSE job status stream, job snapshots,
//! and the administrative CRUD for sources and credentials. Handlers stay
//! thin; everything interesting lives in the scheduler and the stores.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::credentials::ProbeResult;
use crate::enrich::RefreshProposal;
use crate::error::ApiError;
use crate::model::{Article, Credential, ScrapeSelectors, Source, SourceKind, StatusEvent};
use crate::scheduler::{Scheduler, SubmitError};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub stream_idle: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/sources", post(create_source).get(list_sources))
        .route(
            "/api/sources/{id}",
            get(get_source).put(update_source).delete(delete_source),
        )
        .route("/api/sources/{id}/fetch", post(trigger_fetch))
        .route("/api/sources/{id}/discover", post(trigger_discovery))
        .route("/api/jobs", get(jobs_snapshot))
        .route("/api/jobs/{id}/events", get(job_events))
        .route(
            "/api/credentials",
            post(upsert_credential).get(list_credentials),
        )
        .route(
            "/api/credentials/{domain}",
            put(upsert_credential_for).delete(delete_credential),
        )
        .route("/api/credentials/check", post(check_credentials))
        .route("/api/articles/{id}/refresh", post(refresh_article))
        .route("/api/articles/{id}/refresh/commit", post(commit_refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::SourceNotFound => ApiError::NotFound("source"),
            SubmitError::SourceDisabled => ApiError::BadRequest("source is disabled".into()),
            SubmitError::WrongKind(msg) => ApiError::BadRequest(msg.into()),
            SubmitError::Store(e) => ApiError::Internal(e),
        }
    }
}

// ---- fetch triggers and job observation ----

#[derive(Deserialize)]
struct FetchQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    job_id: Uuid,
}

async fn trigger_fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<FetchQuery>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let job_id = state.scheduler.submit_fetch(id, q.force).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

async fn trigger_discovery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let job_id = state.scheduler.submit_discovery(id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

async fn jobs_snapshot(State(state): State<AppState>) -> Json<Vec<StatusEvent>> {
    Json(state.scheduler.registry().snapshot())
}

fn sse_status(event: &StatusEvent) -> Event {
    Event::default()
        .event("status")
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".into()))
}

/// Server-initiated status stream for one job. Emits a connection ack, a
/// replay of the latest known status, then live events; closes after a
/// terminal event or an idle window. Client disconnects only end the
/// stream, never the job.
async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (latest, mut rx) = state
        .scheduler
        .registry()
        .subscribe(id)
        .ok_or(ApiError::NotFound("job"))?;
    let idle = state.stream_idle;

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("connected")
            .data(format!("{{\"jobId\":\"{id}\"}}")));

        yield Ok(sse_status(&latest));
        if latest.status.is_terminal() {
            return;
        }

        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Ok(event)) => {
                    let terminal = event.status.is_terminal();
                    yield Ok(sse_status(&event));
                    if terminal {
                        break;
                    }
                }
                // Fell behind the broadcast buffer; the next recv resumes
                // with the oldest retained event.
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => break,
                Err(_) => {
                    yield Ok(Event::default().event("timeout").data("idle timeout"));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ---- source administration ----

#[derive(Deserialize)]
struct SourcePayload {
    name: String,
    kind: SourceKind,
    url: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    selectors: Option<ScrapeSelectors>,
    #[serde(default)]
    fetch_full_text: bool,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    credential_domain: Option<String>,
    #[serde(default)]
    use_browser: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourcePayload {
    fn into_source(self, id: Uuid) -> Source {
        Source {
            id,
            name: self.name,
            kind: self.kind,
            url: self.url,
            category: self.category,
            selectors: self.selectors,
            fetch_full_text: self.fetch_full_text,
            enabled: self.enabled,
            credential_domain: self.credential_domain,
            use_browser: self.use_browser,
        }
    }
}

async fn create_source(
    State(state): State<AppState>,
    Json(payload): Json<SourcePayload>,
) -> Result<(StatusCode, Json<Source>), ApiError> {
    let source = payload.into_source(Uuid::new_v4());
    source
        .validate()
        .map_err(|msg| ApiError::BadRequest(msg.into()))?;
    let created = state.scheduler.store().create_source(source).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<Source>>, ApiError> {
    Ok(Json(state.scheduler.store().list_sources().await?))
}

async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Source>, ApiError> {
    state
        .scheduler
        .store()
        .get_source(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("source"))
}

async fn update_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SourcePayload>,
) -> Result<Json<Source>, ApiError> {
    let source = payload.into_source(id);
    source
        .validate()
        .map_err(|msg| ApiError::BadRequest(msg.into()))?;
    state
        .scheduler
        .store()
        .update_source(source)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("source"))
}

async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler.store().delete_source(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("source"))
    }
}

// ---- credential administration ----

#[derive(Deserialize)]
struct CredentialPayload {
    domain: String,
    token: String,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    probe_url: Option<String>,
}

/// Credential as listed back to operators: the token never round-trips in
/// full, only a masked suffix.
#[derive(Serialize)]
struct CredentialView {
    domain: String,
    token_suffix: String,
    note: Option<String>,
    probe_url: Option<String>,
    last_checked: Option<chrono::DateTime<chrono::Utc>>,
    last_valid: Option<bool>,
}

impl From<Credential> for CredentialView {
    fn from(c: Credential) -> Self {
        let chars: Vec<char> = c.token.chars().collect();
        let suffix: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        Self {
            domain: c.domain,
            token_suffix: format!("…{suffix}"),
            note: c.note,
            probe_url: c.probe_url,
            last_checked: c.last_checked,
            last_valid: c.last_valid,
        }
    }
}

fn store_credential(
    state: &AppState,
    payload: CredentialPayload,
) -> Result<CredentialView, ApiError> {
    if payload.domain.trim().is_empty() || payload.token.trim().is_empty() {
        return Err(ApiError::BadRequest("domain and token are required".into()));
    }
    let credential = Credential {
        domain: payload.domain,
        token: payload.token,
        note: payload.note,
        probe_url: payload.probe_url,
        last_checked: None,
        last_valid: None,
    };
    state.scheduler.credentials().upsert(credential.clone());
    Ok(credential.into())
}

async fn upsert_credential(
    State(state): State<AppState>,
    Json(payload): Json<CredentialPayload>,
) -> Result<(StatusCode, Json<CredentialView>), ApiError> {
    let view = store_credential(&state, payload)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn upsert_credential_for(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(mut payload): Json<CredentialPayload>,
) -> Result<Json<CredentialView>, ApiError> {
    payload.domain = domain;
    Ok(Json(store_credential(&state, payload)?))
}

async fn list_credentials(State(state): State<AppState>) -> Json<Vec<CredentialView>> {
    Json(
        state
            .scheduler
            .credentials()
            .list()
            .into_iter()
            .map(CredentialView::from)
            .collect(),
    )
}

async fn delete_credential(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler.credentials().remove(&domain) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("credential"))
    }
}

#[derive(Deserialize, Default)]
struct CheckPayload {
    #[serde(default)]
    domain: Option<String>,
}

async fn check_credentials(
    State(state): State<AppState>,
    payload: Option<Json<CheckPayload>>,
) -> Json<Vec<ProbeResult>> {
    let filter = payload.and_then(|Json(p)| p.domain);
    Json(
        state
            .scheduler
            .credentials()
            .probe_all(filter.as_deref())
            .await,
    )
}

// ---- single-article refresh ----

async fn refresh_article(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RefreshProposal>, ApiError> {
    let store = state.scheduler.store();
    let article = store
        .get_article(id)
        .await?
        .ok_or(ApiError::NotFound("article"))?;
    let source = store
        .get_source(article.source_id)
        .await?
        .ok_or(ApiError::NotFound("source"))?;

    let adapter = state.scheduler.adapters().for_source(&source);
    let proposal = state
        .scheduler
        .enrichment()
        .refresh(article, &source, adapter)
        .await;
    Ok(Json(proposal))
}

async fn commit_refresh(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut proposed): Json<Article>,
) -> Result<Json<Article>, ApiError> {
    if proposed.id != id {
        return Err(ApiError::BadRequest(
            "body article id does not match path".into(),
        ));
    }
    let store = state.scheduler.store();
    let current = store
        .get_article(id)
        .await?
        .ok_or(ApiError::NotFound("article"))?;

    // User state may have moved since the proposal was computed.
    proposed.read = current.read;
    proposed.starred = current.starred;
    proposed.source_id = current.source_id;

    store.update_article(proposed.clone()).await?;
    Ok(Json(proposed))
}
