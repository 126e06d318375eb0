// src/credentials.rs
//! Per-domain credential store with explicit validity probing. Entries are
//! keyed uniquely by domain; concurrent access is safe at key level.

use chrono::Utc;
use dashmap::DashMap;
use scraper::{Html, Selector};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::model::Credential;

/// Markers that indicate an auth challenge rather than real content.
const AUTH_CHALLENGE_MARKERS: &[&str] = &["log in", "login", "sign in", "captcha"];

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub domain: String,
    pub valid: bool,
    /// Resolved page title when valid, error detail otherwise.
    pub detail: String,
}

pub struct CredentialStore {
    entries: DashMap<String, Credential>,
    http: reqwest::Client,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("newsloom/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            entries: DashMap::new(),
            http,
        }
    }

    pub fn get(&self, domain: &str) -> Option<Credential> {
        self.entries.get(domain).map(|c| c.clone())
    }

    /// Auth token for a domain, if one is stored. Adapters attach this as a
    /// Cookie header on outgoing requests.
    pub fn token(&self, domain: &str) -> Option<String> {
        self.entries.get(domain).map(|c| c.token.clone())
    }

    pub fn list(&self) -> Vec<Credential> {
        self.entries.iter().map(|c| c.clone()).collect()
    }

    /// Insert or replace the credential for a domain.
    pub fn upsert(&self, credential: Credential) {
        self.entries.insert(credential.domain.clone(), credential);
    }

    pub fn remove(&self, domain: &str) -> bool {
        self.entries.remove(domain).is_some()
    }

    /// Check one domain's credential. Network is touched only when a probe
    /// URL is configured and a token exists.
    pub async fn probe(&self, domain: &str) -> ProbeResult {
        let Some(cred) = self.get(domain) else {
            return ProbeResult {
                domain: domain.to_string(),
                valid: false,
                detail: "missing credential".into(),
            };
        };

        let Some(probe_url) = cred.probe_url.clone() else {
            // Nothing to test against; do not guess over the network.
            return ProbeResult {
                domain: domain.to_string(),
                valid: true,
                detail: "assumed valid (no probe url)".into(),
            };
        };

        let outcome = self.probe_fetch(&probe_url, &cred.token).await;
        let (valid, detail) = match outcome {
            Ok(title) => (true, title),
            Err(detail) => (false, detail),
        };

        if let Some(mut entry) = self.entries.get_mut(domain) {
            entry.last_checked = Some(Utc::now());
            entry.last_valid = Some(valid);
        }
        info!(domain, valid, "credential probe finished");

        ProbeResult {
            domain: domain.to_string(),
            valid,
            detail,
        }
    }

    /// Check every stored domain, or just the given one.
    pub async fn probe_all(&self, domain_filter: Option<&str>) -> Vec<ProbeResult> {
        let domains: Vec<String> = match domain_filter {
            Some(d) => vec![d.to_string()],
            None => self.entries.iter().map(|c| c.domain.clone()).collect(),
        };
        let mut results = Vec::with_capacity(domains.len());
        for domain in domains {
            results.push(self.probe(&domain).await);
        }
        results
    }

    async fn probe_fetch(&self, url: &str, token: &str) -> std::result::Result<String, String> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::COOKIE, token)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("unexpected status {}", status.as_u16()));
        }

        let body = resp.text().await.map_err(|e| format!("read failed: {e}"))?;
        classify_probe_body(&body)
    }
}

/// A resolvable page title means the cookie got us past the wall; a login
/// form or captcha in the title means it did not.
pub(crate) fn classify_probe_body(body: &str) -> std::result::Result<String, String> {
    let doc = Html::parse_document(body);
    let title_sel = Selector::parse("title").expect("static selector");
    let title = doc
        .select(&title_sel)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    if title.is_empty() {
        return Err("no resolvable title".into());
    }
    let lowered = title.to_ascii_lowercase();
    if AUTH_CHALLENGE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Err(format!("auth challenge: {title}"));
    }
    Ok(title)
}
