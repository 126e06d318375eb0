// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::adapters::browser::WaitUntil;

const ENV_PATH: &str = "NEWSLOOM_CONFIG";
const DEFAULT_PATH: &str = "config/newsloom.toml";

/// Service configuration. Every field has a default so the service boots
/// with no config file at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address for the HTTP server.
    pub bind_addr: String,
    /// Overall deadline for a feed fetch job, seconds.
    pub feed_timeout_secs: u64,
    /// Overall deadline for a scrape or browser fetch job, seconds.
    pub scrape_timeout_secs: u64,
    /// Retry attempts for network-class adapter failures.
    pub retry_attempts: u32,
    /// Base backoff between retries, milliseconds. Doubles each attempt.
    pub retry_base_ms: u64,
    /// Exclusivity lease duration, seconds.
    pub lease_ttl_secs: u64,
    /// Lease renewal cadence while a job runs, seconds.
    pub lease_renew_secs: u64,
    /// How long finished jobs stay visible in the registry, seconds.
    pub job_retention_secs: u64,
    /// SSE stream idle timeout, seconds.
    pub stream_idle_secs: u64,
    /// Emit a progress event every N reconciled items.
    pub progress_batch: u64,
    /// Submit a fetch for every enabled source on this interval. 0 disables
    /// the background sweep.
    pub sweep_interval_secs: u64,
    /// Remote rendering service (browser adapter). Empty base URL disables it.
    pub browserless_url: String,
    pub browserless_token: Option<String>,
    /// Navigation wait condition for rendered fetches: "domcontentloaded",
    /// "load", or "networkidle2".
    pub browserless_wait: WaitUntil,
    /// AI summarization toggle; the summarizer endpoint + key come from env
    /// (`SUMMARIZER_URL`, `SUMMARIZER_API_KEY`).
    pub summarize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            feed_timeout_secs: 30,
            scrape_timeout_secs: 60,
            retry_attempts: 3,
            retry_base_ms: 500,
            lease_ttl_secs: 120,
            lease_renew_secs: 30,
            job_retention_secs: 600,
            stream_idle_secs: 90,
            progress_batch: 5,
            sweep_interval_secs: 0,
            browserless_url: String::new(),
            browserless_token: None,
            browserless_wait: WaitUntil::default(),
            summarize: false,
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load using env var + fallback:
    /// 1) $NEWSLOOM_CONFIG
    /// 2) config/newsloom.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("NEWSLOOM_CONFIG points to non-existent path"));
        }
        let default = PathBuf::from(DEFAULT_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Ok(Self::default())
    }

    pub fn feed_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn scrape_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scrape_timeout_secs)
    }
}
