// src/adapters/browser.rs
//! Browser-driven fetching through a remote rendering service (browserless
//! style). Used for origins that require client-side rendering or trip on
//! plain HTTP clients. The anti-detection posture is applied before
//! navigation: realistic user agent, desktop viewport, and an init script
//! that hides the usual automation giveaways.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::error::{FetchError, Result};

use super::PageFetcher;

const STEALTH_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Runs before any page script; masks webdriver and fakes the plugin and
/// language surfaces headless Chrome leaves empty.
const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3] });
"#;

/// When navigation counts as finished. The serde names are the wire
/// values the rendering service understands, and double as the config
/// spelling for `browserless_wait`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitUntil {
    /// Immediately after DOM construction.
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    /// After the full load event.
    #[serde(rename = "load")]
    Load,
    /// After a quiet-network window.
    #[default]
    #[serde(rename = "networkidle2")]
    NetworkIdle,
}

#[derive(Debug, Serialize)]
struct GotoOptions {
    #[serde(rename = "waitUntil")]
    wait_until: WaitUntil,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct Viewport {
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    #[serde(rename = "gotoOptions")]
    goto_options: GotoOptions,
    #[serde(rename = "userAgent")]
    user_agent: &'a str,
    viewport: Viewport,
    #[serde(rename = "addScriptTag", skip_serializing_if = "Vec::is_empty")]
    scripts: Vec<ScriptTag<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ScriptTag<'a> {
    content: &'a str,
}

pub struct BrowserClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    /// Hard deadline; an overrunning remote render is aborted and surfaced
    /// as a network failure.
    timeout: Duration,
    wait: WaitUntil,
}

impl BrowserClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(5))
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            timeout,
            wait: WaitUntil::NetworkIdle,
        }
    }

    pub fn with_wait(mut self, wait: WaitUntil) -> Self {
        self.wait = wait;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{path}", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    fn render_request<'a>(&self, url: &'a str, cookie: Option<&'a str>) -> RenderRequest<'a> {
        RenderRequest {
            url,
            goto_options: GotoOptions {
                wait_until: self.wait,
                timeout: self.timeout.as_millis() as u64,
            },
            user_agent: STEALTH_USER_AGENT,
            viewport: Viewport {
                width: 1440,
                height: 900,
            },
            scripts: vec![ScriptTag {
                content: STEALTH_INIT_SCRIPT,
            }],
            headers: cookie.map(|c| serde_json::json!({ "Cookie": c })),
        }
    }

    async fn post(&self, path: &str, url: &str, cookie: Option<&str>) -> Result<reqwest::Response> {
        let body = self.render_request(url, cookie);
        let fut = self.client.post(self.endpoint(path)).json(&body).send();
        let resp = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Network(format!(
                "render service status {}: {message}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }

    /// Fully rendered HTML for a URL.
    pub async fn content(&self, url: &str, cookie: Option<&str>) -> Result<String> {
        info!(url, wait = ?self.wait, "rendering page");
        let resp = self.post("content", url, cookie).await?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PageFetcher for BrowserClient {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<String> {
        self.content(url, cookie).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_request_carries_stealth_posture() {
        let client = BrowserClient::new("http://render.local/", None, Duration::from_secs(20))
            .with_wait(WaitUntil::DomContentLoaded);
        let req = client.render_request("https://example.org", Some("s=1"));
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["gotoOptions"]["waitUntil"], "domcontentloaded");
        assert_eq!(json["gotoOptions"]["timeout"], 20_000);
        assert!(json["userAgent"].as_str().unwrap().contains("Chrome"));
        assert_eq!(json["viewport"]["width"], 1440);
        assert!(json["addScriptTag"][0]["content"]
            .as_str()
            .unwrap()
            .contains("webdriver"));
        assert_eq!(json["headers"]["Cookie"], "s=1");
    }

    #[test]
    fn endpoint_appends_token_when_present() {
        let client =
            BrowserClient::new("http://render.local", Some("tok"), Duration::from_secs(10));
        assert_eq!(client.endpoint("content"), "http://render.local/content?token=tok");
    }
}
