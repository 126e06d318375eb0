// src/adapters/feed.rs
//! Feed adapter: parses an RSS document into candidate items. The feed
//! grammar handled here is the common RSS 2.0 subset; anything the serde
//! mapping cannot digest surfaces as a parse failure for the job.

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::sync::Arc;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::credentials::CredentialStore;
use crate::error::{FetchError, Result};
use crate::model::{RawItem, Source};

use super::{cookie_for, normalize_text, FetchAdapter, PageFetcher};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    author: Option<String>,
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let unix = OffsetDateTime::parse(ts, &Rfc2822)
        .ok()?
        .to_offset(UtcOffset::UTC)
        .unix_timestamp();
    chrono::DateTime::from_timestamp(unix, 0)
}

/// Entity scrub for feeds that embed bare HTML entities in XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

pub fn parse_feed(xml: &str) -> Result<Vec<RawItem>> {
    let clean = scrub_html_entities_for_xml(xml);
    let rss: Rss =
        from_str(&clean).map_err(|e| FetchError::Parse(format!("rss deserialize: {e}")))?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            continue;
        }
        let external_id = it
            .guid
            .and_then(|g| g.value)
            .filter(|v| !v.is_empty())
            .or_else(|| it.link.clone());
        let image_url = it.enclosure.and_then(|e| {
            match e.mime.as_deref() {
                Some(m) if !m.starts_with("image/") => None,
                _ => e.url,
            }
        });

        out.push(RawItem {
            title,
            url: it.link,
            content: normalize_text(it.description.as_deref().unwrap_or_default()),
            external_id,
            image_url,
            author: it.author,
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
        });
    }
    Ok(out)
}

pub struct FeedAdapter {
    pages: Arc<dyn PageFetcher>,
    creds: Arc<CredentialStore>,
}

impl FeedAdapter {
    pub fn new(pages: Arc<dyn PageFetcher>, creds: Arc<CredentialStore>) -> Self {
        Self { pages, creds }
    }
}

#[async_trait]
impl FetchAdapter for FeedAdapter {
    async fn list_candidates(&self, source: &Source) -> Result<Vec<RawItem>> {
        let cookie = cookie_for(source, &self.creds)?;
        let xml = self.pages.get(&source.url, cookie.as_deref()).await?;
        parse_feed(&xml)
    }

    fn name(&self) -> &'static str {
        "feed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <item>
      <title>First &ndash; story</title>
      <link>https://example.org/a</link>
      <guid isPermaLink="false">guid-a</guid>
      <pubDate>Mon, 11 Aug 2025 09:30:00 GMT</pubDate>
      <description>Body of &lt;b&gt;first&lt;/b&gt; story.</description>
      <author>jane@example.org</author>
      <enclosure url="https://example.org/a.jpg" type="image/jpeg"/>
    </item>
    <item>
      <title>Second story</title>
      <link>https://example.org/b</link>
      <description>Second body</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_with_guid_and_date() {
        let items = parse_feed(SAMPLE).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title, "First - story");
        assert_eq!(first.external_id.as_deref(), Some("guid-a"));
        assert_eq!(first.content, "Body of first story");
        assert_eq!(first.image_url.as_deref(), Some("https://example.org/a.jpg"));
        assert!(first.published_at.is_some());

        // No guid: the link stands in as external id.
        let second = &items[1];
        assert_eq!(second.external_id.as_deref(), Some("https://example.org/b"));
        assert!(second.published_at.is_none());
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_feed("<rss><channel><item>").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn items_without_title_are_dropped() {
        let xml = r#"<rss><channel><item><link>https://example.org/x</link></item></channel></rss>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }
}
