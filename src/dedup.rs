// src/dedup.rs
//! Deduplication and upsert: reconcile enriched candidates against stored
//! articles. Safe across different sources concurrently; same-source calls
//! are already serialized by the scheduler's exclusivity lease, so no
//! locking happens here.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::enrich::{new_article, EnrichedItem};
use crate::model::SummaryStatus;
use crate::store::Store;

use uuid::Uuid;

/// Hash of normalized content for skip-unchanged detection.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First sighting; a new article row exists. Counts toward `added`.
    Created,
    /// Known item re-persisted (forced or content changed). Never counted
    /// as an addition.
    Updated,
    /// Known item, unchanged, not forced. No write happened.
    Skipped,
}

pub struct DedupEngine;

impl DedupEngine {
    /// Reconcile one enriched item for a source. Items with neither an
    /// external id nor a URL are unkeyable and skipped.
    pub async fn reconcile(
        store: &dyn Store,
        source_id: Uuid,
        enriched: &EnrichedItem,
        force: bool,
    ) -> Result<ReconcileOutcome> {
        let Some(key) = enriched.raw.dedup_key() else {
            return Ok(ReconcileOutcome::Skipped);
        };

        let existing = store.find_article(source_id, key).await?;
        let Some(mut current) = existing else {
            store.insert_article(new_article(source_id, enriched)).await?;
            metrics::counter!("dedup_created_total").increment(1);
            return Ok(ReconcileOutcome::Created);
        };

        let fresh_hash = content_hash(&enriched.raw.content);
        if !force && current.content_hash == fresh_hash {
            metrics::counter!("dedup_skipped_total").increment(1);
            return Ok(ReconcileOutcome::Skipped);
        }

        // Update in place; read/starred are user state and survive.
        current.title = enriched.raw.title.clone();
        current.content = enriched.raw.content.clone();
        current.content_hash = fresh_hash;
        current.image_url = enriched.raw.image_url.clone();
        current.author = enriched.raw.author.clone();
        current.published_at = enriched.raw.published_at.or(current.published_at);
        if let Some(s) = &enriched.summary {
            current.summary = Some(s.summary.clone());
            current.tags = s.tags.clone();
            current.category = s.category.clone().or(current.category);
        }
        if enriched.summary_status != SummaryStatus::Pending {
            current.summary_status = enriched.summary_status;
        }
        current.fetched_at = Utc::now();

        store.update_article(current).await?;
        metrics::counter!("dedup_updated_total").increment(1);
        Ok(ReconcileOutcome::Updated)
    }
}
