// src/store.rs
//! Narrow contract over the persistent store. The relational backend is an
//! external collaborator; the service only needs the operations below. The
//! in-memory implementation backs tests and single-process deployments.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::model::{Article, Source};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_source(&self, source: Source) -> Result<Source>;
    async fn get_source(&self, id: Uuid) -> Result<Option<Source>>;
    async fn list_sources(&self) -> Result<Vec<Source>>;
    async fn update_source(&self, source: Source) -> Result<Option<Source>>;
    /// Removes the source and every article reachable from it.
    async fn delete_source(&self, id: Uuid) -> Result<bool>;

    /// Lookup by the dedup key (external id or canonical URL) within one source.
    async fn find_article(&self, source_id: Uuid, key: &str) -> Result<Option<Article>>;
    async fn get_article(&self, id: Uuid) -> Result<Option<Article>>;
    async fn insert_article(&self, article: Article) -> Result<()>;
    async fn update_article(&self, article: Article) -> Result<()>;
    async fn count_articles(&self, source_id: Uuid) -> Result<usize>;
}

pub type SharedStore = Arc<dyn Store>;

#[derive(Default)]
pub struct MemoryStore {
    sources: DashMap<Uuid, Source>,
    articles: DashMap<Uuid, Article>,
    /// (source_id, dedup key) -> article id
    by_key: DashMap<(Uuid, String), Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_source(&self, source: Source) -> Result<Source> {
        self.sources.insert(source.id, source.clone());
        Ok(source)
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>> {
        Ok(self.sources.get(&id).map(|s| s.clone()))
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self.sources.iter().map(|s| s.clone()).collect())
    }

    async fn update_source(&self, source: Source) -> Result<Option<Source>> {
        if !self.sources.contains_key(&source.id) {
            return Ok(None);
        }
        self.sources.insert(source.id, source.clone());
        Ok(Some(source))
    }

    async fn delete_source(&self, id: Uuid) -> Result<bool> {
        let existed = self.sources.remove(&id).is_some();
        if existed {
            let orphaned: Vec<Uuid> = self
                .articles
                .iter()
                .filter(|a| a.source_id == id)
                .map(|a| a.id)
                .collect();
            for aid in orphaned {
                if let Some((_, article)) = self.articles.remove(&aid) {
                    if let Some(key) = article.dedup_key() {
                        self.by_key.remove(&(id, key.to_string()));
                    }
                }
            }
        }
        Ok(existed)
    }

    async fn find_article(&self, source_id: Uuid, key: &str) -> Result<Option<Article>> {
        let id = match self.by_key.get(&(source_id, key.to_string())) {
            Some(entry) => *entry,
            None => return Ok(None),
        };
        Ok(self.articles.get(&id).map(|a| a.clone()))
    }

    async fn get_article(&self, id: Uuid) -> Result<Option<Article>> {
        Ok(self.articles.get(&id).map(|a| a.clone()))
    }

    async fn insert_article(&self, article: Article) -> Result<()> {
        if let Some(key) = article.dedup_key() {
            self.by_key
                .insert((article.source_id, key.to_string()), article.id);
        }
        self.articles.insert(article.id, article);
        Ok(())
    }

    async fn update_article(&self, article: Article) -> Result<()> {
        self.articles.insert(article.id, article);
        Ok(())
    }

    async fn count_articles(&self, source_id: Uuid) -> Result<usize> {
        Ok(self
            .articles
            .iter()
            .filter(|a| a.source_id == source_id)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceKind, SummaryStatus};
    use chrono::Utc;

    fn article(source_id: Uuid, key: &str) -> Article {
        Article {
            id: Uuid::new_v4(),
            source_id,
            external_id: Some(key.to_string()),
            url: None,
            title: "t".into(),
            content: "c".into(),
            image_url: None,
            author: None,
            published_at: None,
            summary: None,
            tags: vec![],
            category: None,
            summary_status: SummaryStatus::Pending,
            read: false,
            starred: false,
            content_hash: "h".into(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delete_source_removes_its_articles() {
        let store = MemoryStore::new();
        let src = Source {
            id: Uuid::new_v4(),
            name: "s".into(),
            kind: SourceKind::Feed,
            url: "https://example.org/feed".into(),
            category: None,
            selectors: None,
            fetch_full_text: false,
            enabled: true,
            credential_domain: None,
            use_browser: false,
        };
        store.create_source(src.clone()).await.unwrap();
        store.insert_article(article(src.id, "a")).await.unwrap();
        store.insert_article(article(src.id, "b")).await.unwrap();
        assert_eq!(store.count_articles(src.id).await.unwrap(), 2);

        assert!(store.delete_source(src.id).await.unwrap());
        assert_eq!(store.count_articles(src.id).await.unwrap(), 0);
        assert!(store.find_article(src.id, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_article_resolves_by_key() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let a = article(sid, "guid-1");
        store.insert_article(a.clone()).await.unwrap();

        let found = store.find_article(sid, "guid-1").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
        // Key is scoped per source
        assert!(store
            .find_article(Uuid::new_v4(), "guid-1")
            .await
            .unwrap()
            .is_none());
    }
}
