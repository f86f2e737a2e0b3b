pub mod input;
pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use crate::api::Song;
use crate::errors::{AppError, Result};
pub use input::{classify_input, SongInput};
pub use spotify::SpotifyResolver;
pub use youtube::YtDlpResolver;

/// Turns a query or URL into a song. Provider failures come back as `None`,
/// never as errors.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    fn name(&self) -> &str;
    async fn resolve_by_query(&self, query: &str) -> Option<Song>;
    async fn resolve_by_url(&self, url: &str) -> Option<Song>;
}

/// Routes catalog links through the catalog backend and then finds a
/// fetchable source for them; everything else goes straight to content search.
pub struct CompositeResolver {
    catalog: Option<Arc<dyn ContentResolver>>,
    content: Arc<dyn ContentResolver>,
    cache: Cache<String, Song>,
}

impl CompositeResolver {
    pub fn new(catalog: Option<Arc<dyn ContentResolver>>, content: Arc<dyn ContentResolver>) -> Self {
        Self {
            catalog,
            content,
            cache: Cache::builder()
                .max_capacity(512)
                .time_to_live(Duration::from_secs(60 * 60))
                .build(),
        }
    }

    async fn cached<F>(&self, key: String, lookup: F) -> Option<Song>
    where
        F: std::future::Future<Output = Option<Song>> + Send,
    {
        if let Some(song) = self.cache.get(&key).await {
            log::debug!("💾 [RESOLVE] Cache hit for {}", key);
            return Some(song);
        }
        let song = lookup.await?;
        self.cache.insert(key, song.clone()).await;
        Some(song)
    }

    async fn resolve_catalog_url(&self, url: &str) -> Option<Song> {
        let Some(catalog) = &self.catalog else {
            log::warn!("⚠️ [RESOLVE] Catalog link {} given but no catalog credentials are configured", url);
            return None;
        };
        let song = catalog.resolve_by_url(url).await?;
        log::info!("🎵 [RESOLVE] Catalog: {}", song.display_name());

        let hit = self.content.resolve_by_query(&song.search_query()).await?;
        Some(song.merge_resolved(&hit))
    }

    /// Classifies raw user input and resolves it, reporting why nothing was found.
    pub async fn resolve_input(&self, raw: &str) -> Result<Song> {
        let song = match classify_input(raw)? {
            SongInput::Query(query) => self.resolve_by_query(&query).await,
            SongInput::CatalogUrl(url) | SongInput::ContentUrl(url) => self.resolve_by_url(&url).await,
        };
        song.ok_or(AppError::SourceNotFound)
    }
}

#[async_trait]
impl ContentResolver for CompositeResolver {
    fn name(&self) -> &str {
        "composite"
    }

    async fn resolve_by_query(&self, query: &str) -> Option<Song> {
        self.cached(format!("q:{}", query.trim().to_lowercase()), self.content.resolve_by_query(query))
            .await
    }

    async fn resolve_by_url(&self, url: &str) -> Option<Song> {
        match classify_input(url) {
            Ok(SongInput::CatalogUrl(url)) => {
                self.cached(format!("u:{}", url), self.resolve_catalog_url(&url)).await
            }
            Ok(SongInput::ContentUrl(url)) => {
                self.cached(format!("u:{}", url), self.content.resolve_by_url(&url)).await
            }
            Ok(SongInput::Query(query)) => self.resolve_by_query(&query).await,
            Err(e) => {
                log::warn!("⚠️ [RESOLVE] {}", e);
                None
            }
        }
    }
}
