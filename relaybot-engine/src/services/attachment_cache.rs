use std::{collections::HashMap, sync::Arc, time::Duration};

use metrics::counter;
use shared::{config::AttachmentCacheConfig, models::SerializedFile};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, trace};

use crate::{
    errors::{EngineError, EngineResult},
    transport::ChatTransport,
};

#[derive(Debug)]
struct CacheEntry {
    content: Arc<str>,
    fetched_at: Instant,
    last_access: Instant,
}

/// Read-through cache of downloaded attachment text, keyed by URL.
///
/// Entries live for a fixed TTL counted from their download. Once the cache
/// holds more than `max_entries`, expired entries are purged first and the
/// least recently accessed ones after that.
#[derive(Debug)]
pub struct AttachmentCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl AttachmentCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub fn from_config(config: &AttachmentCacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    /// Returns the cached text for `file`, downloading it on a miss.
    ///
    /// # Errors
    /// Fails with [`EngineError::UnsupportedAttachmentType`] for non-text files
    /// and [`EngineError::AttachmentFetch`] when the download fails.
    pub async fn get_or_fetch(
        &self,
        transport: &dyn ChatTransport,
        file: &SerializedFile,
    ) -> EngineResult<Arc<str>> {
        if !file.is_text() {
            return Err(EngineError::UnsupportedAttachmentType {
                url: file.url.clone(),
                content_type: file.content_type.clone(),
            });
        }

        if let Some(content) = self.lookup(&file.url).await {
            counter!("relaybot_attachment_cache_hits_total").increment(1);
            trace!(url = %file.url, "attachment cache hit");
            return Ok(content);
        }

        counter!("relaybot_attachment_cache_misses_total").increment(1);
        let content: Arc<str> = transport
            .download_attachment(file)
            .await
            .map_err(|source| EngineError::AttachmentFetch {
                url: file.url.clone(),
                source,
            })?
            .into();

        self.insert(file.url.clone(), Arc::clone(&content)).await;
        Ok(content)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn lookup(&self, url: &str) -> Option<Arc<str>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(url) {
            Some(entry) if now.duration_since(entry.fetched_at) < self.ttl => {
                entry.last_access = now;
                Some(Arc::clone(&entry.content))
            }
            Some(_) => {
                entries.remove(url);
                None
            }
            None => None,
        }
    }

    async fn insert(&self, url: String, content: Arc<str>) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.insert(
            url,
            CacheEntry {
                content,
                fetched_at: now,
                last_access: now,
            },
        );

        if entries.len() <= self.max_entries {
            return;
        }

        let ttl = self.ttl;
        entries.retain(|_, entry| now.duration_since(entry.fetched_at) < ttl);

        while entries.len() > self.max_entries {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(url, _)| url.clone())
            else {
                break;
            };
            debug!(url = %oldest, "evicting attachment from cache");
            entries.remove(&oldest);
        }
    }
}
