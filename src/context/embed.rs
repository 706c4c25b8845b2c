//! Open Graph image resolution for image-type embeds
//!
//! Discord's embed object carries the linked page URL, not the image
//! itself; the true image URL comes from the page's `og:image` meta tag.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

/// Resolves an embed's linked page to a direct image URL
#[async_trait]
pub trait EmbedResolver: Send + Sync {
    /// Returns `None` when the page has no usable image or cannot be
    /// fetched; failures never propagate.
    async fn resolve_image_url(&self, url: &str) -> Option<String>;
}

/// `og:image`-based resolver with a small LRU cache
pub struct OgImageResolver {
    client: reqwest::Client,
    cache: Mutex<LruCache<String, Option<String>>>,
}

impl OgImageResolver {
    const CACHE_SIZE: usize = 100;
    const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a new resolver
    #[must_use]
    pub fn new() -> Self {
        let cache_size = NonZeroUsize::new(Self::CACHE_SIZE).expect("cache size is non-zero");
        Self {
            client: reqwest::Client::builder()
                .timeout(Self::FETCH_TIMEOUT)
                .user_agent("Mozilla/5.0 (compatible; BugbotGateway/1.0)")
                .build()
                .unwrap_or_default(),
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    async fn fetch_image_url(&self, url: &str) -> Option<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .inspect_err(|e| tracing::debug!(url, error = %e, "embed page fetch failed"))
            .ok()?;

        if !response.status().is_success() {
            tracing::debug!(url, status = %response.status(), "embed page fetch failed");
            return None;
        }

        let html = response.text().await.ok()?;
        extract_og_image(&html, url)
    }
}

impl Default for OgImageResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbedResolver for OgImageResolver {
    async fn resolve_image_url(&self, url: &str) -> Option<String> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(cached) = cache.get(url) {
                return cached.clone();
            }
        }

        let resolved = self.fetch_image_url(url).await;

        let mut cache = self.cache.lock().await;
        cache.put(url.to_string(), resolved.clone());

        resolved
    }
}

/// Extract the `og:image` meta content from an HTML document, resolving
/// relative values against the page URL
fn extract_og_image(html: &str, page_url: &str) -> Option<String> {
    use scraper::{Html, Selector};

    let document = Html::parse_document(html);
    let selector =
        Selector::parse(r#"meta[property="og:image"], meta[name="og:image"]"#).ok()?;

    let content = document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))?;

    if content.starts_with("http") {
        return Some(content.to_string());
    }

    let base = url::Url::parse(page_url).ok()?;
    base.join(content).ok().map(Into::into)
}
