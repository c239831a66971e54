//! Best-effort thumbnail caching. A failure here never blocks persistence;
//! callers keep the original URL.

use std::sync::Arc;

use async_trait::async_trait;
use hotdeal_storage::{ArtifactStore, HttpFetcher};
use tracing::debug;

use crate::AdapterError;

#[async_trait]
pub trait ThumbnailCache: Send + Sync {
    /// Returns the URL to store in place of `url`.
    async fn cache(&self, source: &str, url: &str) -> Result<String, AdapterError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughThumbnailCache;

#[async_trait]
impl ThumbnailCache for PassthroughThumbnailCache {
    async fn cache(&self, _source: &str, url: &str) -> Result<String, AdapterError> {
        Ok(url.to_string())
    }
}

/// Downloads the image into a hash-addressed [`ArtifactStore`] and serves it
/// from `public_base`.
pub struct ArtifactThumbnailCache {
    http: Arc<HttpFetcher>,
    store: ArtifactStore,
    public_base: String,
}

impl ArtifactThumbnailCache {
    pub fn new(http: Arc<HttpFetcher>, store: ArtifactStore, public_base: impl Into<String>) -> Self {
        Self {
            http,
            store,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }
}

pub(crate) fn image_extension(content_type: Option<&str>) -> Option<&'static str> {
    let mime = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        _ => None,
    }
}

#[async_trait]
impl ThumbnailCache for ArtifactThumbnailCache {
    async fn cache(&self, source: &str, url: &str) -> Result<String, AdapterError> {
        let response = self.http.fetch_bytes(source, url).await?;
        let Some(ext) = image_extension(response.content_type.as_deref()) else {
            return Err(AdapterError::Message(format!(
                "{url} is not an image ({})",
                response.content_type.as_deref().unwrap_or("no content type")
            )));
        };
        let stored = self
            .store
            .store_bytes(&format!("thumbs/{source}"), ext, &response.body)
            .await?;
        debug!(source, url, path = %stored.relative_path.display(), deduplicated = stored.deduplicated, "cached thumbnail");
        let relative = stored
            .relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!("{}/{relative}", self.public_base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_keeps_url() {
        let url = "https://cdn.example/a.jpg";
        assert_eq!(PassthroughThumbnailCache.cache("ppomppu", url).await.unwrap(), url);
    }

    #[test]
    fn only_image_content_types_get_an_extension() {
        assert_eq!(image_extension(Some("image/jpeg")), Some("jpg"));
        assert_eq!(image_extension(Some("IMAGE/PNG; charset=binary")), Some("png"));
        assert_eq!(image_extension(Some("text/html; charset=utf-8")), None);
        assert_eq!(image_extension(None), None);
    }
}
