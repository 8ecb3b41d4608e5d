//! Installed-model status resolution

use crate::client::{InstalledArtifact, OllamaApi};
use crate::error::Result;
use crate::models::metadata::{MetadataResolver, canonical_name};
use crate::server::ServerStatus;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Status of a named model, derived fresh on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unknown,
    Missing,
    Installing,
    Installed,
    Stale,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Missing => write!(f, "missing"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

struct CachedTags {
    fetched_at: Instant,
    tags: Vec<InstalledArtifact>,
}

/// Short-lived cache over the server tag listing.
///
/// Coalesces bursts of near-simultaneous queries: within the freshness
/// window every caller gets the cached listing, and an expiry triggers
/// exactly one re-query (the slot mutex serializes refreshers, and late
/// arrivals find the slot fresh again).
pub struct TagCache {
    api: Arc<dyn OllamaApi>,
    ttl: Duration,
    slot: Mutex<Option<CachedTags>>,
}

impl TagCache {
    pub fn new(api: Arc<dyn OllamaApi>, ttl: Duration) -> Self {
        Self {
            api,
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<Vec<InstalledArtifact>> {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref()
            && cached.fetched_at.elapsed() <= self.ttl
        {
            return Ok(cached.tags.clone());
        }

        let tags = self.api.tags().await?;
        *slot = Some(CachedTags {
            fetched_at: Instant::now(),
            tags: tags.clone(),
        });
        Ok(tags)
    }
}

/// Resolves model statuses from the server listing, the in-flight-install
/// set and remote metadata.
pub struct ModelStatusResolver {
    api: Arc<dyn OllamaApi>,
    tags: Arc<TagCache>,
    metadata: Arc<MetadataResolver>,
    installing: Arc<DashSet<String>>,
}

impl ModelStatusResolver {
    pub fn new(
        api: Arc<dyn OllamaApi>,
        tags: Arc<TagCache>,
        metadata: Arc<MetadataResolver>,
        installing: Arc<DashSet<String>>,
    ) -> Self {
        Self {
            api,
            tags,
            metadata,
            installing,
        }
    }

    pub fn metadata(&self) -> &Arc<MetadataResolver> {
        &self.metadata
    }

    /// Resolve the status of `name` given the current server status.
    ///
    /// Listing failures are downgraded to `Unknown`, never propagated.
    pub async fn model_status(&self, server: ServerStatus, name: &str) -> ModelStatus {
        if server != ServerStatus::Started || name.is_empty() {
            return ModelStatus::Unknown;
        }

        let canonical = canonical_name(name);
        if self.installing.contains(&canonical) {
            return ModelStatus::Installing;
        }

        let tags = match self.tags.get().await {
            Ok(tags) => tags,
            Err(e) => {
                tracing::debug!(model = %name, error = %e, "Tag listing failed");
                return ModelStatus::Unknown;
            }
        };

        let Some(installed) = tags.iter().find(|tag| tag.name == canonical) else {
            return ModelStatus::Missing;
        };

        // Installed. Kick off the remote identity fetch without blocking
        // the query; staleness only resolves once that has completed.
        self.metadata.request_background(&canonical);

        match self.metadata.peek(&canonical) {
            Some(remote) if !installed.digest.starts_with(&remote.content_digest) => {
                ModelStatus::Stale
            }
            _ => ModelStatus::Installed,
        }
    }

    /// Passthrough to the server's available-model listing.
    pub async fn available_models(&self) -> Result<Vec<String>> {
        self.api.models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mocks::MockOllamaApi;
    use crate::models::metadata::mocks::MockManifestSource;

    struct Fixture {
        api: Arc<MockOllamaApi>,
        source: Arc<MockManifestSource>,
        installing: Arc<DashSet<String>>,
        resolver: ModelStatusResolver,
    }

    fn fixture() -> Fixture {
        fixture_with_ttl(Duration::from_millis(100))
    }

    fn fixture_with_ttl(ttl: Duration) -> Fixture {
        let api = Arc::new(MockOllamaApi::new());
        let source = Arc::new(MockManifestSource::new());
        let metadata = Arc::new(MetadataResolver::new(source.clone()));
        let installing = Arc::new(DashSet::new());
        let tags = Arc::new(TagCache::new(api.clone(), ttl));
        let resolver =
            ModelStatusResolver::new(api.clone(), tags, metadata, installing.clone());
        Fixture {
            api,
            source,
            installing,
            resolver,
        }
    }

    #[tokio::test]
    async fn test_unknown_when_server_not_started() {
        let fx = fixture();
        for status in [
            ServerStatus::Unknown,
            ServerStatus::Missing,
            ServerStatus::Stopped,
            ServerStatus::Installing,
        ] {
            assert_eq!(
                fx.resolver.model_status(status, "granite3.1-dense:2b").await,
                ModelStatus::Unknown
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_for_empty_name() {
        let fx = fixture();
        assert_eq!(
            fx.resolver.model_status(ServerStatus::Started, "").await,
            ModelStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_installing_set_overrides_listing() {
        let fx = fixture();
        fx.api.install("granite3.1-dense:2b", "abc123").await;
        fx.installing.insert("granite3.1-dense:2b".to_string());

        assert_eq!(
            fx.resolver
                .model_status(ServerStatus::Started, "granite3.1-dense:2b")
                .await,
            ModelStatus::Installing
        );
        // The listing was never consulted.
        assert_eq!(*fx.api.tag_queries.read().await, 0);
    }

    #[tokio::test]
    async fn test_missing_when_not_listed() {
        let fx = fixture();
        assert_eq!(
            fx.resolver
                .model_status(ServerStatus::Started, "granite3.1-dense:2b")
                .await,
            ModelStatus::Missing
        );
    }

    #[tokio::test]
    async fn test_installed_without_metadata() {
        let fx = fixture();
        fx.api.install("granite3.1-dense:2b", "abc123").await;
        assert_eq!(
            fx.resolver
                .model_status(ServerStatus::Started, "granite3.1-dense:2b")
                .await,
            ModelStatus::Installed
        );
    }

    #[tokio::test]
    async fn test_prefix_digest_match_is_current() {
        let fx = fixture();
        fx.api.install("m:latest", "abc123").await;
        fx.source.put("m:latest", 100, "abc").await;
        fx.resolver.metadata().resolve("m:latest").await.unwrap();

        assert_eq!(
            fx.resolver.model_status(ServerStatus::Started, "m").await,
            ModelStatus::Installed
        );
    }

    #[tokio::test]
    async fn test_digest_mismatch_is_stale() {
        let fx = fixture();
        fx.api.install("m:latest", "abc123").await;
        fx.source.put("m:latest", 100, "abc999").await;
        fx.resolver.metadata().resolve("m:latest").await.unwrap();

        assert_eq!(
            fx.resolver.model_status(ServerStatus::Started, "m").await,
            ModelStatus::Stale
        );
    }

    #[tokio::test]
    async fn test_listing_failure_is_unknown() {
        let fx = fixture();
        fx.api.set_offline(true).await;
        assert_eq!(
            fx.resolver
                .model_status(ServerStatus::Started, "granite3.1-dense:2b")
                .await,
            ModelStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_tag_cache_coalesces_within_window() {
        let fx = fixture_with_ttl(Duration::from_millis(200));
        fx.api.install("m:latest", "abc").await;

        for _ in 0..5 {
            let _ = fx.resolver.model_status(ServerStatus::Started, "m").await;
        }
        assert_eq!(*fx.api.tag_queries.read().await, 1);
    }

    #[tokio::test]
    async fn test_tag_cache_requeries_after_expiry() {
        let fx = fixture_with_ttl(Duration::from_millis(10));
        fx.api.install("m:latest", "abc").await;

        let _ = fx.resolver.model_status(ServerStatus::Started, "m").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = fx.resolver.model_status(ServerStatus::Started, "m").await;
        assert_eq!(*fx.api.tag_queries.read().await, 2);
    }

    #[tokio::test]
    async fn test_available_models_passthrough() {
        let fx = fixture();
        fx.api
            .available
            .write()
            .await
            .push("granite3.1-dense:2b".to_string());
        let models = fx.resolver.available_models().await.unwrap();
        assert_eq!(models, vec!["granite3.1-dense:2b"]);
    }
}
