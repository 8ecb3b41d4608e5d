//! Remote artifact metadata
//!
//! Resolves size and content identity for a named artifact from the model
//! registry's manifest endpoint. Results are cached per name; concurrent
//! requesters for the same name attach to the in-flight fetch instead of
//! issuing duplicate network calls.

use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Remote identity of a named artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Name as requested by the caller.
    pub id: String,
    /// Name with an explicit tag, as the server lists it.
    pub canonical_name: String,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the raw manifest body. The server reports
    /// this same fingerprint for installed tags.
    pub content_digest: String,
}

/// A model name with no tag refers to its `latest` tag.
pub fn canonical_name(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{name}:latest")
    }
}

/// Source of artifact manifests.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<ArtifactMetadata>;
}

/// Production manifest source against a docker-style model registry.
pub struct RegistryManifestSource {
    registry_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ManifestBlob {
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    config: Option<ManifestBlob>,
    #[serde(default)]
    layers: Vec<ManifestBlob>,
}

impl RegistryManifestSource {
    pub fn new(registry_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            registry_url: registry_url.into(),
            client,
        })
    }

    /// Split `name` into its registry repository and tag. Unnamespaced
    /// models live under `library/`.
    fn manifest_url(&self, name: &str) -> String {
        let canonical = canonical_name(name);
        let (repo, tag) = canonical
            .split_once(':')
            .unwrap_or((canonical.as_str(), "latest"));
        let repo = if repo.contains('/') {
            repo.to_string()
        } else {
            format!("library/{repo}")
        };
        let encoded_repo: Vec<_> = repo
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url,
            encoded_repo.join("/"),
            urlencoding::encode(tag)
        )
    }
}

#[async_trait]
impl ManifestSource for RegistryManifestSource {
    async fn fetch(&self, name: &str) -> Result<ArtifactMetadata> {
        let url = self.manifest_url(name);
        tracing::debug!(model = %name, url = %url, "Fetching manifest");

        let body = self
            .client
            .get(&url)
            .header(
                "Accept",
                "application/vnd.docker.distribution.manifest.v2+json",
            )
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let content_digest = format!("{:x}", Sha256::digest(&body));
        let manifest: Manifest = serde_json::from_slice(&body)
            .map_err(|e| ProvisionError::Protocol(format!("bad manifest for {name}: {e}")))?;

        let size_bytes = manifest.config.map(|c| c.size).unwrap_or(0)
            + manifest.layers.iter().map(|l| l.size).sum::<u64>();

        Ok(ArtifactMetadata {
            id: name.to_string(),
            canonical_name: canonical_name(name),
            size_bytes,
            content_digest,
        })
    }
}

/// Per-name metadata cache with single-flight fetches.
pub struct MetadataResolver {
    source: Arc<dyn ManifestSource>,
    results: DashMap<String, ArtifactMetadata>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Names whose lazy background fetch has already been triggered; one
    /// trigger per process lifetime.
    requested: DashSet<String>,
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn ManifestSource>) -> Self {
        Self {
            source,
            results: DashMap::new(),
            locks: DashMap::new(),
            requested: DashSet::new(),
        }
    }

    /// Completed metadata for `name`, without blocking on any fetch.
    pub fn peek(&self, name: &str) -> Option<ArtifactMetadata> {
        self.results.get(name).map(|entry| entry.clone())
    }

    /// Fetch metadata for `name`, or attach to the fetch already in flight
    /// for it. Successful results are cached; failures are retryable.
    pub async fn resolve(&self, name: &str) -> Result<ArtifactMetadata> {
        if let Some(found) = self.peek(name) {
            return Ok(found);
        }

        let lock = {
            let entry = self.locks.entry(name.to_string()).or_default();
            entry.value().clone()
        };
        let _guard = lock.lock().await;

        // Populated while we waited on the in-flight fetch.
        if let Some(found) = self.peek(name) {
            return Ok(found);
        }

        let metadata = self.source.fetch(name).await?;
        self.results.insert(name.to_string(), metadata.clone());
        Ok(metadata)
    }

    /// Trigger a background fetch for `name`, at most once per process
    /// lifetime. Never blocks the caller.
    pub fn request_background(self: &Arc<Self>, name: &str) {
        if !self.requested.insert(name.to_string()) {
            return;
        }
        let resolver = Arc::clone(self);
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = resolver.resolve(&name).await {
                tracing::warn!(model = %name, error = %e, "Background metadata fetch failed");
            }
        });
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::RwLock;

    /// Mock manifest source with canned metadata and failure injection.
    #[derive(Default)]
    pub struct MockManifestSource {
        pub metadata: RwLock<HashMap<String, ArtifactMetadata>>,
        pub failing: RwLock<Vec<String>>,
        pub fetches: AtomicU32,
        /// Optional delay, to widen coalescing windows in tests.
        pub delay: Option<Duration>,
    }

    impl MockManifestSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn put(&self, name: &str, size_bytes: u64, digest: &str) {
            self.metadata.write().await.insert(
                name.to_string(),
                ArtifactMetadata {
                    id: name.to_string(),
                    canonical_name: canonical_name(name),
                    size_bytes,
                    content_digest: digest.to_string(),
                },
            );
        }

        pub async fn fail(&self, name: &str) {
            self.failing.write().await.push(name.to_string());
        }

        pub fn fetch_count(&self) -> u32 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ManifestSource for MockManifestSource {
        async fn fetch(&self, name: &str) -> Result<ArtifactMetadata> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.read().await.iter().any(|n| n == name) {
                return Err(ProvisionError::MissingManifest {
                    name: name.to_string(),
                });
            }
            self.metadata
                .read()
                .await
                .get(name)
                .cloned()
                .ok_or_else(|| ProvisionError::MissingManifest {
                    name: name.to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockManifestSource;
    use super::*;

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("granite3.1-dense"), "granite3.1-dense:latest");
        assert_eq!(canonical_name("granite3.1-dense:2b"), "granite3.1-dense:2b");
    }

    #[test]
    fn test_manifest_url_layout() {
        let source =
            RegistryManifestSource::new("https://registry.ollama.ai", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            source.manifest_url("granite3.1-dense:2b"),
            "https://registry.ollama.ai/v2/library/granite3.1-dense/manifests/2b"
        );
        assert_eq!(
            source.manifest_url("nomic-embed-text"),
            "https://registry.ollama.ai/v2/library/nomic-embed-text/manifests/latest"
        );
        assert_eq!(
            source.manifest_url("myorg/custom:1.0"),
            "https://registry.ollama.ai/v2/myorg/custom/manifests/1.0"
        );
    }

    #[tokio::test]
    async fn test_resolve_caches_success() {
        let source = Arc::new(MockManifestSource::new());
        source.put("m:latest", 100, "abc").await;
        let resolver = MetadataResolver::new(source.clone());

        let first = resolver.resolve("m:latest").await.unwrap();
        let second = resolver.resolve("m:latest").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_retryable() {
        let source = Arc::new(MockManifestSource::new());
        source.fail("m:latest").await;
        let resolver = MetadataResolver::new(source.clone());

        assert!(resolver.resolve("m:latest").await.is_err());

        source.failing.write().await.clear();
        source.put("m:latest", 100, "abc").await;
        assert!(resolver.resolve("m:latest").await.is_ok());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_share_one_fetch() {
        let source = Arc::new(MockManifestSource {
            delay: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        source.put("m:latest", 100, "abc").await;
        let resolver = Arc::new(MetadataResolver::new(source.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("m:latest").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_background_request_fires_once() {
        let source = Arc::new(MockManifestSource::new());
        source.put("m:latest", 100, "abc").await;
        let resolver = Arc::new(MetadataResolver::new(source.clone()));

        assert!(resolver.peek("m:latest").is_none());
        resolver.request_background("m:latest");
        resolver.request_background("m:latest");
        resolver.request_background("m:latest");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(resolver.peek("m:latest").is_some());
        assert_eq!(source.fetch_count(), 1);
    }
}
