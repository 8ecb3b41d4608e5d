//! HTTP client for the local server API
//!
//! Covers the three endpoints the engine consumes: the installed-artifact
//! tag listing, the available-model listing, and the streaming pull
//! endpoint whose response is newline-delimited JSON progress frames.

use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

/// Installed artifact as reported by the server's tag listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledArtifact {
    pub name: String,
    #[serde(default)]
    pub digest: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<InstalledArtifact>,
}

/// One progress frame from the streaming pull endpoint. Sizing fields only
/// appear once the server knows them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullFrame {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
}

pub type FrameStream = BoxStream<'static, Result<PullFrame>>;

/// Server API surface consumed by the engine.
#[async_trait]
pub trait OllamaApi: Send + Sync {
    /// Installed-artifact listing (name + digest).
    async fn tags(&self) -> Result<Vec<InstalledArtifact>>;

    /// Available model ids. Any shape mismatch yields an empty list.
    async fn models(&self) -> Result<Vec<String>>;

    /// Start a streaming pull for `name`. Dropping the returned stream
    /// aborts the underlying transport.
    async fn pull(&self, name: &str) -> Result<FrameStream>;
}

/// Production client over reqwest.
pub struct HttpOllamaClient {
    base_url: String,
    probe_timeout: Duration,
    client: reqwest::Client,
}

impl HttpOllamaClient {
    pub fn new(base_url: impl Into<String>, probe_timeout: Duration) -> Result<Self> {
        // No client-wide timeout: it would cut long-running pull streams.
        // Short-lived requests opt in per call.
        let client = reqwest::Client::builder()
            .connect_timeout(probe_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            probe_timeout,
            client,
        })
    }
}

#[async_trait]
impl OllamaApi for HttpOllamaClient {
    async fn tags(&self) -> Result<Vec<InstalledArtifact>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models)
    }

    async fn models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        Ok(parse_model_ids(&body))
    }

    async fn pull(&self, name: &str) -> Result<FrameStream> {
        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?
            .error_for_status()?;

        let bytes = response
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e));
        let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new());

        let frames = lines.filter_map(|line| async move {
            match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(
                    serde_json::from_str::<PullFrame>(&line)
                        .map_err(|e| ProvisionError::Protocol(format!("bad pull frame: {e}"))),
                ),
                Err(e) => Some(Err(ProvisionError::Protocol(e.to_string()))),
            }
        });

        Ok(frames.boxed())
    }
}

/// Extract model ids from an OpenAI-style listing, tolerating any shape
/// drift by returning nothing.
fn parse_model_ids(body: &serde_json::Value) -> Vec<String> {
    body.get("data")
        .and_then(|data| data.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("id").and_then(|id| id.as_str()))
                .map(|id| id.to_string())
                .collect()
        })
        .unwrap_or_default()
}
