//! Sequential multi-artifact pull orchestration
//!
//! Downloads a fixed artifact list through the server's streaming pull
//! endpoint, aggregating per-artifact progress into one reported operation.
//! Artifacts are pulled strictly in list order: sequential transfers bound
//! peak bandwidth and disk usage and keep overall progress monotonic.

use crate::client::OllamaApi;
use crate::error::{ProvisionError, Result};
use crate::models::metadata::{ArtifactMetadata, MetadataResolver, canonical_name};
use crate::progress::{ProgressSink, TransferReporter};
use dashmap::DashSet;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Caller-selected preset mapping to a fixed artifact list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Large,
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Large => write!(f, "large"),
        }
    }
}

/// Turns the cumulative byte counter reported for one artifact into
/// monotonic increments. A frame reporting less than its predecessor is a
/// stream restart signal; the counter resets to zero so no negative
/// increment is ever produced.
#[derive(Debug, Default)]
struct DeltaTracker {
    current: u64,
}

impl DeltaTracker {
    fn observe(&mut self, completed: u64) -> u64 {
        if completed < self.current {
            self.current = 0;
        }
        let increment = completed - self.current;
        self.current = completed;
        increment
    }
}

/// Removes its names from the in-flight set when the pull ends, however it
/// ends.
struct InstallGuard {
    set: Arc<DashSet<String>>,
    names: Vec<String>,
}

impl InstallGuard {
    fn enter(set: &Arc<DashSet<String>>, names: &[String]) -> Self {
        for name in names {
            set.insert(name.clone());
        }
        Self {
            set: set.clone(),
            names: names.to_vec(),
        }
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        for name in &self.names {
            self.set.remove(name);
        }
    }
}

pub struct PullOrchestrator {
    api: Arc<dyn OllamaApi>,
    metadata: Arc<MetadataResolver>,
    installing: Arc<DashSet<String>>,
}

impl PullOrchestrator {
    pub fn new(
        api: Arc<dyn OllamaApi>,
        metadata: Arc<MetadataResolver>,
        installing: Arc<DashSet<String>>,
    ) -> Self {
        Self {
            api,
            metadata,
            installing,
        }
    }

    /// Pull every artifact in `artifacts`, in order, reporting aggregated
    /// byte progress through `sink`.
    ///
    /// Returns `Ok(false)` on cancellation; already-reported progress is
    /// not rolled back. A missing manifest aborts the whole operation with
    /// an error before any transfer starts.
    pub async fn pull_artifact_set(
        &self,
        artifacts: &[String],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<bool> {
        let names: Vec<String> = artifacts.iter().map(|name| canonical_name(name)).collect();
        let _guard = InstallGuard::enter(&self.installing, &names);

        let mut resolved = Vec::with_capacity(names.len());
        for name in &names {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let metadata = self.metadata.resolve(name).await.map_err(|e| {
                tracing::warn!(model = %name, error = %e, "Manifest fetch failed");
                ProvisionError::MissingManifest { name: name.clone() }
            })?;
            resolved.push(metadata);
        }

        let expected_total: u64 = resolved.iter().map(|m| m.size_bytes).sum();
        tracing::info!(
            artifacts = names.len(),
            expected_total,
            "Starting artifact pull"
        );

        let mut reporter = TransferReporter::begin(sink, "Downloading models", expected_total);
        for metadata in &resolved {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            if !self.pull_one(metadata, &mut reporter, cancel).await? {
                return Ok(false);
            }
        }
        reporter.done();
        Ok(true)
    }

    async fn pull_one(
        &self,
        metadata: &ArtifactMetadata,
        reporter: &mut TransferReporter<'_>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let name = &metadata.canonical_name;
        tracing::info!(model = %name, size = metadata.size_bytes, "Pulling artifact");

        let mut frames = self.api.pull(name).await?;
        let mut tracker = DeltaTracker::default();
        let label = format!("Pulling {name}");

        loop {
            let frame = tokio::select! {
                // Dropping `frames` aborts the underlying transport.
                _ = cancel.cancelled() => {
                    tracing::info!(model = %name, "Pull cancelled");
                    return Ok(false);
                }
                frame = frames.next() => frame,
            };

            match frame {
                None => return Ok(true),
                Some(Err(e)) => return Err(e),
                Some(Ok(frame)) => {
                    // Frames without sizing info (manifest negotiation,
                    // digest verification) carry no byte progress.
                    if frame.total.is_some() {
                        let increment = tracker.observe(frame.completed.unwrap_or(0));
                        reporter.update(increment, &label);
                    }
                }
            }
        }
    }
}
