//! Provisioning engine
//!
//! Binds the server controller, status resolver and pull orchestrator into
//! the command surface the presentation layer drives: init, status polling
//! with debounce, server install/start, model pulls and cancellation.

use crate::client::{HttpOllamaClient, OllamaApi};
use crate::config::ProvisionerConfig;
use crate::error::{ProvisionError, Result};
use crate::models::metadata::{ManifestSource, MetadataResolver, RegistryManifestSource};
use crate::models::pull::{PullOrchestrator, SizeClass};
use crate::models::status::{ModelStatus, ModelStatusResolver, TagCache};
use crate::platform::{self, InstallMode, Platform};
use crate::process::{CommandRunner, SystemCommandRunner};
use crate::progress::ProgressSink;
use crate::server::{ServerController, ServerStatus};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

pub const SERVER_STEP: usize = 0;
pub const MODELS_STEP: usize = 1;
pub const FINAL_STEP: usize = 2;

/// Step-sequencing state handed back to the caller across restarts. The
/// engine writes outcome signals into it; the caller owns its storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningState {
    pub steps: [bool; 3],
    pub selected_size: Option<SizeClass>,
}

/// Derived view of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Active,
    Complete,
}

impl ProvisioningState {
    /// A step is complete once its flag is set, active when every earlier
    /// step is complete, and pending otherwise.
    pub fn step(&self, index: usize) -> StepState {
        if self.steps[index] {
            StepState::Complete
        } else if self.steps[..index].iter().all(|done| *done) {
            StepState::Active
        } else {
            StepState::Pending
        }
    }

    /// Setup counts as finished once the server and models are in place;
    /// the tutorial step is advisory.
    pub fn is_complete(&self) -> bool {
        self.steps[SERVER_STEP] && self.steps[MODELS_STEP]
    }
}

/// Snapshot pushed to the presentation layer on every resolved status
/// fetch.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub server_status: ServerStatus,
    pub model_statuses: BTreeMap<String, ModelStatus>,
    pub state: ProvisioningState,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// Payload answering the presentation layer's `init` command.
#[derive(Debug, Clone, Serialize)]
pub struct InitInfo {
    pub install_modes: Vec<InstallMode>,
    pub state: ProvisioningState,
}

pub struct ProvisioningEngine {
    config: ProvisionerConfig,
    controller: ServerController,
    resolver: ModelStatusResolver,
    puller: PullOrchestrator,
    state: RwLock<ProvisioningState>,
    last_status: Mutex<Option<Instant>>,
    /// One live cancellation handle per session; a new operation disposes
    /// the previous one.
    canceller: Mutex<Option<CancellationToken>>,
}

impl ProvisioningEngine {
    /// Production wiring: HTTP client, registry manifests, system command
    /// runner.
    pub fn from_config(config: ProvisionerConfig) -> Result<Self> {
        let platform = Platform::current();
        let api: Arc<dyn OllamaApi> = Arc::new(HttpOllamaClient::new(
            config.server_url.clone(),
            config.probe_timeout(),
        )?);
        let manifests: Arc<dyn ManifestSource> = Arc::new(RegistryManifestSource::new(
            config.registry_url.clone(),
            config.manifest_timeout(),
        )?);
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::new(platform));
        Self::new(
            config,
            api,
            manifests,
            runner,
            platform,
            platform::is_sandboxed_workspace(),
        )
    }

    /// Explicit wiring, used by tests and embedders that bring their own
    /// transports.
    pub fn new(
        config: ProvisionerConfig,
        api: Arc<dyn OllamaApi>,
        manifests: Arc<dyn ManifestSource>,
        runner: Arc<dyn CommandRunner>,
        platform: Platform,
        sandboxed: bool,
    ) -> Result<Self> {
        let tags = Arc::new(TagCache::new(api.clone(), config.tag_cache_ttl()));
        let metadata = Arc::new(MetadataResolver::new(manifests));
        let installing = Arc::new(DashSet::new());

        let controller = ServerController::new(
            tags.clone(),
            runner,
            platform,
            sandboxed,
            config.installer_url.clone(),
            config.download_dir.clone(),
        )?;
        let resolver = ModelStatusResolver::new(
            api.clone(),
            tags,
            metadata.clone(),
            installing.clone(),
        );
        let puller = PullOrchestrator::new(api, metadata, installing);

        Ok(Self {
            config,
            controller,
            resolver,
            puller,
            state: RwLock::new(ProvisioningState::default()),
            last_status: Mutex::new(None),
            canceller: Mutex::new(None),
        })
    }

    /// Restore caller-held step state, e.g. after a panel restart.
    pub async fn restore_state(&self, state: ProvisioningState) {
        *self.state.write().await = state;
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Answer the `init` command: viable install modes plus current state.
    pub async fn init(&self) -> InitInfo {
        InitInfo {
            install_modes: self.controller.install_modes().await,
            state: self.state.read().await.clone(),
        }
    }

    /// Resolve a status snapshot, coalescing bursts of polls: a call
    /// arriving within the debounce window of the previous one is a no-op
    /// and returns `None`.
    pub async fn fetch_status(&self) -> Option<StatusSnapshot> {
        {
            let mut last = self.last_status.lock().await;
            let now = Instant::now();
            if let Some(previous) = *last
                && now.duration_since(previous) < self.config.status_debounce()
            {
                tracing::debug!("Debouncing status fetch");
                return None;
            }
            *last = Some(now);
        }
        Some(self.resolve_status().await)
    }

    /// Resolve a status snapshot unconditionally (config-change pushes and
    /// outcome signals bypass the debounce).
    pub async fn resolve_status(&self) -> StatusSnapshot {
        let server_status = self.controller.detect_status().await;

        let mut model_statuses = BTreeMap::new();
        for name in self.config.downloadable_models() {
            let status = self.resolver.model_status(server_status, &name).await;
            model_statuses.insert(name, status);
        }

        let mut state = self.state.write().await;
        state.steps[SERVER_STEP] = matches!(
            server_status,
            ServerStatus::Started | ServerStatus::Stopped
        );

        StatusSnapshot {
            server_status,
            model_statuses,
            state: state.clone(),
            checked_at: chrono::Utc::now(),
        }
    }

    pub async fn select_model_size(&self, size: SizeClass) {
        self.state.write().await.selected_size = Some(size);
    }

    /// Record that the tutorial was shown and push a fresh snapshot.
    pub async fn acknowledge_tutorial(&self) -> StatusSnapshot {
        self.state.write().await.steps[FINAL_STEP] = true;
        self.resolve_status().await
    }

    /// Install the server using `mode`. The session's cancellation handle
    /// is replaced; only the native-installer download observes it.
    pub async fn install_server(&self, mode: &str, sink: &dyn ProgressSink) -> Result<bool> {
        let cancel = self.fresh_canceller().await;
        self.controller.install_server(mode, &cancel, sink).await
    }

    pub async fn start_server(&self) -> Result<bool> {
        self.controller.start_server().await
    }

    /// Pull the artifact set for `size`, first making sure the server is
    /// reachable (starting it and polling when necessary).
    ///
    /// `Ok(false)` reports a cancelled pull; the caller learns the
    /// resulting state from its next status poll.
    pub async fn pull_models(&self, size: SizeClass, sink: &dyn ProgressSink) -> Result<bool> {
        self.ensure_server_started().await?;

        self.state.write().await.selected_size = Some(size);
        let cancel = self.fresh_canceller().await;

        let artifacts = self.config.artifact_set(size);
        let pulled = self
            .puller
            .pull_artifact_set(&artifacts, &cancel, sink)
            .await?;

        self.state.write().await.steps[MODELS_STEP] = pulled;
        Ok(pulled)
    }

    /// Trigger the session's cancellation handle, aborting any in-flight
    /// pull or installer download.
    pub async fn cancel_installation(&self) {
        if let Some(cancel) = self.canceller.lock().await.as_ref() {
            tracing::info!("Cancelling model installation");
            cancel.cancel();
        }
    }

    /// Passthrough to the server's available-model listing.
    pub async fn available_models(&self) -> Result<Vec<String>> {
        self.resolver.available_models().await
    }

    async fn fresh_canceller(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.canceller.lock().await = Some(token.clone());
        token
    }

    /// Wait for the server to become reachable: bounded polling at a fixed
    /// interval, exiting the instant a probe succeeds.
    async fn ensure_server_started(&self) -> Result<()> {
        if self.controller.detect_status().await == ServerStatus::Started {
            return Ok(());
        }

        tracing::info!("Server not reachable, launching it");
        match self.controller.start_server().await {
            Ok(launched) => {
                if !launched {
                    tracing::warn!("No launch strategy for this platform");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Server launch failed");
            }
        }

        let interval = self.config.start_poll_interval();
        let timeout = self.config.start_timeout();
        let attempts = (timeout.as_millis() / interval.as_millis().max(1)) as u64;

        for attempt in 0..attempts {
            if self.controller.detect_status().await == ServerStatus::Started {
                return Ok(());
            }
            tracing::debug!(attempt, "Waiting for server to start");
            tokio::time::sleep(interval).await;
        }

        Err(ProvisionError::StartTimeout(timeout))
    }
}
