//! Server lifecycle control
//!
//! Detects whether the local server is installed and running, launches it,
//! and installs it through the platform-appropriate strategy.

use crate::download::download_file;
use crate::error::{ProvisionError, Result};
use crate::models::status::TagCache;
use crate::platform::{
    self, CommandSpec, InstallMode, Platform, SANDBOX_SETUP_DOCS, SERVER_DOWNLOAD_PAGE,
};
use crate::process::CommandRunner;
use crate::progress::ProgressSink;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Server lifecycle status. Owned exclusively by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Unknown,
    Missing,
    Stopped,
    Installing,
    Started,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Missing => write!(f, "missing"),
            Self::Stopped => write!(f, "stopped"),
            Self::Installing => write!(f, "installing"),
            Self::Started => write!(f, "started"),
        }
    }
}

pub struct ServerController {
    tags: Arc<TagCache>,
    runner: Arc<dyn CommandRunner>,
    platform: Platform,
    sandboxed: bool,
    status: RwLock<ServerStatus>,
    installer_url: String,
    download_dir: PathBuf,
    http: reqwest::Client,
}

impl ServerController {
    pub fn new(
        tags: Arc<TagCache>,
        runner: Arc<dyn CommandRunner>,
        platform: Platform,
        sandboxed: bool,
        installer_url: impl Into<String>,
        download_dir: PathBuf,
    ) -> Result<Self> {
        Ok(Self {
            tags,
            runner,
            platform,
            sandboxed,
            status: RwLock::new(ServerStatus::Unknown),
            installer_url: installer_url.into(),
            download_dir,
            http: reqwest::Client::builder().build()?,
        })
    }

    /// Last status without probing.
    pub async fn current_status(&self) -> ServerStatus {
        *self.status.read().await
    }

    /// Probe the server and reclassify.
    ///
    /// A reachable tag listing means `Started`. Otherwise the local
    /// installation decides between `Stopped` and `Missing`, unless an
    /// install is in progress: its completion is not observable through
    /// the probe, so `Installing` is only ever cleared by a successful
    /// probe, never downgraded by a failed one.
    pub async fn detect_status(&self) -> ServerStatus {
        let started = self.tags.get().await.is_ok();

        let mut status = self.status.write().await;
        if started {
            *status = ServerStatus::Started;
        } else if *status != ServerStatus::Installing {
            *status = if self.is_installed() {
                ServerStatus::Stopped
            } else {
                ServerStatus::Missing
            };
        }
        *status
    }

    pub fn is_installed(&self) -> bool {
        platform::server_installed(self.platform)
    }

    /// Install strategies viable here, preference-ordered.
    pub async fn install_modes(&self) -> Vec<InstallMode> {
        let homebrew = self.platform != Platform::Windows && self.homebrew_available().await;
        platform::install_modes(self.platform, self.sandboxed, homebrew)
    }

    async fn homebrew_available(&self) -> bool {
        let spec = CommandSpec::new("which", &["brew"]);
        match self.runner.output(&spec).await {
            Ok(path) => !path.is_empty() && !path.contains("not found"),
            Err(_) => false,
        }
    }

    /// Launch the server. Returns `false` when no launch command exists
    /// for this platform.
    pub async fn start_server(&self) -> Result<bool> {
        let Some(spec) = platform::start_command(self.platform) else {
            return Ok(false);
        };
        tracing::info!(program = %spec.program, "Launching server");
        self.runner
            .spawn_detached(&spec)
            .await
            .map_err(|e| ProvisionError::Command {
                program: spec.program.clone(),
                detail: e.to_string(),
            })?;
        Ok(true)
    }

    /// Install the server using the strategy selected by `mode`.
    ///
    /// Returns `Ok(true)` once the strategy has been dispatched (for the
    /// manual mode, success means the user was pointed at the download
    /// page). Cancellation and a failed installer download report
    /// `Ok(false)`. Command-runner failures propagate.
    pub async fn install_server(
        &self,
        mode: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<bool> {
        match mode {
            "sandbox" => {
                // No local action is possible; the install must happen
                // manually, outside this process.
                self.open_external(SANDBOX_SETUP_DOCS).await?;
                Ok(false)
            }
            "script" => {
                self.set_installing().await;
                self.run_install(platform::script_install_command()).await?;
                Ok(true)
            }
            "homebrew" => {
                self.set_installing().await;
                self.run_install(platform::homebrew_install_command())
                    .await?;
                Ok(true)
            }
            "installer" => {
                self.set_installing().await;
                let Some(installer) = self.download_installer(cancel, sink).await else {
                    return Ok(false);
                };
                self.run_install(platform::installer_run_command(&installer))
                    .await?;
                Ok(true)
            }
            _ => {
                self.open_external(SERVER_DOWNLOAD_PAGE).await?;
                Ok(true)
            }
        }
    }

    async fn set_installing(&self) {
        // Cleared again by the first successful probe; install commands do
        // not report completion themselves.
        *self.status.write().await = ServerStatus::Installing;
    }

    async fn run_install(&self, spec: CommandSpec) -> Result<()> {
        tracing::info!(program = %spec.program, "Running install command");
        self.runner
            .run(&spec)
            .await
            .map_err(|e| ProvisionError::Command {
                program: spec.program.clone(),
                detail: e.to_string(),
            })
    }

    async fn open_external(&self, url: &str) -> Result<()> {
        self.runner
            .open_external(url)
            .await
            .map_err(|e| ProvisionError::Command {
                program: "open".to_string(),
                detail: e.to_string(),
            })
    }

    /// Download the native installer to a unique temp path. `None` means
    /// the download was cancelled or failed; the installer must not run.
    async fn download_installer(
        &self,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Option<PathBuf> {
        let file = format!(
            "OllamaSetup-{}-{}.exe",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        );
        let dest = self.download_dir.join(file);

        match download_file(&self.http, &self.installer_url, &dest, cancel, sink).await {
            Ok(true) => Some(dest),
            Ok(false) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Installer download failed");
                None
            }
        }
    }
}
