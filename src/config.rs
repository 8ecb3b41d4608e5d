//! Configuration structures and loading logic

use crate::models::pull::SizeClass;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Base URL of the local server API.
    pub server_url: String,
    /// Base URL of the model registry serving artifact manifests.
    pub registry_url: String,
    /// Native installer binary for the Windows install mode.
    pub installer_url: String,
    /// Where installer downloads land.
    pub download_dir: PathBuf,

    pub probe_timeout_secs: u64,
    pub manifest_timeout_secs: u64,
    pub tag_cache_ttl_ms: u64,
    pub status_debounce_ms: u64,
    pub start_timeout_secs: u64,
    pub start_poll_interval_ms: u64,

    /// Primary model of the `large` size class.
    pub large_model: String,
    /// Primary model of the `small` size class.
    pub small_model: String,
    /// Embedding model paired with either size class.
    pub embedding_model: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            registry_url: default_registry_url(),
            installer_url: default_installer_url(),
            download_dir: default_download_dir(),
            probe_timeout_secs: default_probe_timeout(),
            manifest_timeout_secs: default_manifest_timeout(),
            tag_cache_ttl_ms: default_tag_cache_ttl(),
            status_debounce_ms: default_status_debounce(),
            start_timeout_secs: default_start_timeout(),
            start_poll_interval_ms: default_start_poll_interval(),
            large_model: default_large_model(),
            small_model: default_small_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

impl ProvisionerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(url) = std::env::var("PROVISIONER_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(url) = std::env::var("PROVISIONER_REGISTRY_URL") {
            config.registry_url = url;
        }
        if let Ok(dir) = std::env::var("PROVISIONER_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Ok(timeout) = std::env::var("PROVISIONER_START_TIMEOUT_SECS") {
            config.start_timeout_secs = timeout
                .parse()
                .context("Invalid PROVISIONER_START_TIMEOUT_SECS value")?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (field, url) in [
            ("server_url", &self.server_url),
            ("registry_url", &self.registry_url),
            ("installer_url", &self.installer_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{field} must be an http(s) URL (got {url})");
            }
            if url.ends_with('/') {
                anyhow::bail!("{field} must not end with a slash (got {url})");
            }
        }

        if self.start_poll_interval_ms == 0 {
            anyhow::bail!("start_poll_interval_ms must be positive");
        }
        if self.start_timeout_secs * 1000 < self.start_poll_interval_ms {
            anyhow::bail!(
                "start_timeout_secs ({}) shorter than one poll interval",
                self.start_timeout_secs
            );
        }

        for (field, model) in [
            ("large_model", &self.large_model),
            ("small_model", &self.small_model),
            ("embedding_model", &self.embedding_model),
        ] {
            if model.is_empty() {
                anyhow::bail!("{field} cannot be empty");
            }
        }

        Ok(())
    }

    /// The fixed artifact list for a size class: the class's primary model
    /// paired with the embedding model.
    pub fn artifact_set(&self, size: SizeClass) -> Vec<String> {
        let primary = match size {
            SizeClass::Large => self.large_model.clone(),
            SizeClass::Small => self.small_model.clone(),
        };
        vec![primary, self.embedding_model.clone()]
    }

    /// Every artifact the engine may be asked about.
    pub fn downloadable_models(&self) -> Vec<String> {
        vec![
            self.small_model.clone(),
            self.large_model.clone(),
            self.embedding_model.clone(),
        ]
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }

    pub fn tag_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.tag_cache_ttl_ms)
    }

    pub fn status_debounce(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms)
    }
}

// Default functions
fn default_server_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_registry_url() -> String {
    "https://registry.ollama.ai".to_string()
}
fn default_installer_url() -> String {
    crate::platform::WINDOWS_INSTALLER_URL.to_string()
}
fn default_download_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("ollama-provisioner"))
        .unwrap_or_else(|| std::env::temp_dir().join("ollama-provisioner"))
}
fn default_probe_timeout() -> u64 {
    5
}
fn default_manifest_timeout() -> u64 {
    10
}
fn default_tag_cache_ttl() -> u64 {
    100
}
fn default_status_debounce() -> u64 {
    50
}
fn default_start_timeout() -> u64 {
    30
}
fn default_start_poll_interval() -> u64 {
    500
}
fn default_large_model() -> String {
    "granite3.1-dense:8b".to_string()
}
fn default_small_model() -> String {
    "granite3.1-dense:2b".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text:latest".to_string()
}
