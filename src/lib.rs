//! Ollama Provisioner - local inference runtime provisioning engine
//!
//! Detects, starts and installs a local Ollama server, resolves model
//! installation and staleness status against the remote registry, and
//! orchestrates multi-artifact pulls with aggregated progress reporting and
//! cooperative cancellation.

pub mod client;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod models;
pub mod platform;
pub mod process;
pub mod progress;
pub mod server;

pub use client::{HttpOllamaClient, InstalledArtifact, OllamaApi, PullFrame};
pub use config::ProvisionerConfig;
pub use engine::{InitInfo, ProvisioningEngine, ProvisioningState, StatusSnapshot, StepState};
pub use error::{ProvisionError, Result};
pub use models::{
    ArtifactMetadata, MetadataResolver, ModelStatus, ModelStatusResolver, PullOrchestrator,
    SizeClass, TagCache,
};
pub use platform::{InstallMode, Platform};
pub use process::{CommandRunner, SystemCommandRunner};
pub use progress::{ProgressEvent, ProgressSink, TransferReporter};
pub use server::{ServerController, ServerStatus};
