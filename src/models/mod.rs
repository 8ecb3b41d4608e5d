//! Model artifact management
//!
//! Provides functionality for:
//! - Resolving remote artifact metadata (size, content digest)
//! - Deriving installed-model status from the server listing
//! - Orchestrating sequential multi-artifact pulls

pub mod metadata;
pub mod pull;
pub mod status;

pub use metadata::{ArtifactMetadata, ManifestSource, MetadataResolver, RegistryManifestSource};
pub use pull::{PullOrchestrator, SizeClass};
pub use status::{ModelStatus, ModelStatusResolver, TagCache};
