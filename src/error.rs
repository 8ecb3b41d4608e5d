//! Engine error types

use std::time::Duration;

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors surfaced by the provisioning engine.
///
/// Transient probe failures never reach this type; they are downgraded to
/// status values at the call site. Everything here is an operation-level
/// failure the caller has to act on.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Transport-level failure talking to the server or the registry.
    #[error("request failed")]
    Http(#[from] reqwest::Error),

    /// The registry has no usable manifest for an artifact. Fatal for the
    /// pull path: downloading without a known size and identity is unsafe.
    #[error("no manifest available for {name}")]
    MissingManifest { name: String },

    /// An external command exited unsuccessfully or could not be launched.
    #[error("command `{program}` failed: {detail}")]
    Command { program: String, detail: String },

    /// The server did not become reachable within the polling window.
    #[error("server did not start within {0:?}")]
    StartTimeout(Duration),

    /// A malformed frame or body on the streaming pull endpoint.
    #[error("stream protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Reduce an error to what may cross the presentation boundary: a short
    /// headline plus the underlying detail string, no backtraces.
    pub fn user_message(&self) -> String {
        use std::error::Error;
        match self.source() {
            Some(source) => format!("{self}: {source}"),
            None => self.to_string(),
        }
    }
}
