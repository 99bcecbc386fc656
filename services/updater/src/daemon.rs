//! Container daemon client interface.
//!
//! The updater never speaks the daemon wire protocol itself; everything it
//! needs from the container runtime goes through the [`DaemonClient`] trait.
//! A scriptable in-memory implementation lives in [`mock`] for tests and
//! development.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mock;

/// Errors from daemon operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The daemon rejected or could not complete the request.
    #[error("daemon request failed: {0}")]
    Request(String),

    /// The referenced container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The daemon does not support this operation (drives fallbacks,
    /// e.g. rename -> recreate backup mode).
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Registry-side failure while resolving a remote digest.
    #[error("registry error: {0}")]
    Registry(String),
}

/// One entry from a container listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Container ID.
    pub id: String,

    /// All names attached to the container, daemon-style with a leading `/`.
    pub names: Vec<String>,

    /// Image reference the container was created from.
    pub image: String,

    /// Resolved image ID.
    pub image_id: String,

    /// Runtime state (`running`, `exited`, ...).
    pub state: String,
}

impl ContainerSummary {
    /// Primary display name with the daemon's leading `/` stripped.
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or("")
    }
}

/// Runtime state portion of a container inspection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerState {
    /// Status string (`running`, `exited`, ...).
    pub status: String,

    /// Whether the container is currently running.
    pub running: bool,

    /// Exit code, meaningful when not running.
    pub exit_code: i64,

    /// Health status if the image defines a healthcheck
    /// (`healthy`, `unhealthy`, `starting`), empty otherwise.
    #[serde(default)]
    pub health: String,
}

/// Full container inspection.
///
/// `config`, `host_config` and `networks` are carried as raw JSON so a
/// replacement container can be created with the daemon-reported
/// configuration preserved verbatim, only the image overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInspect {
    /// Container ID.
    pub id: String,

    /// Name, daemon-style with a leading `/`.
    pub name: String,

    /// Image reference from the container config.
    pub image: String,

    /// Resolved image ID.
    pub image_id: String,

    /// Runtime state.
    pub state: ContainerState,

    /// Container config blob (entrypoint, env, labels, ...).
    pub config: serde_json::Value,

    /// Host config blob (ports, mounts, restart policy, ...).
    pub host_config: serde_json::Value,

    /// Network endpoint settings keyed by network name.
    pub networks: serde_json::Value,
}

impl ContainerInspect {
    /// Display name with the daemon's leading `/` stripped.
    pub fn display_name(&self) -> &str {
        self.name.trim_start_matches('/')
    }
}

/// Image inspection result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageInspect {
    /// Image ID (`sha256:...`).
    pub id: String,

    /// Locally recorded repo digests (`name@sha256:...`).
    pub repo_digests: Vec<String>,
}

/// Options for creating a replacement container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Container name, without leading `/`.
    pub name: String,

    /// Image reference to run.
    pub image: String,

    /// Preserved container config blob.
    pub config: serde_json::Value,

    /// Preserved host config blob.
    pub host_config: serde_json::Value,

    /// Preserved network endpoint settings.
    pub networks: serde_json::Value,
}

impl CreateOptions {
    /// Build creation options from a prior inspection, overriding only the
    /// image reference.
    pub fn from_inspect(inspect: &ContainerInspect, image: &str) -> Self {
        Self {
            name: inspect.display_name().to_string(),
            image: image.to_string(),
            config: inspect.config.clone(),
            host_config: inspect.host_config.clone(),
            networks: inspect.networks.clone(),
        }
    }
}

/// One event from an image pull progress stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullProgress {
    /// Layer or stage identifier, if any.
    #[serde(default)]
    pub id: String,

    /// Progress status line (`Downloading`, `Extracting`, ...).
    #[serde(default)]
    pub status: String,
}

/// Stream of pull progress events; ends when the pull completes.
pub type PullStream = Pin<Box<dyn Stream<Item = Result<PullProgress, DaemonError>> + Send>>;

/// Daemon-level info needed by the disk guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonInfo {
    /// Data-root directory the daemon stores images and layers under.
    pub data_root: String,
}

/// Container daemon operations consumed by the updater.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// List containers; `all` includes non-running ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, DaemonError>;

    /// Inspect a container by ID.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, DaemonError>;

    /// Stop a running container.
    async fn stop_container(&self, id: &str) -> Result<(), DaemonError>;

    /// Start a stopped container.
    async fn start_container(&self, id: &str) -> Result<(), DaemonError>;

    /// Remove a container.
    async fn remove_container(&self, id: &str) -> Result<(), DaemonError>;

    /// Rename a container.
    async fn rename_container(&self, id: &str, name: &str) -> Result<(), DaemonError>;

    /// Create a container, returning its ID.
    async fn create_container(&self, options: &CreateOptions) -> Result<String, DaemonError>;

    /// Inspect an image by reference or ID.
    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, DaemonError>;

    /// Remove an image by ID.
    async fn remove_image(&self, id: &str) -> Result<(), DaemonError>;

    /// Resolve the digest currently published for a reference in its
    /// registry (distribution inspect).
    async fn remote_digest(&self, reference: &str) -> Result<String, DaemonError>;

    /// Start pulling an image, returning its progress stream.
    async fn pull_image(&self, reference: &str) -> Result<PullStream, DaemonError>;

    /// Daemon info (data root).
    async fn info(&self) -> Result<DaemonInfo, DaemonError>;
}
