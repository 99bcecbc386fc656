//! Scriptable in-memory daemon for tests and development.
//!
//! [`MockDaemon`] tracks containers and images in memory, counts every call,
//! and supports failure injection for the paths the update protocol has to
//! survive: create/start failures, unhealthy replacements, unsupported
//! rename, registry errors, stalled pulls.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::{
    ContainerInspect, ContainerState, ContainerSummary, CreateOptions, DaemonClient, DaemonError,
    DaemonInfo, ImageInspect, PullProgress, PullStream,
};

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    name: String,
    image: String,
    image_id: String,
    state: ContainerState,
    config: serde_json::Value,
    host_config: serde_json::Value,
    networks: serde_json::Value,
}

impl MockContainer {
    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            names: vec![self.name.clone()],
            image: self.image.clone(),
            image_id: self.image_id.clone(),
            state: self.state.status.clone(),
        }
    }

    fn inspect(&self, health_override: Option<String>) -> ContainerInspect {
        let mut state = self.state.clone();
        if let Some(health) = health_override {
            state.health = health;
        }
        ContainerInspect {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            image_id: self.image_id.clone(),
            state,
            config: self.config.clone(),
            host_config: self.host_config.clone(),
            networks: self.networks.clone(),
        }
    }
}

/// Call counts, exposed for assertions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallCounts {
    pub list_containers: u64,
    pub inspect_container: u64,
    pub stop_container: u64,
    pub start_container: u64,
    pub remove_container: u64,
    pub rename_container: u64,
    pub create_container: u64,
    pub pull_image: u64,
    pub remove_image: u64,
    pub remote_digest: u64,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, MockContainer>,
    images: BTreeMap<String, ImageInspect>,
    pulled_images: BTreeMap<String, ImageInspect>,
    remote_digests: BTreeMap<String, String>,
    data_root: String,

    calls: CallCounts,
    removed_images: Vec<String>,
    removed_containers: Vec<String>,

    fail_list: bool,
    fail_create: Option<String>,
    fail_start_names: HashSet<String>,
    exit_on_start: BTreeMap<String, i64>,
    rename_unsupported: bool,
    pull_errors: BTreeMap<String, String>,
    stalled_pulls: HashSet<String>,
    dripping_pulls: HashSet<String>,
    flooding_pulls: HashSet<String>,
    fail_remove_images: HashSet<String>,
    // Health strings served to successive inspections of containers this
    // mock created, keyed by display name.
    health_scripts: BTreeMap<String, VecDeque<String>>,
    created_ids: HashSet<String>,
    next_id: u64,
}

/// In-memory scriptable daemon.
#[derive(Clone, Default)]
pub struct MockDaemon {
    inner: Arc<Mutex<Inner>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        let daemon = Self::default();
        daemon.inner.lock().unwrap().data_root = "/var/lib/docker".to_string();
        daemon
    }

    /// Add a container in the given state (`running`, `exited`, ...).
    pub fn add_container(&self, id: &str, name: &str, image: &str, image_id: &str, state: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.containers.insert(
            id.to_string(),
            MockContainer {
                id: id.to_string(),
                name: format!("/{name}"),
                image: image.to_string(),
                image_id: image_id.to_string(),
                state: ContainerState {
                    status: state.to_string(),
                    running: state == "running",
                    exit_code: 0,
                    health: String::new(),
                },
                config: serde_json::json!({ "Image": image }),
                host_config: serde_json::json!({}),
                networks: serde_json::json!({}),
            },
        );
    }

    /// Set the health string reported for an existing container.
    pub fn set_container_health(&self, id: &str, health: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(container) = inner.containers.get_mut(id) {
            container.state.health = health.to_string();
        }
    }

    /// Register the locally known inspection for an image reference.
    pub fn set_image(&self, reference: &str, id: &str, repo_digests: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner.images.insert(
            reference.to_string(),
            ImageInspect {
                id: id.to_string(),
                repo_digests: repo_digests.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    /// Register what `inspect_image` reports for a reference after it has
    /// been pulled.
    pub fn set_pulled_image(&self, reference: &str, id: &str, repo_digests: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner.pulled_images.insert(
            reference.to_string(),
            ImageInspect {
                id: id.to_string(),
                repo_digests: repo_digests.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    /// Register the registry-published digest for a reference. References
    /// without an entry fail with a registry error.
    pub fn set_remote_digest(&self, reference: &str, digest: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .remote_digests
            .insert(reference.to_string(), digest.to_string());
    }

    pub fn set_data_root(&self, path: &str) {
        self.inner.lock().unwrap().data_root = path.to_string();
    }

    pub fn fail_list_containers(&self) {
        self.inner.lock().unwrap().fail_list = true;
    }

    pub fn fail_create(&self, message: &str) {
        self.inner.lock().unwrap().fail_create = Some(message.to_string());
    }

    /// Make `start_container` fail for containers with this display name.
    pub fn fail_start(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_start_names
            .insert(name.to_string());
    }

    /// Make containers with this display name exit with `code` right after
    /// a successful start.
    pub fn exit_after_start(&self, name: &str, code: i64) {
        self.inner
            .lock()
            .unwrap()
            .exit_on_start
            .insert(name.to_string(), code);
    }

    pub fn set_rename_unsupported(&self) {
        self.inner.lock().unwrap().rename_unsupported = true;
    }

    pub fn set_pull_error(&self, reference: &str, message: &str) {
        self.inner
            .lock()
            .unwrap()
            .pull_errors
            .insert(reference.to_string(), message.to_string());
    }

    /// Make pulls of this reference return a stream that never produces
    /// progress (drives the idle timeout).
    pub fn set_pull_stalled(&self, reference: &str) {
        self.inner
            .lock()
            .unwrap()
            .stalled_pulls
            .insert(reference.to_string());
    }

    /// Make pulls of this reference emit one progress event per second,
    /// forever. The pull never completes but also never goes idle.
    pub fn set_pull_dripping(&self, reference: &str) {
        self.inner
            .lock()
            .unwrap()
            .dripping_pulls
            .insert(reference.to_string());
    }

    /// Make pulls of this reference return a stream that is always ready
    /// with another progress event and never ends.
    pub fn set_pull_flooding(&self, reference: &str) {
        self.inner
            .lock()
            .unwrap()
            .flooding_pulls
            .insert(reference.to_string());
    }

    pub fn fail_remove_image(&self, id: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_remove_images
            .insert(id.to_string());
    }

    /// Script the health strings served to successive inspections of a
    /// container *created by this mock* with the given display name. Once
    /// the script runs out, health reads as empty (no healthcheck).
    pub fn script_health(&self, name: &str, sequence: &[&str]) {
        self.inner.lock().unwrap().health_scripts.insert(
            name.to_string(),
            sequence.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.lock().unwrap().calls
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.inner.lock().unwrap().removed_images.clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.inner.lock().unwrap().removed_containers.clone()
    }

    /// Summaries of all containers currently known to the mock.
    pub fn containers(&self) -> Vec<ContainerSummary> {
        let inner = self.inner.lock().unwrap();
        inner.containers.values().map(|c| c.summary()).collect()
    }

    /// Look up a container ID by display name.
    pub fn container_id_by_name(&self, name: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .values()
            .find(|c| c.name.trim_start_matches('/') == name)
            .map(|c| c.id.clone())
    }

    /// True when a container with this display name exists and is running.
    pub fn is_running(&self, name: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .values()
            .any(|c| c.name.trim_start_matches('/') == name && c.state.running)
    }
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.list_containers += 1;
        if inner.fail_list {
            return Err(DaemonError::Request("list failed".to_string()));
        }
        Ok(inner
            .containers
            .values()
            .filter(|c| all || c.state.running)
            .map(|c| c.summary())
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.inspect_container += 1;
        let Some(container) = inner.containers.get(id).cloned() else {
            return Err(DaemonError::NotFound(id.to_string()));
        };
        let health_override = if inner.created_ids.contains(id) {
            let name = container.name.trim_start_matches('/').to_string();
            inner
                .health_scripts
                .get_mut(&name)
                .and_then(VecDeque::pop_front)
        } else {
            None
        };
        Ok(container.inspect(health_override))
    }

    async fn stop_container(&self, id: &str) -> Result<(), DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.stop_container += 1;
        match inner.containers.get_mut(id) {
            Some(container) => {
                container.state.running = false;
                container.state.status = "exited".to_string();
                Ok(())
            }
            None => Err(DaemonError::NotFound(id.to_string())),
        }
    }

    async fn start_container(&self, id: &str) -> Result<(), DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.start_container += 1;
        // Resolve the injection knobs before borrowing the container.
        let Some(name) = inner
            .containers
            .get(id)
            .map(|c| c.name.trim_start_matches('/').to_string())
        else {
            return Err(DaemonError::NotFound(id.to_string()));
        };
        if inner.fail_start_names.contains(&name) {
            return Err(DaemonError::Request(format!("cannot start {name}")));
        }
        let exit_code = inner.exit_on_start.get(&name).copied();

        let Some(container) = inner.containers.get_mut(id) else {
            return Err(DaemonError::NotFound(id.to_string()));
        };
        if let Some(code) = exit_code {
            container.state.running = false;
            container.state.status = "exited".to_string();
            container.state.exit_code = code;
        } else {
            container.state.running = true;
            container.state.status = "running".to_string();
            container.state.exit_code = 0;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.remove_container += 1;
        if inner.containers.remove(id).is_none() {
            return Err(DaemonError::NotFound(id.to_string()));
        }
        inner.removed_containers.push(id.to_string());
        Ok(())
    }

    async fn rename_container(&self, id: &str, name: &str) -> Result<(), DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.rename_container += 1;
        if inner.rename_unsupported {
            return Err(DaemonError::Unsupported("rename"));
        }
        match inner.containers.get_mut(id) {
            Some(container) => {
                container.name = format!("/{name}");
                Ok(())
            }
            None => Err(DaemonError::NotFound(id.to_string())),
        }
    }

    async fn create_container(&self, options: &CreateOptions) -> Result<String, DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.create_container += 1;
        if let Some(message) = inner.fail_create.clone() {
            return Err(DaemonError::Request(message));
        }
        inner.next_id += 1;
        let id = format!("ctr_{:04}", inner.next_id);
        let image_id = inner
            .images
            .get(&options.image)
            .map(|i| i.id.clone())
            .unwrap_or_default();
        inner.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: format!("/{}", options.name),
                image: options.image.clone(),
                image_id,
                state: ContainerState {
                    status: "created".to_string(),
                    running: false,
                    exit_code: 0,
                    health: String::new(),
                },
                config: options.config.clone(),
                host_config: options.host_config.clone(),
                networks: options.networks.clone(),
            },
        );
        inner.created_ids.insert(id.clone());
        Ok(id)
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, DaemonError> {
        let inner = self.inner.lock().unwrap();
        inner
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(reference.to_string()))
    }

    async fn remove_image(&self, id: &str) -> Result<(), DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.remove_image += 1;
        if inner.fail_remove_images.contains(id) {
            return Err(DaemonError::Request(format!("image {id} in use")));
        }
        inner.removed_images.push(id.to_string());
        let id = id.to_string();
        inner.images.retain(|_, image| image.id != id);
        Ok(())
    }

    async fn remote_digest(&self, reference: &str) -> Result<String, DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.remote_digest += 1;
        inner
            .remote_digests
            .get(reference)
            .cloned()
            .ok_or_else(|| DaemonError::Registry(format!("no manifest for {reference}")))
    }

    async fn pull_image(&self, reference: &str) -> Result<PullStream, DaemonError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.pull_image += 1;

        if inner.stalled_pulls.contains(reference) {
            return Ok(Box::pin(tokio_stream::pending()));
        }
        if inner.flooding_pulls.contains(reference) {
            return Ok(Box::pin(tokio_stream::iter(std::iter::repeat_with(|| {
                Ok(PullProgress {
                    id: "layer0".to_string(),
                    status: "Downloading".to_string(),
                })
            }))));
        }
        if inner.dripping_pulls.contains(reference) {
            let ticks = IntervalStream::new(tokio::time::interval(Duration::from_secs(1)));
            return Ok(Box::pin(ticks.map(|_| {
                Ok(PullProgress {
                    id: "layer0".to_string(),
                    status: "Downloading".to_string(),
                })
            })));
        }
        if let Some(message) = inner.pull_errors.get(reference).cloned() {
            let events = vec![Err(DaemonError::Request(message))];
            return Ok(Box::pin(tokio_stream::iter(events)));
        }

        // The pull lands the staged image.
        if let Some(image) = inner.pulled_images.get(reference).cloned() {
            inner.images.insert(reference.to_string(), image);
        }

        let events: Vec<Result<PullProgress, DaemonError>> = vec![
            Ok(PullProgress {
                id: "layer0".to_string(),
                status: "Downloading".to_string(),
            }),
            Ok(PullProgress {
                id: "layer0".to_string(),
                status: "Pull complete".to_string(),
            }),
        ];
        Ok(Box::pin(tokio_stream::iter(events)))
    }

    async fn info(&self) -> Result<DaemonInfo, DaemonError> {
        let inner = self.inner.lock().unwrap();
        Ok(DaemonInfo {
            data_root: inner.data_root.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_lifecycle() {
        let daemon = MockDaemon::new();
        daemon.add_container("c1", "web", "nginx:latest", "sha256:old", "running");

        let listed = daemon.list_containers(true).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_name(), "web");

        daemon.stop_container("c1").await.unwrap();
        assert!(!daemon.is_running("web"));
        daemon.start_container("c1").await.unwrap();
        assert!(daemon.is_running("web"));
    }

    #[tokio::test]
    async fn test_start_injection_knobs() {
        let daemon = MockDaemon::new();
        daemon.add_container("c1", "web", "nginx:latest", "sha256:a", "exited");
        daemon.fail_start("web");
        assert!(daemon.start_container("c1").await.is_err());

        let daemon = MockDaemon::new();
        daemon.add_container("c1", "web", "nginx:latest", "sha256:a", "exited");
        daemon.exit_after_start("web", 9);
        daemon.start_container("c1").await.unwrap();
        assert!(!daemon.is_running("web"));

        let daemon = MockDaemon::new();
        daemon.add_container("c1", "web", "nginx:latest", "sha256:a", "exited");
        daemon.start_container("c1").await.unwrap();
        assert!(daemon.is_running("web"));
    }

    #[tokio::test]
    async fn test_pull_lands_staged_image() {
        let daemon = MockDaemon::new();
        daemon.set_image("nginx:latest", "sha256:old", &[]);
        daemon.set_pulled_image("nginx:latest", "sha256:new", &[]);

        let mut stream = daemon.pull_image("nginx:latest").await.unwrap();
        while let Some(event) = stream.next().await {
            event.unwrap();
        }

        let image = daemon.inspect_image("nginx:latest").await.unwrap();
        assert_eq!(image.id, "sha256:new");
        assert_eq!(daemon.calls().pull_image, 1);
    }

    #[tokio::test]
    async fn test_health_script_applies_to_created_only() {
        let daemon = MockDaemon::new();
        daemon.add_container("c1", "web", "nginx:latest", "sha256:old", "running");
        daemon.script_health("web", &["unhealthy"]);

        // Pre-existing container is not affected by the script.
        let inspect = daemon.inspect_container("c1").await.unwrap();
        assert_eq!(inspect.state.health, "");

        let options = CreateOptions {
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            config: serde_json::json!({}),
            host_config: serde_json::json!({}),
            networks: serde_json::json!({}),
        };
        daemon.remove_container("c1").await.unwrap();
        let id = daemon.create_container(&options).await.unwrap();
        let inspect = daemon.inspect_container(&id).await.unwrap();
        assert_eq!(inspect.state.health, "unhealthy");
        // Script exhausted: back to no healthcheck.
        let inspect = daemon.inspect_container(&id).await.unwrap();
        assert_eq!(inspect.state.health, "");
    }

    #[tokio::test]
    async fn test_rename_unsupported() {
        let daemon = MockDaemon::new();
        daemon.add_container("c1", "web", "nginx:latest", "sha256:old", "running");
        daemon.set_rename_unsupported();
        let err = daemon.rename_container("c1", "web__backup__1").await;
        assert!(matches!(err, Err(DaemonError::Unsupported(_))));
    }
}
