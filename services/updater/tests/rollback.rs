//! Integration tests for the failure half of the update protocol: health
//! gate rollbacks, the recreate backup fallback, and pull timeouts.

use serde_json::json;

use drydock_updater::audit::{AuditAction, MemoryAuditSink};
use drydock_updater::disk::{Mount, StaticMounts};
use drydock_updater::health::HealthProbe;
use drydock_updater::image::PullBudget;
use drydock_updater::registry::RecordingRegistry;
use drydock_updater::store::StateStore;
use drydock_updater::tick::{run_tick, TickContext, TickScope};
use drydock_updater::MockDaemon;

const GIB: u64 = 1024 * 1024 * 1024;

fn admin() -> serde_json::Value {
    json!({
        "widgets": [{
            "id": "docker",
            "type": "docker",
            "data": { "autoUpdate": true }
        }]
    })
}

fn quick_probe() -> HealthProbe {
    HealthProbe {
        interval: std::time::Duration::from_millis(200),
        deadline: std::time::Duration::from_secs(1),
    }
}

struct Harness {
    daemon: MockDaemon,
    mounts: StaticMounts,
    registry: RecordingRegistry,
    audit: MemoryAuditSink,
    store: StateStore,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json")).await.unwrap();
        let daemon = MockDaemon::new();
        daemon.add_container("c1", "web", "nginx:latest", "sha256:old", "running");
        daemon.set_image("nginx:latest", "sha256:old", &["nginx@sha256:digest-old"]);
        daemon.set_pulled_image("nginx:latest", "sha256:new", &["nginx@sha256:digest-new"]);
        daemon.set_remote_digest("nginx:latest", "sha256:digest-new");
        Self {
            daemon,
            mounts: StaticMounts(vec![Mount {
                mount_path: "/".to_string(),
                available_bytes: Some(100 * GIB),
            }]),
            registry: RecordingRegistry::new(),
            audit: MemoryAuditSink::new(),
            store,
            _dir: dir,
        }
    }

    async fn tick(&mut self) -> drydock_updater::TickReport {
        run_tick(TickContext {
            daemon: &self.daemon,
            mounts: &self.mounts,
            registry: &self.registry,
            audit: &self.audit,
            admin_data: &admin(),
            store: &mut self.store,
            pull_budget: PullBudget::default(),
            health_probe: quick_probe(),
        })
        .await
    }

    fn rollback_reasons(&self) -> Vec<String> {
        self.audit
            .with_action(AuditAction::Rollback)
            .into_iter()
            .map(|e| e.reason)
            .collect()
    }
}

#[tokio::test]
async fn test_unhealthy_replacement_rolls_back_to_original() {
    let mut h = Harness::new().await;
    h.daemon.script_health("web", &["unhealthy"]);

    let report = h.tick().await;

    assert_eq!(report.pulls, 1);
    assert_eq!(report.updates, 0);
    assert!(report.errors.is_empty());

    // The original container is back under its own name and running.
    assert_eq!(h.daemon.container_id_by_name("web").as_deref(), Some("c1"));
    assert!(h.daemon.is_running("web"));
    // The failed replacement is gone.
    assert_eq!(h.daemon.containers().len(), 1);

    assert!(h.registry.updates().is_empty());
    assert_eq!(h.rollback_reasons(), vec!["unhealthy".to_string()]);
    assert!(h.audit.with_action(AuditAction::Updated).is_empty());
}

#[tokio::test]
async fn test_replacement_that_exits_rolls_back() {
    let mut h = Harness::new().await;
    h.daemon.exit_after_start("web", 1);

    let report = h.tick().await;

    assert_eq!(report.updates, 0);
    assert_eq!(h.daemon.container_id_by_name("web").as_deref(), Some("c1"));
    assert_eq!(h.rollback_reasons(), vec!["exited:1".to_string()]);
    assert!(h.registry.updates().is_empty());
}

#[tokio::test]
async fn test_replacement_stuck_starting_times_out() {
    let mut h = Harness::new().await;
    h.daemon.script_health("web", &["starting"; 16]);

    let report = h.tick().await;

    assert_eq!(report.updates, 0);
    assert_eq!(h.rollback_reasons(), vec!["timeout".to_string()]);
    assert_eq!(h.daemon.container_id_by_name("web").as_deref(), Some("c1"));
    assert!(h.daemon.is_running("web"));
}

#[tokio::test]
async fn test_create_failure_restores_renamed_backup() {
    let mut h = Harness::new().await;
    h.daemon.fail_create("no such image");

    let report = h.tick().await;

    assert_eq!(report.pulls, 1);
    assert_eq!(report.updates, 0);
    assert_eq!(h.daemon.container_id_by_name("web").as_deref(), Some("c1"));
    assert!(h.daemon.is_running("web"));
    assert_eq!(h.rollback_reasons(), vec!["start_failed".to_string()]);
}

#[tokio::test]
async fn test_rename_unsupported_falls_back_to_recreate() {
    let mut h = Harness::new().await;
    h.daemon.set_rename_unsupported();

    let report = h.tick().await;

    assert_eq!(report.updates, 1);
    // The recreate backup removes the old container outright.
    assert!(h.daemon.removed_containers().contains(&"c1".to_string()));
    assert!(h.daemon.is_running("web"));
    let new_id = h.daemon.container_id_by_name("web").unwrap();
    assert_ne!(new_id, "c1");
    assert_eq!(
        h.registry.updates(),
        vec![("c1".to_string(), new_id, "web".to_string())]
    );
}

#[tokio::test]
async fn test_recreate_rollback_reconstructs_original() {
    let mut h = Harness::new().await;
    h.daemon.set_rename_unsupported();
    h.daemon.script_health("web", &["unhealthy"]);

    let report = h.tick().await;

    assert_eq!(report.updates, 0);
    assert_eq!(h.rollback_reasons(), vec!["unhealthy".to_string()]);
    // The original container object was removed, so the restored one runs
    // under the same name with a fresh ID.
    assert!(h.daemon.is_running("web"));
    let restored = h.daemon.container_id_by_name("web").unwrap();
    assert_ne!(restored, "c1");
    assert!(h.registry.updates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_pull_hits_idle_timeout() {
    let mut h = Harness::new().await;
    h.daemon.set_pull_stalled("nginx:latest");
    // A second, healthy container proves the tick keeps going.
    h.daemon
        .add_container("c2", "db", "postgres:16", "sha256:pg", "running");
    h.daemon.set_image("postgres:16", "sha256:pg", &[]);
    h.daemon.set_pulled_image("postgres:16", "sha256:pg", &[]);

    let report = h.tick().await;

    assert_eq!(report.updates, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].scope, TickScope::Container);
    assert_eq!(report.errors[0].name.as_deref(), Some("web"));
    assert!(report.errors[0].detail.contains("idle timeout"));
    // The stalled container was never touched.
    assert!(h.daemon.is_running("web"));
    assert_eq!(h.daemon.calls().stop_container, 0);
    // The other container still got its pull-and-check.
    assert_eq!(report.pulls, 1);
    assert_eq!(h.audit.with_action(AuditAction::Checked).len(), 1);
    assert_eq!(h.audit.with_action(AuditAction::Error).len(), 1);
}

#[tokio::test]
async fn test_pull_error_is_contained_to_one_container() {
    let mut h = Harness::new().await;
    h.daemon.set_pull_error("nginx:latest", "manifest unknown");

    let report = h.tick().await;

    assert_eq!(report.updates, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].scope, TickScope::Container);
    assert!(report.errors[0].detail.contains("manifest unknown"));
    assert!(h.daemon.is_running("web"));
}
