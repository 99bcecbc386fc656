//! Tick driver: one invocation of the orchestrator over all eligible
//! containers.
//!
//! Containers are processed strictly sequentially; two simultaneous
//! replacements could race on shared host resources, and the disk gate must
//! reflect state as of tick start. Serializing concurrent ticks is the
//! scheduler's obligation, not this module's.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::daemon::DaemonClient;
use crate::disk::{data_root_free_bytes, MountsProvider};
use crate::health::HealthProbe;
use crate::image::PullBudget;
use crate::registry::IdentityRegistry;
use crate::settings::AutoUpdateSettings;
use crate::store::StateStore;
use crate::update::{process_container, UpdateContext};

/// Where in the tick an error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickScope {
    ListContainers,
    Container,
    PruneImage,
    PersistState,
}

/// One recoverable error from a tick. Nothing in a tick is fatal; the worst
/// case is partial progress plus a populated error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickError {
    pub scope: TickScope,

    /// Container name or image ID the error applies to, when scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub detail: String,
}

impl TickError {
    pub fn new(scope: TickScope, name: Option<&str>, detail: &str) -> Self {
        Self {
            scope,
            name: name.map(str::to_string),
            detail: detail.to_string(),
        }
    }
}

/// Aggregate result of one tick, also the payload of its audit record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub enabled: bool,
    pub ran: bool,
    pub pulls: u64,
    pub updates: u64,
    pub pruned: u64,
    pub skipped_due_to_disk: bool,
    pub errors: Vec<TickError>,
}

/// Everything a tick needs. The store is borrowed mutably for the duration:
/// history is mutated in process and flushed once at tick end.
pub struct TickContext<'a> {
    pub daemon: &'a dyn DaemonClient,
    pub mounts: &'a dyn MountsProvider,
    pub registry: &'a dyn IdentityRegistry,
    pub audit: &'a dyn AuditSink,
    pub admin_data: &'a serde_json::Value,
    pub store: &'a mut StateStore,
    pub pull_budget: PullBudget,
    pub health_probe: HealthProbe,
}

/// Run one auto-update tick.
pub async fn run_tick(ctx: TickContext<'_>) -> TickReport {
    let settings = AutoUpdateSettings::from_admin_data(ctx.admin_data);
    let mut report = TickReport {
        enabled: settings.enabled,
        ..TickReport::default()
    };
    if !settings.enabled {
        return report;
    }

    // Disk gate: a known-low data-root mount blocks the whole tick before
    // any container is listed. Unknown free space never blocks.
    let space = data_root_free_bytes(ctx.daemon, ctx.mounts).await;
    if let Some(free) = space.free_bytes {
        if free < settings.min_free_bytes {
            info!(
                free_bytes = free,
                min_free_bytes = settings.min_free_bytes,
                "Skipping tick, low disk space on data root"
            );
            report.skipped_due_to_disk = true;
            audit_tick(ctx.audit, &report);
            return report;
        }
    }

    let containers = match ctx.daemon.list_containers(true).await {
        Ok(containers) => containers,
        Err(err) => {
            warn!(error = %err, "Container listing failed, aborting tick");
            report.errors.push(TickError::new(
                TickScope::ListContainers,
                None,
                &err.to_string(),
            ));
            audit_tick(ctx.audit, &report);
            return report;
        }
    };
    report.ran = true;

    let update_ctx = UpdateContext {
        daemon: ctx.daemon,
        registry: ctx.registry,
        audit: ctx.audit,
        settings: &settings,
        pull_budget: ctx.pull_budget,
        health_probe: ctx.health_probe,
    };

    let mut dirty = false;
    for summary in &containers {
        let container_report = process_container(
            &update_ctx,
            summary,
            ctx.store.history_mut(),
            &containers,
            &mut dirty,
            report.pruned,
        )
        .await;

        if container_report.pulled {
            report.pulls += 1;
        }
        if container_report.updated {
            report.updates += 1;
        }
        report.pruned += container_report.pruned;
        report.errors.extend(container_report.errors);
    }

    if dirty {
        if let Err(err) = ctx.store.save().await {
            // Committed container changes stand; the operator learns about
            // the persistence gap through the error list.
            warn!(error = %err, "State persistence failed");
            report.errors.push(TickError::new(
                TickScope::PersistState,
                None,
                &err.to_string(),
            ));
        } else {
            debug!(path = %ctx.store.path().display(), "Image history persisted");
        }
    }

    audit_tick(ctx.audit, &report);
    info!(
        pulls = report.pulls,
        updates = report.updates,
        pruned = report.pruned,
        errors = report.errors.len(),
        "Tick complete"
    );
    report
}

fn audit_tick(audit: &dyn AuditSink, report: &TickReport) {
    let detail = serde_json::to_value(report).unwrap_or(serde_json::Value::Null);
    audit.append(AuditEvent::new(AuditAction::Tick).detail(detail));
}
