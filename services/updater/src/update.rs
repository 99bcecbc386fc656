//! Per-container update protocol.
//!
//! One container moves through a fixed sequence of gates: filter,
//! precondition, pull decision, pull, compare, backup, create/start, health
//! gate, commit. Every gate early-exits with a typed [`ContainerOutcome`];
//! replacement failures trigger a compensating rollback whose individual
//! steps are each best-effort, so rollback can never mask the original
//! failure. A single container's failure never aborts the tick.

use std::collections::HashSet;

use chrono::Utc;
use drydock_retention::{prune_candidates, ImageHistory};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::daemon::{ContainerSummary, CreateOptions, DaemonClient, DaemonError};
use crate::health::{wait_until_healthy, HealthProbe};
use crate::image::{
    local_repo_digest, needs_pull, pull_with_budget, ImageReference, PullBudget, PullError,
};
use crate::registry::IdentityRegistry;
use crate::settings::AutoUpdateSettings;
use crate::tick::{TickError, TickScope};

/// Containers whose image or name contains this substring are never
/// touched: the orchestrator must not replace itself or its own stack.
pub const PROTECTED_SUBSTRING: &str = "drydock";

/// Errors that abort one container's processing.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Pull(#[from] PullError),
}

/// How the pre-update container was preserved for rollback.
#[derive(Debug, Clone)]
pub enum BackupMode {
    /// Renamed in place to a timestamped backup name; the container still
    /// exists under `backup_name`.
    Rename { backup_name: String },

    /// Removed outright; enough of its configuration is retained to
    /// reconstruct it.
    Recreate { options: CreateOptions },
}

impl BackupMode {
    fn label(&self) -> &'static str {
        match self {
            Self::Rename { .. } => "rename",
            Self::Recreate { .. } => "recreate",
        }
    }
}

/// Ephemeral record of one container's update attempt, carried through the
/// gates and flattened into the audit detail.
#[derive(Debug, Default)]
struct UpdateRecord {
    image: String,
    current_image_id: String,
    new_image_id: Option<String>,
    local_digest: Option<String>,
    remote_digest: Option<String>,
    backup: Option<&'static str>,
}

impl UpdateRecord {
    fn detail(&self) -> serde_json::Value {
        serde_json::json!({
            "image": self.image,
            "currentImageId": self.current_image_id,
            "newImageId": self.new_image_id,
            "localDigest": self.local_digest,
            "remoteDigest": self.remote_digest,
            "backup": self.backup,
        })
    }
}

/// Terminal outcome for one container in one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    /// Not eligible: not running, operator-disabled, or protected.
    Filtered,

    /// Deliberately not updated (digest-pinned, failed precheck, digests
    /// already equal).
    Skipped { reason: String },

    /// A pull completed (or was provably unnecessary) and the container is
    /// already on the newest image.
    Checked,

    /// Replaced and committed.
    Updated { old_id: String, new_id: String },

    /// Replacement failed; the prior container was restored.
    RolledBack { reason: String },

    /// Unexpected failure; recorded, tick continues.
    Failed { error: String },
}

/// Aggregate result of one container's processing.
#[derive(Debug, Default)]
pub struct ContainerReport {
    pub outcome: Option<ContainerOutcome>,
    pub pulled: bool,
    pub updated: bool,
    pub pruned: u64,
    pub errors: Vec<TickError>,
}

/// Shared collaborators for container processing.
pub struct UpdateContext<'a> {
    pub daemon: &'a dyn DaemonClient,
    pub registry: &'a dyn IdentityRegistry,
    pub audit: &'a dyn AuditSink,
    pub settings: &'a AutoUpdateSettings,
    pub pull_budget: PullBudget,
    pub health_probe: HealthProbe,
}

/// Run one container through the update protocol.
///
/// `tick_containers` is the listing taken at tick start, reused for the
/// in-use set when the post-update re-list fails. History mutations set
/// `dirty` for the tick's persistence pass. `tick_pruned` is how many
/// images earlier containers in this tick already removed; the
/// `max_prune_per_run` bound applies to the whole tick, not per container.
pub async fn process_container(
    ctx: &UpdateContext<'_>,
    summary: &ContainerSummary,
    history: &mut ImageHistory,
    tick_containers: &[ContainerSummary],
    dirty: &mut bool,
    tick_pruned: u64,
) -> ContainerReport {
    let mut report = ContainerReport::default();

    if is_filtered(ctx.settings, summary) {
        report.outcome = Some(ContainerOutcome::Filtered);
        return report;
    }

    let name = summary.display_name().to_string();
    match attempt(
        ctx,
        summary,
        history,
        tick_containers,
        dirty,
        tick_pruned,
        &mut report,
    )
    .await
    {
        Ok(outcome) => report.outcome = Some(outcome),
        Err(err) => {
            let error = err.to_string();
            warn!(container = %name, error = %error, "Container update failed");
            ctx.audit.append(
                AuditEvent::new(AuditAction::Error)
                    .container(&name)
                    .image(&summary.image)
                    .reason(error.clone()),
            );
            report
                .errors
                .push(TickError::new(TickScope::Container, Some(&name), &error));
            report.outcome = Some(ContainerOutcome::Failed { error });
        }
    }
    report
}

/// Filter gate: non-running, operator-disabled, and protected containers
/// are invisible to the updater (no per-container audit).
fn is_filtered(settings: &AutoUpdateSettings, summary: &ContainerSummary) -> bool {
    if summary.state != "running" {
        return true;
    }
    if settings.is_disabled(summary.display_name()) {
        return true;
    }
    let image_protected = summary.image.to_lowercase().contains(PROTECTED_SUBSTRING);
    let name_protected = summary
        .names
        .iter()
        .any(|n| n.to_lowercase().contains(PROTECTED_SUBSTRING));
    image_protected || name_protected
}

async fn attempt(
    ctx: &UpdateContext<'_>,
    summary: &ContainerSummary,
    history: &mut ImageHistory,
    tick_containers: &[ContainerSummary],
    dirty: &mut bool,
    tick_pruned: u64,
    report: &mut ContainerReport,
) -> Result<ContainerOutcome, UpdateError> {
    let daemon = ctx.daemon;
    let name = summary.display_name().to_string();

    // Precondition gate.
    let inspect = daemon.inspect_container(&summary.id).await?;
    let image_name = if inspect.image.is_empty() {
        summary.image.clone()
    } else {
        inspect.image.clone()
    };
    let current_image_id = if inspect.image_id.is_empty() {
        summary.image_id.clone()
    } else {
        inspect.image_id.clone()
    };

    let mut record = UpdateRecord {
        image: image_name.clone(),
        current_image_id: current_image_id.clone(),
        ..UpdateRecord::default()
    };

    let reference = ImageReference::parse(&image_name);
    if reference.is_digest_pinned() {
        return Ok(skip(ctx, &record, &name, "digest_pinned"));
    }
    let health = inspect.state.health.as_str();
    if !health.is_empty() && health != "healthy" {
        return Ok(skip(ctx, &record, &name, format!("precheck_{health}")));
    }

    // Pull decision.
    record.local_digest = match daemon.inspect_image(&image_name).await {
        Ok(image) => local_repo_digest(&image, &reference.name),
        Err(_) => None,
    };
    let comparison_tag = reference.effective_tag() == "latest" || ctx.settings.check_all_tags;
    if comparison_tag {
        // A registry failure leaves the remote side unknown and forces the
        // pull (fail-safe toward freshness).
        record.remote_digest = daemon.remote_digest(&image_name).await.ok();
    }
    let pull_needed = needs_pull(
        reference.effective_tag(),
        record.local_digest.as_deref(),
        record.remote_digest.as_deref(),
        ctx.settings.check_all_tags,
    );

    if pull_needed {
        pull_with_budget(daemon, &image_name, ctx.pull_budget).await?;
        report.pulled = true;
    } else {
        debug!(container = %name, image = %image_name, "Digest unchanged, pull skipped");
        return Ok(skip(ctx, &record, &name, "digest_unchanged"));
    }

    // Post-pull compare.
    let new_image_id = daemon
        .inspect_image(&image_name)
        .await
        .map(|image| image.id)
        .unwrap_or_default();
    record.new_image_id = Some(new_image_id.clone());

    if !current_image_id.is_empty() {
        *dirty |= history.record(&image_name, &current_image_id);
    }
    if !new_image_id.is_empty() {
        *dirty |= history.record(&image_name, &new_image_id);
    }

    if new_image_id.is_empty() || current_image_id.is_empty() || new_image_id == current_image_id {
        ctx.audit.append(
            AuditEvent::new(AuditAction::Checked)
                .container(&name)
                .image(&image_name)
                .detail(record.detail()),
        );
        return Ok(ContainerOutcome::Checked);
    }

    info!(
        container = %name,
        image = %image_name,
        old_id = %current_image_id,
        new_id = %new_image_id,
        "Newer image available, replacing container"
    );

    // Backup the running container.
    let restore_options = CreateOptions::from_inspect(&inspect, &inspect.image);
    daemon.stop_container(&summary.id).await?;
    let backup_name = format!("{name}__backup__{}", Utc::now().timestamp());
    let backup = match daemon.rename_container(&summary.id, &backup_name).await {
        Ok(()) => BackupMode::Rename { backup_name },
        Err(err) => {
            debug!(container = %name, error = %err, "Rename unavailable, using recreate backup");
            daemon.remove_container(&summary.id).await?;
            BackupMode::Recreate {
                options: restore_options,
            }
        }
    };
    record.backup = Some(backup.label());

    // Create and start the replacement.
    let create_options = CreateOptions::from_inspect(&inspect, &image_name);
    let new_container_id = match daemon.create_container(&create_options).await {
        Ok(id) => id,
        Err(err) => {
            warn!(container = %name, error = %err, "Create failed, restoring previous container");
            rollback(ctx, None, &backup, &summary.id, &name).await;
            return Ok(rolled_back(ctx, &record, &name, "start_failed"));
        }
    };
    if let Err(err) = daemon.start_container(&new_container_id).await {
        warn!(container = %name, error = %err, "Start failed, restoring previous container");
        rollback(ctx, Some(&new_container_id), &backup, &summary.id, &name).await;
        return Ok(rolled_back(ctx, &record, &name, "start_failed"));
    }

    // Health gate.
    let verdict = wait_until_healthy(daemon, &new_container_id, ctx.health_probe).await;
    if !verdict.is_ready() {
        warn!(
            container = %name,
            reason = %verdict.reason(),
            "Replacement failed its health gate, rolling back"
        );
        let restored = rollback(ctx, Some(&new_container_id), &backup, &summary.id, &name).await;
        if let Some(restored_id) = restored {
            // Best-effort: confirm the restored container comes back, but a
            // failure here is the operator's problem, not a tick error.
            let restored_verdict =
                wait_until_healthy(daemon, &restored_id, ctx.health_probe).await;
            if !restored_verdict.is_ready() {
                warn!(
                    container = %name,
                    reason = %restored_verdict.reason(),
                    "Restored container did not recover"
                );
            }
        }
        return Ok(rolled_back(ctx, &record, &name, verdict.reason()));
    }

    // Commit.
    report.updated = true;
    ctx.registry
        .update(&summary.id, &new_container_id, &name)
        .await?;

    if let BackupMode::Rename { backup_name } = &backup {
        if let Err(err) = daemon.remove_container(&summary.id).await {
            warn!(container = %name, backup = %backup_name, error = %err, "Backup removal failed");
        }
    }

    // Prune superseded images, bounded by the retention settings.
    let after = match daemon.list_containers(true).await {
        Ok(after) => after,
        Err(_) => tick_containers.to_vec(),
    };
    let used: HashSet<String> = after
        .iter()
        .map(|c| c.image_id.clone())
        .filter(|id| !id.is_empty())
        .collect();
    let candidates = prune_candidates(history.ids(&image_name), ctx.settings.keep_images, &used);

    for candidate in candidates {
        // The removal bound spans the tick, so earlier containers count
        // against this one's budget.
        if ctx.settings.max_prune_per_run > 0
            && tick_pruned + report.pruned >= ctx.settings.max_prune_per_run as u64
        {
            break;
        }
        match daemon.remove_image(&candidate).await {
            Ok(()) => {
                debug!(image_id = %candidate, "Pruned superseded image");
                report.pruned += 1;
            }
            Err(err) => report.errors.push(TickError::new(
                TickScope::PruneImage,
                Some(&candidate),
                &err.to_string(),
            )),
        }
    }

    ctx.audit.append(
        AuditEvent::new(AuditAction::Updated)
            .container(&name)
            .image(&image_name)
            .detail(serde_json::json!({
                "record": record.detail(),
                "newContainerId": new_container_id,
                "pruned": report.pruned,
            })),
    );

    Ok(ContainerOutcome::Updated {
        old_id: current_image_id,
        new_id: new_image_id,
    })
}

fn skip(
    ctx: &UpdateContext<'_>,
    record: &UpdateRecord,
    name: &str,
    reason: impl Into<String>,
) -> ContainerOutcome {
    let reason = reason.into();
    ctx.audit.append(
        AuditEvent::new(AuditAction::Skip)
            .container(name)
            .image(&record.image)
            .reason(reason.clone())
            .detail(record.detail()),
    );
    ContainerOutcome::Skipped { reason }
}

fn rolled_back(
    ctx: &UpdateContext<'_>,
    record: &UpdateRecord,
    name: &str,
    reason: impl Into<String>,
) -> ContainerOutcome {
    let reason = reason.into();
    ctx.audit.append(
        AuditEvent::new(AuditAction::Rollback)
            .container(name)
            .image(&record.image)
            .reason(reason.clone())
            .detail(record.detail()),
    );
    ContainerOutcome::RolledBack { reason }
}

/// Compensating actions for a failed replacement. Each step is individually
/// best-effort; every failure is logged and the sequence continues.
///
/// Returns the ID of the restored container when one exists.
async fn rollback(
    ctx: &UpdateContext<'_>,
    new_container_id: Option<&str>,
    backup: &BackupMode,
    old_id: &str,
    name: &str,
) -> Option<String> {
    let daemon = ctx.daemon;

    if let Some(id) = new_container_id {
        if let Err(err) = daemon.stop_container(id).await {
            debug!(container = %name, error = %err, "Compensation: stop of replacement failed");
        }
        if let Err(err) = daemon.remove_container(id).await {
            warn!(container = %name, error = %err, "Compensation: removal of replacement failed");
        }
    }

    match backup {
        BackupMode::Rename { .. } => {
            // Renaming never changed the container's ID; put the name back
            // and restart it.
            if let Err(err) = daemon.rename_container(old_id, name).await {
                warn!(container = %name, error = %err, "Compensation: un-rename failed");
            }
            if let Err(err) = daemon.start_container(old_id).await {
                warn!(container = %name, error = %err, "Compensation: restart of previous container failed");
            }
            Some(old_id.to_string())
        }
        BackupMode::Recreate { options } => {
            let restored_id = match daemon.create_container(options).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(container = %name, error = %err, "Compensation: recreate of previous container failed");
                    return None;
                }
            };
            if let Err(err) = daemon.start_container(&restored_id).await {
                warn!(container = %name, error = %err, "Compensation: restart of previous container failed");
            }
            Some(restored_id)
        }
    }
}

