//! Disk guard: free space on the daemon's data-root mount.
//!
//! Callers treat `None` free bytes as "unknown, do not block"; nothing in
//! this module raises.

use async_trait::async_trait;
use tracing::debug;

use crate::daemon::DaemonClient;

/// One host filesystem mount with its free-space figure.
#[derive(Debug, Clone)]
pub struct Mount {
    /// Mount point path.
    pub mount_path: String,

    /// Free bytes, when the provider could read them.
    pub available_bytes: Option<u64>,
}

/// Host filesystem metrics provider.
#[async_trait]
pub trait MountsProvider: Send + Sync {
    /// List mounts with free-space figures.
    async fn list_mounts(&self) -> anyhow::Result<Vec<Mount>>;
}

/// Fixed mount table, for tests and for hosts without a metrics source.
#[derive(Debug, Clone, Default)]
pub struct StaticMounts(pub Vec<Mount>);

#[async_trait]
impl MountsProvider for StaticMounts {
    async fn list_mounts(&self) -> anyhow::Result<Vec<Mount>> {
        Ok(self.0.clone())
    }
}

/// Free space on the daemon's data-root mount.
#[derive(Debug, Clone, Default)]
pub struct FreeSpace {
    /// The daemon's data-root path, empty when unknown.
    pub root_path: String,

    /// Free bytes on the matched mount, `None` when unknown.
    pub free_bytes: Option<u64>,
}

/// Resolve the daemon data root and report free bytes on its mount.
///
/// Paths are normalized (backslashes to slashes, lowercased) and the mount
/// whose normalized path is the longest prefix of the data root wins. An
/// unknown data root matches two-character drive mounts (`c:`); with no
/// match at all the first reported mount is used.
pub async fn data_root_free_bytes(
    daemon: &dyn DaemonClient,
    mounts: &dyn MountsProvider,
) -> FreeSpace {
    let root_path = match daemon.info().await {
        Ok(info) => info.data_root,
        Err(err) => {
            debug!(error = %err, "Daemon info unavailable, free space unknown");
            return FreeSpace::default();
        }
    };

    let disks = match mounts.list_mounts().await {
        Ok(disks) if !disks.is_empty() => disks,
        Ok(_) => {
            return FreeSpace {
                root_path,
                free_bytes: None,
            }
        }
        Err(err) => {
            debug!(error = %err, "Mount listing failed, free space unknown");
            return FreeSpace {
                root_path,
                free_bytes: None,
            };
        }
    };

    let root_norm = normalize(&root_path);
    let mut best: Option<&Mount> = None;
    let mut best_len = 0usize;

    for disk in &disks {
        let mount_norm = normalize(&disk.mount_path);
        if mount_norm.is_empty() {
            continue;
        }
        let matched = if root_norm.is_empty() {
            mount_norm.len() == 2 && mount_norm.ends_with(':')
        } else {
            root_norm.starts_with(&mount_norm)
        };
        if matched && mount_norm.len() > best_len {
            best = Some(disk);
            best_len = mount_norm.len();
        }
    }

    let best = best.unwrap_or(&disks[0]);
    FreeSpace {
        root_path,
        free_bytes: best.available_bytes,
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}
