//! Global container-identity registry seam.
//!
//! Other subsystems key state by container ID; a committed replacement
//! changes that ID, and the registry is how they find out. Called only on
//! commit, never on rollback.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::daemon::DaemonError;

/// Consumer of container identity changes.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// A container's ID changed from `old_id` to `new_id`.
    async fn update(
        &self,
        old_id: &str,
        new_id: &str,
        display_name: &str,
    ) -> Result<(), DaemonError>;
}

/// Registry that ignores identity changes.
#[derive(Debug, Default)]
pub struct NoopRegistry;

#[async_trait]
impl IdentityRegistry for NoopRegistry {
    async fn update(&self, _: &str, _: &str, _: &str) -> Result<(), DaemonError> {
        Ok(())
    }
}

/// Recording registry for tests.
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    updates: Mutex<Vec<(String, String, String)>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(old_id, new_id, display_name)` triples in call order.
    pub fn updates(&self) -> Vec<(String, String, String)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityRegistry for RecordingRegistry {
    async fn update(
        &self,
        old_id: &str,
        new_id: &str,
        display_name: &str,
    ) -> Result<(), DaemonError> {
        self.updates.lock().unwrap().push((
            old_id.to_string(),
            new_id.to_string(),
            display_name.to_string(),
        ));
        Ok(())
    }
}
