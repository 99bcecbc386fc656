//! Health monitor: poll a container until it is ready, failed, or the
//! deadline passes.
//!
//! Small state machine: `Polling -> {Ready | Failed | TimedOut}`, with no
//! transition back out of a terminal verdict.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::daemon::DaemonClient;

/// Polling parameters.
#[derive(Debug, Clone, Copy)]
pub struct HealthProbe {
    /// Gap between inspections. Floor 200ms.
    pub interval: Duration,

    /// Overall wait budget. Floor 1s.
    pub deadline: Duration,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(60),
        }
    }
}

impl HealthProbe {
    fn normalized(self) -> Self {
        Self {
            interval: self.interval.max(Duration::from_millis(200)),
            deadline: self.deadline.max(Duration::from_secs(1)),
        }
    }
}

/// Terminal verdict of a health wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Running with no healthcheck or a passing one.
    Ready,

    /// Terminal failure, with a reason (`exited:<code>`, `unhealthy`, or an
    /// inspection error).
    Failed(String),

    /// Deadline passed with no terminal condition reached.
    TimedOut,
}

impl HealthVerdict {
    /// Reason string for audit records.
    pub fn reason(&self) -> String {
        match self {
            Self::Ready => "ready".to_string(),
            Self::Failed(reason) => reason.clone(),
            Self::TimedOut => "timeout".to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Poll `id` until a terminal verdict.
///
/// Per poll: a non-zero exit fails immediately with `exited:<code>`;
/// running with empty or `healthy` health succeeds; `unhealthy` fails
/// immediately; anything else (`starting`, stopped-but-zero-exit) keeps
/// polling. An inspection error is itself a terminal failure.
pub async fn wait_until_healthy(
    daemon: &dyn DaemonClient,
    id: &str,
    probe: HealthProbe,
) -> HealthVerdict {
    let probe = probe.normalized();
    let deadline = Instant::now() + probe.deadline;

    loop {
        let inspect = match daemon.inspect_container(id).await {
            Ok(inspect) => inspect,
            Err(err) => return HealthVerdict::Failed(err.to_string()),
        };

        let state = &inspect.state;
        if !state.running && state.exit_code != 0 {
            return HealthVerdict::Failed(format!("exited:{}", state.exit_code));
        }
        if state.running {
            match state.health.as_str() {
                "" | "healthy" => return HealthVerdict::Ready,
                "unhealthy" => return HealthVerdict::Failed("unhealthy".to_string()),
                other => debug!(container = %id, health = other, "Still waiting for health"),
            }
        }

        if Instant::now() + probe.interval > deadline {
            return HealthVerdict::TimedOut;
        }
        tokio::time::sleep(probe.interval).await;
    }
}
