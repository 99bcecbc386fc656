//! Bounded image pulls.
//!
//! A pull races two deadlines: an idle deadline that resets on every
//! progress event (tolerates slow-but-advancing transfers) and a total
//! deadline fixed at invocation (bounds worst-case tick duration). Either
//! firing aborts the pull; the progress stream is dropped and no further
//! events are honored.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_stream::StreamExt;

use crate::daemon::{DaemonClient, DaemonError};

/// Errors from a bounded pull.
#[derive(Debug, Error)]
pub enum PullError {
    /// No progress event arrived within the idle window.
    #[error("idle timeout pulling image after {0:?} without progress")]
    IdleTimeout(Duration),

    /// The pull exceeded its total budget.
    #[error("total timeout pulling image after {0:?}")]
    TotalTimeout(Duration),

    /// The daemon or registry failed the pull.
    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

/// Time budget for one pull.
#[derive(Debug, Clone, Copy)]
pub struct PullBudget {
    /// Maximum gap between progress events.
    pub idle: Duration,

    /// Maximum wall-clock duration for the whole pull.
    pub total: Duration,
}

impl Default for PullBudget {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            total: Duration::from_secs(600),
        }
    }
}

impl PullBudget {
    /// Clamp to sane bounds: idle at least one second, total at least idle.
    fn normalized(self) -> Self {
        let idle = self.idle.max(Duration::from_secs(1));
        Self {
            idle,
            total: self.total.max(idle),
        }
    }
}

/// Outcome of a completed pull, for audit detail.
#[derive(Debug, Clone, Copy)]
pub struct PullReport {
    /// Progress events observed.
    pub events: u64,

    /// Wall-clock duration of the pull.
    pub elapsed: Duration,
}

/// Pull an image, enforcing the budget over the daemon's progress stream.
pub async fn pull_with_budget(
    daemon: &dyn DaemonClient,
    reference: &str,
    budget: PullBudget,
) -> Result<PullReport, PullError> {
    let budget = budget.normalized();
    let started = Instant::now();
    let total_deadline = started + budget.total;

    let mut stream = daemon.pull_image(reference).await?;
    let mut events: u64 = 0;

    loop {
        // A continuously-ready stream would win every biased poll, so the
        // total deadline is also enforced outside the select.
        if Instant::now() >= total_deadline {
            return Err(PullError::TotalTimeout(budget.total));
        }

        let idle_deadline = Instant::now() + budget.idle;
        tokio::select! {
            // Deterministic order: drain progress first, then the timers.
            biased;
            item = stream.next() => match item {
                None => {
                    return Ok(PullReport {
                        events,
                        elapsed: started.elapsed(),
                    });
                }
                Some(Ok(_progress)) => {
                    events += 1;
                }
                Some(Err(err)) => return Err(PullError::Daemon(err)),
            },
            _ = tokio::time::sleep_until(idle_deadline) => {
                return Err(PullError::IdleTimeout(budget.idle));
            }
            _ = tokio::time::sleep_until(total_deadline) => {
                return Err(PullError::TotalTimeout(budget.total));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::mock::MockDaemon;

    #[tokio::test]
    async fn test_pull_completes_within_budget() {
        let daemon = MockDaemon::new();
        daemon.set_pulled_image("nginx:latest", "sha256:new", &[]);

        let report = pull_with_budget(&daemon, "nginx:latest", PullBudget::default())
            .await
            .unwrap();
        assert_eq!(report.events, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_pull_hits_idle_timeout() {
        let daemon = MockDaemon::new();
        daemon.set_pull_stalled("nginx:latest");

        let budget = PullBudget {
            idle: Duration::from_secs(5),
            total: Duration::from_secs(60),
        };
        let err = pull_with_budget(&daemon, "nginx:latest", budget)
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::IdleTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dripping_pull_hits_total_timeout() {
        // Progress keeps arriving, so the idle timer keeps resetting; only
        // the total deadline can end this pull.
        let daemon = MockDaemon::new();
        daemon.set_pull_dripping("nginx:latest");

        let budget = PullBudget {
            idle: Duration::from_secs(5),
            total: Duration::from_secs(30),
        };
        let err = pull_with_budget(&daemon, "nginx:latest", budget)
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::TotalTimeout(d) if d == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_flooding_pull_cannot_outrun_total_deadline() {
        // The stream is ready on every poll; only the per-iteration
        // deadline check can end this pull.
        let daemon = MockDaemon::new();
        daemon.set_pull_flooding("nginx:latest");

        let budget = PullBudget {
            idle: Duration::from_secs(1),
            total: Duration::from_secs(1),
        };
        let err = pull_with_budget(&daemon, "nginx:latest", budget)
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::TotalTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_floor_is_idle() {
        // total below idle is floored up to idle, so the idle timer wins.
        let daemon = MockDaemon::new();
        daemon.set_pull_stalled("nginx:latest");

        let budget = PullBudget {
            idle: Duration::from_secs(30),
            total: Duration::from_secs(1),
        };
        let err = pull_with_budget(&daemon, "nginx:latest", budget)
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::IdleTimeout(d) if d == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_pull_error_propagates() {
        let daemon = MockDaemon::new();
        daemon.set_pull_error("nginx:latest", "manifest unknown");

        let err = pull_with_budget(&daemon, "nginx:latest", PullBudget::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::Daemon(_)));
    }
}
