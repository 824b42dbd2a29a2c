// src/capture/supervisor.rs

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::RestartConfig;

/// Restart policy for supervised child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    /// Fixed delay between runs.
    Fixed(Duration),
    /// Doubling delay, capped at `max`.
    Backoff { initial: Duration, max: Duration },
}

impl RestartPolicy {
    pub fn from_config(cfg: &RestartConfig) -> Self {
        if !cfg.enabled {
            return Self::Never;
        }
        Self::Backoff {
            initial: Duration::from_millis(cfg.initial_backoff_ms),
            max: Duration::from_millis(cfg.max_backoff_ms),
        }
    }
}

/// Tracks the delay before the next restart.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RestartPolicy,
    next: Duration,
}

impl Backoff {
    pub fn new(policy: RestartPolicy) -> Self {
        let next = match policy {
            RestartPolicy::Never => Duration::ZERO,
            RestartPolicy::Fixed(delay) => delay,
            RestartPolicy::Backoff { initial, .. } => initial,
        };
        Self { policy, next }
    }

    /// Delay before the next attempt, or `None` when restarts are disabled.
    pub fn next_delay(&mut self) -> Option<Duration> {
        match self.policy {
            RestartPolicy::Never => None,
            RestartPolicy::Fixed(delay) => Some(delay),
            RestartPolicy::Backoff { max, .. } => {
                let delay = self.next;
                self.next = (self.next * 2).min(max);
                Some(delay)
            }
        }
    }

    /// Called after a healthy run.
    pub fn reset(&mut self) {
        if let RestartPolicy::Backoff { initial, .. } = self.policy {
            self.next = initial;
        }
    }
}

/// Sleeps for `delay` unless `shutdown` fires first. Returns `true` on
/// shutdown.
pub async fn wait_backoff(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(delay) => false,
    }
}
