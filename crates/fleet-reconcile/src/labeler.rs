//! Pod `active` label, flipped on leadership changes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use fleet_core::LeaderConfig;

use crate::error::{ReconcileError, ReconcileResult};

/// Writes the `active` label on this replica's pod.
#[async_trait]
pub trait PodLabeler: Send + Sync {
    async fn set_active(&self, active: bool) -> ReconcileResult<()>;
}

/// Exponential retry schedule for label writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(10),
            max: Duration::from_secs(1),
            attempts: 10,
        }
    }
}

impl Backoff {
    pub fn from_config(config: &LeaderConfig) -> Self {
        Self {
            base: config.label_base_delay.as_duration(),
            max: config.label_max_delay.as_duration(),
            attempts: config.label_max_attempts.max(1),
        }
    }

    /// Delay before retry number `attempt` (0-based): base doubling, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Set the label, retrying with `backoff`. Returns the attempts used.
pub async fn label_with_backoff(
    labeler: &dyn PodLabeler,
    active: bool,
    backoff: &Backoff,
) -> ReconcileResult<u32> {
    let mut attempt = 0;
    loop {
        match labeler.set_active(active).await {
            Ok(()) => return Ok(attempt + 1),
            Err(e) if attempt + 1 >= backoff.attempts => {
                warn!(active, attempts = attempt + 1, error = %e, "giving up on pod label");
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.delay(attempt);
                warn!(active, attempt, delay_ms = delay.as_millis() as u64, error = %e, "pod label failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Labeler for deployments without a pod API: records the label in the log.
#[derive(Debug, Default)]
pub struct LogLabeler;

#[async_trait]
impl PodLabeler for LogLabeler {
    async fn set_active(&self, active: bool) -> ReconcileResult<()> {
        info!(active, "pod label updated");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LabelState {
    history: Vec<bool>,
    fail_next: u32,
}

/// Records every successful write; can be told to fail the next N writes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLabeler {
    state: Arc<Mutex<LabelState>>,
}

impl InMemoryLabeler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LabelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_next(&self, count: u32) {
        self.state().fail_next = count;
    }

    pub fn history(&self) -> Vec<bool> {
        self.state().history.clone()
    }

    pub fn current(&self) -> Option<bool> {
        self.state().history.last().copied()
    }
}

#[async_trait]
impl PodLabeler for InMemoryLabeler {
    async fn set_active(&self, active: bool) -> ReconcileResult<()> {
        let mut state = self.state();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ReconcileError::Label("pod api unavailable".to_string()));
        }
        state.history.push(active);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_then_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(20));
        assert_eq!(backoff.delay(6), Duration::from_millis(640));
        assert_eq!(backoff.delay(7), Duration::from_secs(1));
        assert_eq!(backoff.delay(40), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let labeler = InMemoryLabeler::new();
        labeler.fail_next(3);

        let attempts = label_with_backoff(&labeler, true, &Backoff::default()).await.unwrap();
        assert_eq!(attempts, 4);
        assert_eq!(labeler.history(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_attempts() {
        let labeler = InMemoryLabeler::new();
        labeler.fail_next(100);
        let backoff = Backoff {
            attempts: 3,
            ..Default::default()
        };

        let err = label_with_backoff(&labeler, false, &backoff).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Label(_)));
        assert!(labeler.current().is_none());
    }
}
